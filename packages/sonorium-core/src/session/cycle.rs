//! Theme rotation.
//!
//! One background ticker serves every session: it wakes every 10 seconds,
//! finds playing sessions whose cycle is enabled and due, and asks the
//! session manager for a theme change (which crossfades on the bound
//! channel and restarts that session's clock). Manual theme changes reset
//! the clock the same way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::prelude::IndexedRandom;

use crate::session::manager::{SessionManager, SessionUpdate};

/// Ticker period; intervals are minute-scale so a coarse poll suffices.
const TICK_PERIOD: Duration = Duration::from_secs(10);

/// Per-session rotation clocks.
#[derive(Default)]
pub struct CycleManager {
    last_change: DashMap<String, Instant>,
}

impl CycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restarts a session's rotation clock (on play, manual theme change,
    /// or cycle enable).
    pub fn reset(&self, session_id: &str) {
        self.last_change.insert(session_id.to_string(), Instant::now());
    }

    /// Drops a session's clock entirely.
    pub fn clear(&self, session_id: &str) {
        self.last_change.remove(session_id);
    }

    /// Time since the session's last theme change, if tracked.
    pub fn elapsed(&self, session_id: &str) -> Option<Duration> {
        self.last_change.get(session_id).map(|t| t.elapsed())
    }

    /// Moves a session's clock into the past. Test hook.
    #[cfg(test)]
    pub(crate) fn backdate(&self, session_id: &str, age: Duration) {
        if let Some(instant) = Instant::now().checked_sub(age) {
            self.last_change.insert(session_id.to_string(), instant);
        }
    }
}

/// Picks the next theme for a rotation.
///
/// Random mode draws uniformly from the pool excluding the current theme;
/// ordered mode advances through the list, wrapping at the end.
pub fn choose_next_theme(
    current: Option<&str>,
    pool: &[String],
    randomize: bool,
) -> Option<String> {
    if pool.is_empty() {
        return None;
    }
    if randomize {
        let candidates: Vec<&String> = pool
            .iter()
            .filter(|id| Some(id.as_str()) != current)
            .collect();
        return candidates.choose(&mut rand::rng()).map(|id| (*id).clone());
    }
    let next_index = match current.and_then(|c| pool.iter().position(|id| id == c)) {
        Some(index) => (index + 1) % pool.len(),
        None => 0,
    };
    let next = pool[next_index].clone();
    if Some(next.as_str()) == current {
        return None;
    }
    Some(next)
}

/// One sweep over all sessions: rotate every one that is due.
pub async fn run_cycle_pass(sessions: &SessionManager, cycle: &CycleManager) {
    for session in sessions.list() {
        if !session.cycle_config.enabled || !session.is_playing {
            continue;
        }
        let interval = Duration::from_secs(session.cycle_config.interval_minutes as u64 * 60);
        let Some(elapsed) = cycle.elapsed(&session.id) else {
            // First sight of this session: start its clock now.
            cycle.reset(&session.id);
            continue;
        };
        if elapsed < interval {
            continue;
        }

        let pool: Vec<String> = if session.cycle_config.theme_ids.is_empty() {
            sessions
                .library()
                .list()
                .iter()
                .map(|t| t.id().to_string())
                .collect()
        } else {
            session.cycle_config.theme_ids.clone()
        };

        let Some(next) = choose_next_theme(session.theme_id.as_deref(), &pool, session.cycle_config.randomize)
        else {
            continue;
        };

        log::info!(
            "[Cycle] Rotating session '{}' to theme {}",
            session.name,
            next
        );
        let update = SessionUpdate {
            theme_id: Some(next),
            ..Default::default()
        };
        match sessions.update(&session.id, update).await {
            // The theme change already reset the clock; this covers the
            // no-op case where the chosen theme failed to load.
            Ok(_) => cycle.reset(&session.id),
            Err(err) => log::warn!("[Cycle] Rotation failed for '{}': {}", session.name, err),
        }
    }
}

/// Spawns the shared rotation ticker.
pub fn spawn_cycle_ticker(
    sessions: Arc<SessionManager>,
    cycle: Arc<CycleManager>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_cycle_pass(&sessions, &cycle).await;
        }
    })
}
