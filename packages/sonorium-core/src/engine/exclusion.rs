//! Exclusive-playback arbitration.
//!
//! Each theme owns one coordinator. Tracks marked exclusive request a token
//! before entering audible output and release it when their fade-out
//! completes; grants are strictly FIFO and a holder is never preempted.
//! Non-exclusive tracks never consult the coordinator.

use std::collections::VecDeque;

use parking_lot::Mutex;

#[derive(Default)]
struct ExclusionState {
    holder: Option<String>,
    queue: VecDeque<String>,
}

/// Per-theme arbiter granting audible playback to at most one exclusive
/// track at a time.
#[derive(Default)]
pub struct ExclusionCoordinator {
    state: Mutex<ExclusionState>,
}

impl ExclusionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the token for `track`.
    ///
    /// Returns `true` when `track` now holds the token (idempotent for the
    /// current holder). Otherwise the track is enqueued (once) and the call
    /// returns `false`; callers poll again on their next chunk.
    pub fn try_acquire(&self, track: &str) -> bool {
        let mut state = self.state.lock();
        if state.holder.as_deref() == Some(track) {
            return true;
        }
        if !state.queue.iter().any(|t| t == track) {
            state.queue.push_back(track.to_string());
        }
        if state.holder.is_none() && state.queue.front().map(String::as_str) == Some(track) {
            state.queue.pop_front();
            state.holder = Some(track.to_string());
            log::debug!("[Exclusion] Token granted to '{}'", track);
            return true;
        }
        false
    }

    /// Releases the token (or abandons a queued request).
    pub fn release(&self, track: &str) {
        let mut state = self.state.lock();
        if state.holder.as_deref() == Some(track) {
            log::debug!("[Exclusion] Token released by '{}'", track);
            state.holder = None;
        } else {
            state.queue.retain(|t| t != track);
        }
    }

    /// The current token holder, if any.
    pub fn holder(&self) -> Option<String> {
        self.state.lock().holder.clone()
    }
}
