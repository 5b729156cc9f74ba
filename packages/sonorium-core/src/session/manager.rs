//! Session lifecycle and live control.
//!
//! Each session represents one theme playing to one set of speakers.
//! Multiple sessions run simultaneously on different channels. Mutations
//! are serialized through the state store; long-running per-speaker
//! commands are dispatched outside any lock and their failures never fail
//! the session.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::channel::manager::ChannelManager;
use crate::channel::Channel;
use crate::context::NetworkContext;
use crate::error::{SonoriumError, SonoriumResult};
use crate::player::LocalStreamPlayer;
use crate::session::cycle::CycleManager;
use crate::session::{
    now_secs, CycleConfig, NameSource, Session, SpeakerGroup, SpeakerSelection,
};
use crate::speakers::{resolve_selection, MediaControl, SpeakerTopology, LOCAL_SPEAKER_ID};
use crate::state::StateStore;
use crate::theme::library::ThemeLibrary;

/// Per-operation timeout for network speaker commands.
const MEDIA_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Fields accepted when creating a session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub theme_id: Option<String>,
    pub preset_id: Option<String>,
    pub speaker_group_id: Option<String>,
    pub adhoc_selection: Option<SpeakerSelection>,
    pub custom_name: Option<String>,
    pub volume: Option<u8>,
    pub cycle_config: Option<CycleConfig>,
}

/// Partial update; only provided fields change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdate {
    pub theme_id: Option<String>,
    pub preset_id: Option<String>,
    pub speaker_group_id: Option<String>,
    pub adhoc_selection: Option<SpeakerSelection>,
    pub custom_name: Option<String>,
    pub volume: Option<u8>,
    pub cycle_config: Option<CycleConfig>,
}

/// Result of a session update, including the live speaker delta.
#[derive(Debug, Serialize)]
pub struct SessionUpdateOutcome {
    pub session: Session,
    pub added_speakers: Vec<String>,
    pub removed_speakers: Vec<String>,
    /// Set when the in-memory update succeeded but the state file write
    /// failed; playback is unaffected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_warning: Option<String>,
}

/// Manages playback sessions.
pub struct SessionManager {
    store: Arc<StateStore>,
    topology: Arc<dyn SpeakerTopology>,
    media: Arc<dyn MediaControl>,
    channels: Arc<ChannelManager>,
    library: Arc<ThemeLibrary>,
    local_player: Arc<LocalStreamPlayer>,
    network: NetworkContext,
    cycle: Arc<CycleManager>,
    max_sessions: usize,
    /// session id -> channel id for playing/paused sessions.
    session_channels: DashMap<String, u32>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        topology: Arc<dyn SpeakerTopology>,
        media: Arc<dyn MediaControl>,
        channels: Arc<ChannelManager>,
        library: Arc<ThemeLibrary>,
        local_player: Arc<LocalStreamPlayer>,
        network: NetworkContext,
        cycle: Arc<CycleManager>,
        max_sessions: usize,
    ) -> Self {
        Self {
            store,
            topology,
            media,
            channels,
            library,
            local_player,
            network,
            cycle,
            max_sessions,
            session_channels: DashMap::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // CRUD
    // ─────────────────────────────────────────────────────────────────────

    /// Creates a session, auto-naming it from the speaker selection.
    pub fn create(&self, request: CreateSessionRequest) -> SonoriumResult<Session> {
        let at_limit = self
            .store
            .read(|state| state.sessions.len() >= self.max_sessions);
        if at_limit {
            return Err(SonoriumError::LimitExceeded(format!(
                "maximum of {} sessions allowed",
                self.max_sessions
            )));
        }

        let session_id = uuid::Uuid::new_v4().to_string()[..8].to_string();

        let (name, name_source) = if let Some(custom) = &request.custom_name {
            (custom.clone(), NameSource::Custom)
        } else {
            let group = request.speaker_group_id.as_ref().and_then(|id| {
                self.store
                    .read(|state| state.speaker_groups.get(id).cloned())
            });
            self.generate_session_name(request.adhoc_selection.as_ref(), group.as_ref())
        };

        let (volume, cycle_config) = self.store.read(|state| {
            (
                request.volume.unwrap_or(state.settings.default_volume),
                request.cycle_config.clone().unwrap_or(CycleConfig {
                    enabled: false,
                    interval_minutes: state.settings.default_cycle_interval,
                    randomize: state.settings.default_cycle_randomize,
                    theme_ids: Vec::new(),
                }),
            )
        });

        let session = Session {
            id: session_id.clone(),
            name,
            name_source,
            theme_id: request.theme_id,
            preset_id: request.preset_id,
            speaker_group_id: request.speaker_group_id,
            adhoc_selection: request.adhoc_selection,
            volume: volume.min(100),
            is_playing: false,
            cycle_config,
            created_at: now_secs(),
            last_played_at: None,
        };

        let (_, persist) = self.store.mutate(|state| {
            state.sessions.insert(session_id.clone(), session.clone());
        });
        if let Err(err) = persist {
            log::warn!("[Session] Created '{}' but could not persist: {}", session.name, err);
        }
        log::info!("[Session] Created '{}' ({})", session.name, session.id);
        Ok(session)
    }

    /// Gets a session by id.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.store
            .read(|state| state.sessions.get(session_id).cloned())
    }

    fn require(&self, session_id: &str) -> SonoriumResult<Session> {
        self.get(session_id)
            .ok_or_else(|| SonoriumError::NotFound(format!("session {session_id}")))
    }

    /// Lists all sessions, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> =
            self.store.read(|state| state.sessions.values().cloned().collect());
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Deletes a session, releasing its channel.
    pub fn delete(&self, session_id: &str) -> SonoriumResult<()> {
        self.release_channel(session_id);
        self.cycle.clear(session_id);
        let (removed, persist) = self.store.mutate(|state| {
            state.sessions.remove(session_id)
        });
        let Some(session) = removed else {
            return Err(SonoriumError::NotFound(format!("session {session_id}")));
        };
        if let Err(err) = persist {
            log::warn!("[Session] Deleted '{}' but could not persist: {}", session.name, err);
        }
        log::info!("[Session] Deleted '{}'", session.name);
        Ok(())
    }

    /// Updates a session. Theme changes on a playing session crossfade on
    /// the bound channel; speaker-set changes start/stop the delta live;
    /// a preset change applies in place without interrupting audio.
    pub async fn update(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> SonoriumResult<SessionUpdateOutcome> {
        let before = self.require(session_id)?;

        let theme_changed =
            update.theme_id.is_some() && update.theme_id != before.theme_id;
        let preset_changed =
            update.preset_id.is_some() && update.preset_id != before.preset_id;
        let speakers_changing =
            update.speaker_group_id.is_some() || update.adhoc_selection.is_some();
        let old_speakers: HashSet<String> = if before.is_playing {
            self.resolved_speakers(&before).into_iter().collect()
        } else {
            HashSet::new()
        };

        let custom_name = update.custom_name.clone();
        let topology_rename = custom_name.is_none();

        let (updated, persist) = self.store.mutate(|state| {
            let Some(session) = state.sessions.get_mut(session_id) else {
                return None;
            };
            if let Some(theme_id) = update.theme_id.clone() {
                session.theme_id = Some(theme_id);
            }
            if let Some(preset_id) = update.preset_id.clone() {
                session.preset_id = Some(preset_id);
            }
            if let Some(group_id) = update.speaker_group_id.clone() {
                session.speaker_group_id = Some(group_id);
                session.adhoc_selection = None;
            }
            if let Some(selection) = update.adhoc_selection.clone() {
                session.adhoc_selection = Some(selection);
                session.speaker_group_id = None;
            }
            if let Some(name) = custom_name.clone() {
                session.name = name;
                session.name_source = NameSource::Custom;
            }
            if let Some(volume) = update.volume {
                session.volume = volume.min(100);
            }
            if let Some(cycle_config) = update.cycle_config.clone() {
                session.cycle_config = cycle_config;
            }
            Some(session.clone())
        });
        let Some(mut session) = updated else {
            return Err(SonoriumError::NotFound(format!("session {session_id}")));
        };
        let mut persist_warning = persist.err().map(|e| e.to_string());

        // Re-generate the auto-name when the selection changed and the name
        // was never customized.
        if topology_rename && session.name_source != NameSource::Custom && speakers_changing {
            let group = session.speaker_group_id.as_ref().and_then(|id| {
                self.store
                    .read(|state| state.speaker_groups.get(id).cloned())
            });
            let (name, source) =
                self.generate_session_name(session.adhoc_selection.as_ref(), group.as_ref());
            let (renamed, persist) = self.store.mutate(|state| {
                if let Some(stored) = state.sessions.get_mut(session_id) {
                    stored.name = name.clone();
                    stored.name_source = source;
                    Some(stored.clone())
                } else {
                    None
                }
            });
            if let Some(renamed) = renamed {
                session = renamed;
            }
            if let Err(err) = persist {
                persist_warning.get_or_insert(err.to_string());
            }
        }

        // Live theme change: the channel crossfades autonomously.
        if session.is_playing && theme_changed {
            if let Some(theme_id) = session.theme_id.clone() {
                self.crossfade_to_theme(&session, &theme_id);
                // A manual change restarts the rotation clock.
                self.cycle.reset(session_id);
            }
        }

        // Live preset change: apply in place, never recreating the mixer.
        // Streams are prepared before fades inside the mixer reconcile.
        if session.is_playing && (preset_changed || (theme_changed && session.preset_id.is_some()))
        {
            if let (Some(theme_id), Some(preset_id)) =
                (session.theme_id.clone(), session.preset_id.clone())
            {
                if let Err(err) = self.library.apply_preset(&theme_id, &preset_id) {
                    log::warn!("[Session] Preset apply failed: {err}");
                }
            }
        }

        // Live volume change.
        if session.is_playing && update.volume.is_some() {
            self.apply_volume(&session).await;
        }

        // Live speaker delta.
        let (added, removed) = if session.is_playing && speakers_changing {
            let new_speakers: HashSet<String> =
                self.resolved_speakers(&session).into_iter().collect();
            let added: Vec<String> = new_speakers.difference(&old_speakers).cloned().collect();
            let removed: Vec<String> = old_speakers.difference(&new_speakers).cloned().collect();
            if !added.is_empty() || !removed.is_empty() {
                log::info!(
                    "[Session] '{}' speakers: +{} -{}",
                    session.name,
                    added.len(),
                    removed.len()
                );
                self.apply_speaker_changes(&session, &added, &removed).await;
            }
            (added, removed)
        } else {
            (Vec::new(), Vec::new())
        };

        log::info!("[Session] Updated '{}'", session.name);
        Ok(SessionUpdateOutcome {
            session,
            added_speakers: added,
            removed_speakers: removed,
            persist_warning,
        })
    }

    /// Updates only the cycle configuration.
    pub fn update_cycle_config(
        &self,
        session_id: &str,
        enabled: Option<bool>,
        interval_minutes: Option<u32>,
        randomize: Option<bool>,
        theme_ids: Option<Vec<String>>,
    ) -> SonoriumResult<Session> {
        let (updated, persist) = self.store.mutate(|state| {
            let session = state.sessions.get_mut(session_id)?;
            let config = &mut session.cycle_config;
            if let Some(enabled) = enabled {
                config.enabled = enabled;
            }
            if let Some(interval) = interval_minutes {
                config.interval_minutes = interval.max(1);
            }
            if let Some(randomize) = randomize {
                config.randomize = randomize;
            }
            if let Some(theme_ids) = theme_ids {
                config.theme_ids = theme_ids;
            }
            Some(session.clone())
        });
        let Some(session) = updated else {
            return Err(SonoriumError::NotFound(format!("session {session_id}")));
        };
        if let Err(err) = persist {
            log::warn!("[Session] Cycle config persisted with error: {err}");
        }
        if enabled == Some(true) {
            self.cycle.reset(session_id);
        }
        log::info!(
            "[Session] Cycle config for '{}': enabled={}, every {}m",
            session.name,
            session.cycle_config.enabled,
            session.cycle_config.interval_minutes
        );
        Ok(session)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Playback control
    // ─────────────────────────────────────────────────────────────────────

    /// Starts playback: binds a channel, assigns the theme, fans out to
    /// speakers in the background.
    pub async fn play(&self, session_id: &str) -> SonoriumResult<Session> {
        let session = self.require(session_id)?;
        let Some(theme_id) = session.theme_id.clone() else {
            return Err(SonoriumError::StateConflict(
                "session has no theme selected".into(),
            ));
        };
        let speakers = self.resolved_speakers(&session);
        if speakers.is_empty() {
            return Err(SonoriumError::StateConflict(
                "session has no speakers".into(),
            ));
        }

        let theme = self.library.require(&theme_id)?;
        let channel = self.assign_channel(session_id)?;

        // Session presets apply before the streams spin up.
        if let Some(preset_id) = &session.preset_id {
            if let Err(err) = theme.apply_preset(preset_id) {
                log::warn!("[Session] Preset '{preset_id}' not applied: {err}");
            }
        }
        channel.set_theme(Arc::clone(&theme));
        log::info!(
            "[Session] Channel {}: theme '{}'",
            channel.id(),
            theme.name()
        );

        let (session, persist) = self.store.mutate(|state| {
            let session = state.sessions.get_mut(session_id)?;
            session.is_playing = true;
            session.mark_played();
            Some(session.clone())
        });
        let Some(session) = session else {
            return Err(SonoriumError::NotFound(format!("session {session_id}")));
        };
        if let Err(err) = persist {
            log::warn!("[Session] Play persisted with error: {err}");
        }

        self.apply_channel_gain(&session, &channel);

        if session.cycle_config.enabled {
            self.cycle.reset(session_id);
            log::info!(
                "[Session] Cycle enabled: every {}m",
                session.cycle_config.interval_minutes
            );
        }

        // Fire-and-forget speaker fan-out; a stop arriving mid-flight wins
        // by issuing its own commands afterwards.
        let stream_url = self.stream_url(&session);
        let media = Arc::clone(&self.media);
        let local_player = Arc::clone(&self.local_player);
        let volume_level = session.volume as f32 / 100.0;
        let channel_id = channel.id();
        let session_name = session.name.clone();
        tokio::spawn(async move {
            let (local, network): (Vec<String>, Vec<String>) = speakers
                .into_iter()
                .partition(|s| s == LOCAL_SPEAKER_ID);
            if !local.is_empty() {
                local_player.play(&stream_url, channel_id);
                local_player.set_volume(volume_level);
            }
            if network.is_empty() {
                return;
            }
            let results = match tokio::time::timeout(
                MEDIA_COMMAND_TIMEOUT,
                media.play_media_multi(&network, &stream_url),
            )
            .await
            {
                Ok(results) => results,
                Err(_) => {
                    log::warn!("[Session] play_media timed out for '{session_name}'");
                    return;
                }
            };
            let _ = tokio::time::timeout(
                MEDIA_COMMAND_TIMEOUT,
                media.set_volume_multi(&network, volume_level),
            )
            .await;
            let ok = results.values().filter(|&&v| v).count();
            log::info!(
                "[Session] Started playback on {}/{} speaker(s) for '{}'",
                ok,
                results.len(),
                session_name
            );
        });

        Ok(session)
    }

    /// Pauses playback. The channel stays bound for resume.
    pub async fn pause(&self, session_id: &str) -> SonoriumResult<Session> {
        let session = self.require(session_id)?;
        let speakers = self.resolved_speakers(&session);
        let (local, network): (Vec<String>, Vec<String>) = speakers
            .into_iter()
            .partition(|s| s == LOCAL_SPEAKER_ID);
        if !local.is_empty() {
            self.local_player.stop();
        }
        if !network.is_empty()
            && tokio::time::timeout(MEDIA_COMMAND_TIMEOUT, self.media.pause_multi(&network))
                .await
                .is_err()
        {
            log::warn!("[Session] pause timed out for '{}'", session.name);
        }

        let session = self.mark_stopped(session_id)?;
        log::info!("[Session] Paused '{}'", session.name);
        Ok(session)
    }

    /// Stops playback and releases the channel back to the pool.
    pub async fn stop(&self, session_id: &str) -> SonoriumResult<Session> {
        let session = self.require(session_id)?;
        let speakers = self.resolved_speakers(&session);
        let (local, network): (Vec<String>, Vec<String>) = speakers
            .into_iter()
            .partition(|s| s == LOCAL_SPEAKER_ID);
        if !local.is_empty() {
            self.local_player.stop();
        }
        if !network.is_empty()
            && tokio::time::timeout(MEDIA_COMMAND_TIMEOUT, self.media.stop_multi(&network))
                .await
                .is_err()
        {
            log::warn!("[Session] stop timed out for '{}'", session.name);
        }

        self.release_channel(session_id);
        let session = self.mark_stopped(session_id)?;
        log::info!("[Session] Stopped '{}'", session.name);
        Ok(session)
    }

    /// Stops every playing session, returning how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let playing: Vec<String> = self.store.read(|state| {
            state
                .sessions
                .values()
                .filter(|s| s.is_playing)
                .map(|s| s.id.clone())
                .collect()
        });
        let mut count = 0;
        for session_id in playing {
            if self.stop(&session_id).await.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Sets the session volume, propagating to the channel mix and every
    /// speaker.
    pub async fn set_volume(&self, session_id: &str, volume: u8) -> SonoriumResult<Session> {
        let (updated, persist) = self.store.mutate(|state| {
            let session = state.sessions.get_mut(session_id)?;
            session.volume = volume.min(100);
            Some(session.clone())
        });
        let Some(session) = updated else {
            return Err(SonoriumError::NotFound(format!("session {session_id}")));
        };
        if let Err(err) = persist {
            log::warn!("[Session] Volume persisted with error: {err}");
        }

        if session.is_playing {
            self.apply_volume(&session).await;
        }
        log::info!("[Session] Volume for '{}' set to {}%", session.name, session.volume);
        Ok(session)
    }

    /// Sets the global master volume applied on top of session volumes.
    pub fn set_master_volume(&self, level: f32) -> SonoriumResult<()> {
        let level = level.clamp(0.0, 1.0);
        let (_, persist) = self.store.mutate(|state| {
            state.settings.master_volume = level;
        });

        for entry in self.session_channels.iter() {
            if let (Some(session), Some(channel)) =
                (self.get(entry.key()), self.channels.get_channel(*entry.value()))
            {
                self.apply_channel_gain(&session, &channel);
            }
        }
        persist
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channel binding
    // ─────────────────────────────────────────────────────────────────────

    /// The channel bound to a session, if any.
    pub fn session_channel(&self, session_id: &str) -> Option<u32> {
        self.session_channels.get(session_id).map(|r| *r.value())
    }

    fn assign_channel(&self, session_id: &str) -> SonoriumResult<Arc<Channel>> {
        if let Some(existing) = self.session_channel(session_id) {
            if let Some(channel) = self.channels.get_channel(existing) {
                return Ok(channel);
            }
        }
        let channel = self.channels.get_available_channel().ok_or_else(|| {
            SonoriumError::StateConflict("all broadcast channels are busy".into())
        })?;
        self.session_channels
            .insert(session_id.to_string(), channel.id());
        log::info!(
            "[Session] Assigned channel {} to session {}",
            channel.id(),
            session_id
        );
        Ok(channel)
    }

    fn release_channel(&self, session_id: &str) {
        if let Some((_, channel_id)) = self.session_channels.remove(session_id) {
            if let Some(channel) = self.channels.get_channel(channel_id) {
                channel.stop();
            }
            log::info!(
                "[Session] Released channel {} from session {}",
                channel_id,
                session_id
            );
        }
    }

    fn crossfade_to_theme(&self, session: &Session, theme_id: &str) {
        let Some(channel_id) = self.session_channel(&session.id) else {
            return;
        };
        let Some(channel) = self.channels.get_channel(channel_id) else {
            return;
        };
        let Some(theme) = self.library.get(theme_id) else {
            log::warn!("[Session] Theme {theme_id} not found for crossfade");
            return;
        };
        log::info!(
            "[Session] Crossfading to '{}' on channel {}",
            theme.name(),
            channel_id
        );
        channel.set_theme(theme);
    }

    fn mark_stopped(&self, session_id: &str) -> SonoriumResult<Session> {
        let (updated, persist) = self.store.mutate(|state| {
            let session = state.sessions.get_mut(session_id)?;
            session.is_playing = false;
            Some(session.clone())
        });
        let Some(session) = updated else {
            return Err(SonoriumError::NotFound(format!("session {session_id}")));
        };
        if let Err(err) = persist {
            log::warn!("[Session] Stop persisted with error: {err}");
        }
        Ok(session)
    }

    fn apply_channel_gain(&self, session: &Session, channel: &Arc<Channel>) {
        let master = self.store.read(|state| state.settings.master_volume);
        channel
            .master_gain()
            .set(session.volume as f32 / 100.0 * master);
    }

    async fn apply_volume(&self, session: &Session) {
        if let Some(channel_id) = self.session_channel(&session.id) {
            if let Some(channel) = self.channels.get_channel(channel_id) {
                self.apply_channel_gain(session, &channel);
            }
        }
        let level = session.volume as f32 / 100.0;
        let (local, network): (Vec<String>, Vec<String>) = self
            .resolved_speakers(session)
            .into_iter()
            .partition(|s| s == LOCAL_SPEAKER_ID);
        if !local.is_empty() {
            self.local_player.set_volume(level);
        }
        if !network.is_empty()
            && tokio::time::timeout(
                MEDIA_COMMAND_TIMEOUT,
                self.media.set_volume_multi(&network, level),
            )
            .await
            .is_err()
        {
            log::warn!("[Session] set_volume timed out for '{}'", session.name);
        }
    }

    /// Applies a live speaker delta: stop removed, start added at the
    /// session's volume.
    pub async fn apply_speaker_changes(
        &self,
        session: &Session,
        added: &[String],
        removed: &[String],
    ) {
        let stream_url = self.stream_url(session);
        let level = session.volume as f32 / 100.0;

        let (local_removed, network_removed): (Vec<String>, Vec<String>) = removed
            .iter()
            .cloned()
            .partition(|s| s == LOCAL_SPEAKER_ID);
        if !local_removed.is_empty() {
            self.local_player.stop();
        }
        if !network_removed.is_empty() {
            log::info!("[Session] Stopping {} removed speaker(s)", network_removed.len());
            if tokio::time::timeout(
                MEDIA_COMMAND_TIMEOUT,
                self.media.stop_multi(&network_removed),
            )
            .await
            .is_err()
            {
                log::warn!("[Session] stop of removed speakers timed out");
            }
        }

        let (local_added, network_added): (Vec<String>, Vec<String>) = added
            .iter()
            .cloned()
            .partition(|s| s == LOCAL_SPEAKER_ID);
        if !local_added.is_empty() {
            if let Some(channel_id) = self.session_channel(&session.id) {
                self.local_player.play(&stream_url, channel_id);
                self.local_player.set_volume(level);
            }
        }
        if !network_added.is_empty() {
            log::info!("[Session] Starting {} added speaker(s)", network_added.len());
            let started = tokio::time::timeout(
                MEDIA_COMMAND_TIMEOUT,
                self.media.play_media_multi(&network_added, &stream_url),
            )
            .await;
            if started.is_err() {
                log::warn!("[Session] start of added speakers timed out");
                return;
            }
            let _ = tokio::time::timeout(
                MEDIA_COMMAND_TIMEOUT,
                self.media.set_volume_multi(&network_added, level),
            )
            .await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Speaker resolution and naming
    // ─────────────────────────────────────────────────────────────────────

    /// Resolves a session's speaker selection to concrete speaker ids.
    pub fn resolved_speakers(&self, session: &Session) -> Vec<String> {
        if let Some(group_id) = &session.speaker_group_id {
            if let Some(group) = self
                .store
                .read(|state| state.speaker_groups.get(group_id).cloned())
            {
                return resolve_selection(self.topology.as_ref(), &group.selection);
            }
        }
        if let Some(selection) = &session.adhoc_selection {
            return resolve_selection(self.topology.as_ref(), selection);
        }
        Vec::new()
    }

    /// The stream URL speakers fetch for this session.
    pub fn stream_url(&self, session: &Session) -> String {
        if let Some(channel_id) = self.session_channel(&session.id) {
            return self.network.channel_stream_url(channel_id);
        }
        // Legacy one-off stream when no channel is bound.
        let theme = session.theme_id.clone().unwrap_or_default();
        self.network.theme_stream_url(&theme)
    }

    /// Auto-names a session from its speaker selection.
    ///
    /// Priority: saved group, single floor, single area, multiple areas,
    /// single speaker, then a speaker count.
    pub fn generate_session_name(
        &self,
        selection: Option<&SpeakerSelection>,
        group: Option<&SpeakerGroup>,
    ) -> (String, NameSource) {
        if let Some(group) = group {
            return (group.name.clone(), NameSource::AutoGroup);
        }
        let Some(selection) = selection else {
            return ("New Session".into(), NameSource::Custom);
        };

        if selection.include_floors.len() == 1
            && selection.include_areas.is_empty()
            && selection.include_speakers.is_empty()
        {
            return (
                self.topology.floor_name(&selection.include_floors[0]),
                NameSource::AutoFloor,
            );
        }

        if selection.include_areas.len() == 1
            && selection.include_floors.is_empty()
            && selection.include_speakers.is_empty()
        {
            return (
                self.topology.area_name(&selection.include_areas[0]),
                NameSource::AutoArea,
            );
        }

        if !selection.include_areas.is_empty() && selection.include_floors.is_empty() {
            let names: Vec<String> = selection
                .include_areas
                .iter()
                .map(|a| self.topology.area_name(a))
                .collect();
            if names.len() == 2 {
                return (format!("{} & {}", names[0], names[1]), NameSource::AutoArea);
            }
            if names.len() > 2 {
                return (
                    format!("{} + {} more", names[0], names.len() - 1),
                    NameSource::AutoArea,
                );
            }
        }

        if selection.include_speakers.len() == 1
            && selection.include_floors.is_empty()
            && selection.include_areas.is_empty()
        {
            return (
                self.topology.speaker_name(&selection.include_speakers[0]),
                NameSource::AutoArea,
            );
        }

        let resolved = resolve_selection(self.topology.as_ref(), selection);
        (format!("{} speakers", resolved.len()), NameSource::AutoArea)
    }

    /// Human-readable speaker summary ("3 speakers (1 excluded)").
    pub fn speaker_summary(&self, session: &Session) -> String {
        let speakers = self.resolved_speakers(session);
        if speakers.is_empty() {
            return "No speakers".into();
        }
        if speakers.len() == 1 {
            return self.topology.speaker_name(&speakers[0]);
        }
        let excluded = if let Some(group_id) = &session.speaker_group_id {
            self.store.read(|state| {
                state
                    .speaker_groups
                    .get(group_id)
                    .map(|g| g.selection.excluded_count())
                    .unwrap_or(0)
            })
        } else {
            session
                .adhoc_selection
                .as_ref()
                .map(|s| s.excluded_count())
                .unwrap_or(0)
        };
        if excluded > 0 {
            format!("{} speakers ({} excluded)", speakers.len(), excluded)
        } else {
            format!("{} speakers", speakers.len())
        }
    }

    /// The theme library this manager plays from.
    pub fn library(&self) -> &Arc<ThemeLibrary> {
        &self.library
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::speakers::{test_topology, NullMediaControl};
    use crate::test_fixtures::{constant_wav, write_wav};
    use std::path::Path;

    struct Fixture {
        manager: Arc<SessionManager>,
        channels: Arc<ChannelManager>,
        library: Arc<ThemeLibrary>,
        _themes_dir: tempfile::TempDir,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.channels.shutdown_all();
        }
    }

    fn make_theme(root: &Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        write_wav(
            &dir.join("bed.wav"),
            &constant_wav(5000, SAMPLE_RATE as usize),
            SAMPLE_RATE,
            1,
        );
    }

    fn fixture(channel_count: u32) -> Fixture {
        let themes_dir = tempfile::tempdir().unwrap();
        make_theme(themes_dir.path(), "forest");
        make_theme(themes_dir.path(), "tavern");

        let library = Arc::new(ThemeLibrary::new(themes_dir.path().to_path_buf()));
        let channels = Arc::new(ChannelManager::new(channel_count, 10, 1.0));
        let manager = Arc::new(SessionManager::new(
            Arc::new(StateStore::ephemeral()),
            Arc::new(test_topology()),
            Arc::new(NullMediaControl),
            Arc::clone(&channels),
            Arc::clone(&library),
            Arc::new(LocalStreamPlayer::new()),
            NetworkContext::loopback(),
            Arc::new(CycleManager::new()),
            20,
        ));
        Fixture {
            manager,
            channels,
            library,
            _themes_dir: themes_dir,
        }
    }

    fn theme_id(fixture: &Fixture, name: &str) -> String {
        fixture
            .library
            .list()
            .into_iter()
            .find(|t| t.name() == name)
            .unwrap()
            .id()
            .to_string()
    }

    fn kitchen_selection() -> SpeakerSelection {
        SpeakerSelection {
            include_areas: vec!["kitchen".into()],
            ..Default::default()
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Auto-naming
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn auto_name_single_floor() {
        let fixture = fixture(2);
        let selection = SpeakerSelection {
            include_floors: vec!["floor_1".into()],
            ..Default::default()
        };
        let (name, source) = fixture.manager.generate_session_name(Some(&selection), None);
        assert_eq!(name, "Ground Floor");
        assert_eq!(source, NameSource::AutoFloor);
    }

    #[test]
    fn auto_name_single_area() {
        let fixture = fixture(2);
        let (name, source) = fixture
            .manager
            .generate_session_name(Some(&kitchen_selection()), None);
        assert_eq!(name, "Kitchen");
        assert_eq!(source, NameSource::AutoArea);
    }

    #[test]
    fn auto_name_two_areas_joined_with_ampersand() {
        let fixture = fixture(2);
        let selection = SpeakerSelection {
            include_areas: vec!["kitchen".into(), "living".into()],
            ..Default::default()
        };
        let (name, _) = fixture.manager.generate_session_name(Some(&selection), None);
        assert_eq!(name, "Kitchen & Living Room");
    }

    #[test]
    fn auto_name_many_areas_counts_the_rest() {
        let fixture = fixture(2);
        let selection = SpeakerSelection {
            include_areas: vec!["kitchen".into(), "living".into(), "bedroom".into()],
            ..Default::default()
        };
        let (name, _) = fixture.manager.generate_session_name(Some(&selection), None);
        assert_eq!(name, "Kitchen + 2 more");
    }

    #[test]
    fn auto_name_single_speaker() {
        let fixture = fixture(2);
        let selection = SpeakerSelection {
            include_speakers: vec!["sp_kitchen".into()],
            ..Default::default()
        };
        let (name, _) = fixture.manager.generate_session_name(Some(&selection), None);
        assert_eq!(name, "Kitchen Echo");
    }

    #[test]
    fn auto_name_fallback_counts_speakers() {
        let fixture = fixture(2);
        let selection = SpeakerSelection {
            include_floors: vec!["floor_1".into()],
            include_speakers: vec!["sp_bedroom".into()],
            ..Default::default()
        };
        let (name, _) = fixture.manager.generate_session_name(Some(&selection), None);
        assert_eq!(name, "4 speakers");
    }

    // ─────────────────────────────────────────────────────────────────────
    // CRUD and limits
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn create_uses_default_volume_and_cycle() {
        let fixture = fixture(2);
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                adhoc_selection: Some(kitchen_selection()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(session.volume, 50);
        assert!(!session.cycle_config.enabled);
        assert_eq!(session.name, "Kitchen");
    }

    #[test]
    fn create_respects_session_limit() {
        let fixture = fixture(2);
        for _ in 0..20 {
            fixture
                .manager
                .create(CreateSessionRequest::default())
                .unwrap();
        }
        let err = fixture.manager.create(CreateSessionRequest::default());
        assert!(matches!(err, Err(SonoriumError::LimitExceeded(_))));
    }

    #[tokio::test]
    async fn delete_releases_channel() {
        let fixture = fixture(1);
        let forest = theme_id(&fixture, "forest");
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(forest),
                adhoc_selection: Some(kitchen_selection()),
                ..Default::default()
            })
            .unwrap();
        fixture.manager.play(&session.id).await.unwrap();
        assert!(fixture.channels.get_available_channel().is_none());

        fixture.manager.delete(&session.id).unwrap();
        assert!(fixture.channels.get_available_channel().is_some());
        assert!(fixture.manager.get(&session.id).is_none());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn play_requires_a_theme() {
        let fixture = fixture(2);
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                adhoc_selection: Some(kitchen_selection()),
                ..Default::default()
            })
            .unwrap();
        let err = fixture.manager.play(&session.id).await;
        assert!(matches!(err, Err(SonoriumError::StateConflict(_))));
    }

    #[tokio::test]
    async fn play_binds_lowest_idle_channel_and_sets_gain() {
        let fixture = fixture(2);
        let forest = theme_id(&fixture, "forest");
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(forest.clone()),
                adhoc_selection: Some(kitchen_selection()),
                volume: Some(40),
                ..Default::default()
            })
            .unwrap();

        let played = fixture.manager.play(&session.id).await.unwrap();
        assert!(played.is_playing);
        assert!(played.last_played_at.is_some());
        assert_eq!(fixture.manager.session_channel(&session.id), Some(1));

        let channel = fixture.channels.get_channel(1).unwrap();
        assert_eq!(channel.current_theme().unwrap().id(), forest);
        assert!((channel.master_gain().get() - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn play_fails_when_all_channels_busy() {
        let fixture = fixture(1);
        let forest = theme_id(&fixture, "forest");
        let tavern = theme_id(&fixture, "tavern");

        let first = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(forest),
                adhoc_selection: Some(kitchen_selection()),
                ..Default::default()
            })
            .unwrap();
        fixture.manager.play(&first.id).await.unwrap();

        let second = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(tavern),
                adhoc_selection: Some(kitchen_selection()),
                ..Default::default()
            })
            .unwrap();
        let err = fixture.manager.play(&second.id).await;
        assert!(matches!(err, Err(SonoriumError::StateConflict(_))));
    }

    #[tokio::test]
    async fn stop_releases_channel_but_pause_keeps_it() {
        let fixture = fixture(1);
        let forest = theme_id(&fixture, "forest");
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(forest),
                adhoc_selection: Some(kitchen_selection()),
                ..Default::default()
            })
            .unwrap();

        fixture.manager.play(&session.id).await.unwrap();
        fixture.manager.pause(&session.id).await.unwrap();
        assert_eq!(
            fixture.manager.session_channel(&session.id),
            Some(1),
            "pause keeps the channel bound"
        );
        assert!(!fixture.manager.get(&session.id).unwrap().is_playing);

        fixture.manager.play(&session.id).await.unwrap();
        fixture.manager.stop(&session.id).await.unwrap();
        assert_eq!(fixture.manager.session_channel(&session.id), None);
        assert!(fixture.channels.get_available_channel().is_some());
    }

    #[tokio::test]
    async fn live_theme_change_swaps_channel_theme() {
        let fixture = fixture(1);
        let forest = theme_id(&fixture, "forest");
        let tavern = theme_id(&fixture, "tavern");
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(forest),
                adhoc_selection: Some(kitchen_selection()),
                ..Default::default()
            })
            .unwrap();
        fixture.manager.play(&session.id).await.unwrap();

        let outcome = fixture
            .manager
            .update(
                &session.id,
                SessionUpdate {
                    theme_id: Some(tavern.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.session.theme_id.as_deref(), Some(tavern.as_str()));

        let channel = fixture.channels.get_channel(1).unwrap();
        assert_eq!(channel.current_theme().unwrap().id(), tavern);
    }

    #[tokio::test]
    async fn speaker_update_reports_delta() {
        let fixture = fixture(1);
        let forest = theme_id(&fixture, "forest");
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(forest),
                adhoc_selection: Some(kitchen_selection()),
                ..Default::default()
            })
            .unwrap();
        fixture.manager.play(&session.id).await.unwrap();

        let outcome = fixture
            .manager
            .update(
                &session.id,
                SessionUpdate {
                    adhoc_selection: Some(SpeakerSelection {
                        include_areas: vec!["kitchen".into(), "living".into()],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut added = outcome.added_speakers.clone();
        added.sort();
        assert_eq!(added, vec!["sp_living_l", "sp_living_r"]);
        assert!(outcome.removed_speakers.is_empty());
        // Auto-name follows the new selection.
        assert_eq!(outcome.session.name, "Kitchen & Living Room");
    }

    #[tokio::test]
    async fn set_volume_updates_channel_gain() {
        let fixture = fixture(1);
        let forest = theme_id(&fixture, "forest");
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(forest),
                adhoc_selection: Some(kitchen_selection()),
                volume: Some(80),
                ..Default::default()
            })
            .unwrap();
        fixture.manager.play(&session.id).await.unwrap();

        fixture.manager.set_volume(&session.id, 20).await.unwrap();
        let channel = fixture.channels.get_channel(1).unwrap();
        assert!((channel.master_gain().get() - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn master_volume_scales_every_bound_channel() {
        let fixture = fixture(2);
        let forest = theme_id(&fixture, "forest");
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                theme_id: Some(forest),
                adhoc_selection: Some(kitchen_selection()),
                volume: Some(50),
                ..Default::default()
            })
            .unwrap();
        fixture.manager.play(&session.id).await.unwrap();

        fixture.manager.set_master_volume(0.5).unwrap();
        let channel = fixture.channels.get_channel(1).unwrap();
        assert!((channel.master_gain().get() - 0.25).abs() < 1e-6);
    }

    #[tokio::test]
    async fn stop_all_stops_every_playing_session() {
        let fixture = fixture(2);
        let forest = theme_id(&fixture, "forest");
        let tavern = theme_id(&fixture, "tavern");
        for theme in [forest, tavern] {
            let session = fixture
                .manager
                .create(CreateSessionRequest {
                    theme_id: Some(theme),
                    adhoc_selection: Some(kitchen_selection()),
                    ..Default::default()
                })
                .unwrap();
            fixture.manager.play(&session.id).await.unwrap();
        }
        assert_eq!(fixture.manager.stop_all().await, 2);
        assert_eq!(fixture.channels.active_count(), 0);
    }

    #[test]
    fn speaker_summary_reports_exclusions() {
        let fixture = fixture(1);
        let session = fixture
            .manager
            .create(CreateSessionRequest {
                adhoc_selection: Some(SpeakerSelection {
                    include_floors: vec!["floor_1".into()],
                    exclude_speakers: vec!["sp_living_r".into()],
                    ..Default::default()
                }),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            fixture.manager.speaker_summary(&session),
            "2 speakers (1 excluded)"
        );
    }
}
