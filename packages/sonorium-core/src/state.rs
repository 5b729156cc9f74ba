//! Core configuration and persistent state.
//!
//! [`Config`] carries the process-wide knobs (channel pool size, ring
//! capacity, gains, limits). [`StateStore`] owns the single JSON state file
//! holding sessions, speaker groups and settings; writes are atomic
//! (temp file + rename) and failures are soft: the in-memory mutation
//! stands and the caller gets an `io_persist` error to surface.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{SonoriumError, SonoriumResult};
use crate::session::{Session, SpeakerGroup};

/// Process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory scanned for theme folders.
    pub themes_dir: PathBuf,
    /// Persistent state file. `None` keeps state in memory only.
    pub state_file: Option<PathBuf>,
    /// Number of broadcast channels in the fixed pool.
    pub channel_count: u32,
    /// Broadcast ring capacity in chunks.
    pub ring_capacity: usize,
    /// Maximum number of sessions.
    pub max_sessions: usize,
    /// Gain applied after mixing, before clamping. The clamp doubles as a
    /// hard limiter when many loud tracks coincide.
    pub output_gain: f32,
    /// Default volume for new sessions (0..=100).
    pub default_volume: u8,
    /// Default cycle interval in minutes.
    pub default_cycle_interval: u32,
    /// Default cycle randomize flag.
    pub default_cycle_randomize: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            themes_dir: PathBuf::from("themes"),
            state_file: None,
            channel_count: 6,
            ring_capacity: 10,
            max_sessions: 20,
            output_gain: 6.0,
            default_volume: 50,
            default_cycle_interval: 15,
            default_cycle_randomize: false,
        }
    }
}

impl Config {
    /// Validates the configuration, returning a description of the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.channel_count == 0 {
            return Err("channel_count must be at least 1".into());
        }
        if self.ring_capacity == 0 {
            return Err("ring_capacity must be at least 1".into());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".into());
        }
        if self.output_gain <= 0.0 {
            return Err("output_gain must be positive".into());
        }
        if self.default_volume > 100 {
            return Err("default_volume must be 0-100".into());
        }
        Ok(())
    }
}

/// User-adjustable settings stored alongside sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub default_volume: u8,
    pub default_cycle_interval: u32,
    pub default_cycle_randomize: bool,
    /// Master volume applied across channels (0.0..=1.0).
    pub master_volume: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_volume: 50,
            default_cycle_interval: 15,
            default_cycle_randomize: false,
            master_volume: 1.0,
        }
    }
}

/// The on-disk shape of the state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentState {
    pub sessions: HashMap<String, Session>,
    pub speaker_groups: HashMap<String, SpeakerGroup>,
    pub settings: Settings,
}

/// Owner of the persistent state file.
pub struct StateStore {
    path: Option<PathBuf>,
    state: RwLock<PersistentState>,
}

impl StateStore {
    /// Loads state from `path`, falling back to defaults when the file is
    /// missing or unreadable (a corrupt state file must not prevent startup).
    pub fn load(path: &Path) -> Self {
        let state = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(state) => state,
                Err(err) => {
                    log::warn!(
                        "[State] Corrupt state file {} ({}), starting fresh",
                        path.display(),
                        err
                    );
                    PersistentState::default()
                }
            },
            Err(_) => PersistentState::default(),
        };
        Self {
            path: Some(path.to_path_buf()),
            state: RwLock::new(state),
        }
    }

    /// Creates an in-memory store that never touches disk.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            state: RwLock::new(PersistentState::default()),
        }
    }

    /// Reads state through a closure.
    pub fn read<R>(&self, f: impl FnOnce(&PersistentState) -> R) -> R {
        f(&self.state.read())
    }

    /// Mutates state through a closure, then persists.
    ///
    /// The mutation always succeeds in memory; a failed write is returned as
    /// a soft [`SonoriumError::Persist`] for the caller to surface.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut PersistentState) -> R) -> (R, SonoriumResult<()>) {
        let result = f(&mut self.state.write());
        (result, self.save())
    }

    /// Writes the state file atomically (temp file, then rename).
    pub fn save(&self) -> SonoriumResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let state = self.state.read();
            serde_json::to_string_pretty(&*state)
                .map_err(|e| SonoriumError::Persist(e.to_string()))?
        };

        let tmp = path.with_extension("json.tmp");
        let write_result = fs::write(&tmp, json.as_bytes()).and_then(|_| fs::rename(&tmp, path));
        if let Err(err) = write_result {
            log::warn!("[State] Failed to persist {}: {}", path.display(), err);
            return Err(SonoriumError::Persist(err.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CycleConfig, NameSource, SpeakerSelection};

    fn make_session(id: &str) -> Session {
        Session {
            id: id.into(),
            name: "Test".into(),
            name_source: NameSource::Custom,
            theme_id: Some("forest".into()),
            preset_id: None,
            speaker_group_id: None,
            adhoc_selection: Some(SpeakerSelection::default()),
            volume: 50,
            is_playing: false,
            cycle_config: CycleConfig::default(),
            created_at: 1,
            last_played_at: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
        assert_eq!(Config::default().channel_count, 6);
        assert_eq!(Config::default().ring_capacity, 10);
        assert_eq!(Config::default().max_sessions, 20);
    }

    #[test]
    fn zero_channels_fails_validation() {
        let config = Config {
            channel_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_load_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::load(&path);
        let (_, persist) = store.mutate(|state| {
            state.sessions.insert("s1".into(), make_session("s1"));
            state.speaker_groups.insert(
                "g1".into(),
                SpeakerGroup {
                    id: "g1".into(),
                    name: "Downstairs".into(),
                    selection: SpeakerSelection {
                        include_floors: vec!["floor_1".into()],
                        ..Default::default()
                    },
                },
            );
            state.settings.master_volume = 0.8;
        });
        persist.unwrap();

        let reloaded = StateStore::load(&path);
        reloaded.read(|state| {
            assert_eq!(state.sessions.len(), 1);
            assert_eq!(state.sessions["s1"].theme_id.as_deref(), Some("forest"));
            assert_eq!(state.speaker_groups["g1"].name, "Downstairs");
            assert!((state.settings.master_volume - 0.8).abs() < f32::EPSILON);
        });
    }

    #[test]
    fn corrupt_state_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let store = StateStore::load(&path);
        store.read(|state| assert!(state.sessions.is_empty()));
    }

    #[test]
    fn ephemeral_store_never_writes() {
        let store = StateStore::ephemeral();
        let (_, persist) = store.mutate(|state| {
            state.sessions.insert("s1".into(), make_session("s1"));
        });
        assert!(persist.is_ok());
        store.read(|state| assert_eq!(state.sessions.len(), 1));
    }
}
