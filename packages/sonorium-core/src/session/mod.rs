//! Session data model.
//!
//! A session binds a theme (plus optional preset) to a set of speakers and a
//! volume level. Sessions are persisted in the state file and resolved to
//! concrete speaker lists through the externally supplied topology.

pub mod cycle;
pub mod manager;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// How a session got its display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    /// User-provided name; never overwritten by auto-naming.
    Custom,
    /// Named after a single included floor.
    AutoFloor,
    /// Named after included areas or speakers.
    AutoArea,
    /// Named after a saved speaker group.
    AutoGroup,
}

/// Include/exclude sets describing a speaker selection.
///
/// Resolution is the union of the includes minus the union of the excludes,
/// computed against the external topology (floors → areas → speakers).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerSelection {
    #[serde(default)]
    pub include_floors: Vec<String>,
    #[serde(default)]
    pub include_areas: Vec<String>,
    #[serde(default)]
    pub include_speakers: Vec<String>,
    #[serde(default)]
    pub exclude_areas: Vec<String>,
    #[serde(default)]
    pub exclude_speakers: Vec<String>,
}

impl SpeakerSelection {
    /// Total number of exclusion entries, for summary strings.
    pub fn excluded_count(&self) -> usize {
        self.exclude_areas.len() + self.exclude_speakers.len()
    }
}

/// A saved, named speaker selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerGroup {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub selection: SpeakerSelection,
}

/// Per-session theme rotation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    pub enabled: bool,
    /// Minimum 1; clamped on update.
    pub interval_minutes: u32,
    pub randomize: bool,
    /// Empty means "rotate through all available themes".
    #[serde(default)]
    pub theme_ids: Vec<String>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 15,
            randomize: false,
            theme_ids: Vec::new(),
        }
    }
}

/// A playback session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Short opaque id (first 8 chars of a v4 UUID).
    pub id: String,
    pub name: String,
    pub name_source: NameSource,
    pub theme_id: Option<String>,
    #[serde(default)]
    pub preset_id: Option<String>,
    pub speaker_group_id: Option<String>,
    pub adhoc_selection: Option<SpeakerSelection>,
    /// 0..=100.
    pub volume: u8,
    pub is_playing: bool,
    pub cycle_config: CycleConfig,
    /// Unix seconds.
    pub created_at: u64,
    #[serde(default)]
    pub last_played_at: Option<u64>,
}

impl Session {
    /// Records that playback started now.
    pub fn mark_played(&mut self) {
        self.last_played_at = Some(now_secs());
    }
}

/// Current unix time in whole seconds.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_config_default_is_disabled() {
        let config = CycleConfig::default();
        assert!(!config.enabled);
        assert!(config.theme_ids.is_empty());
    }

    #[test]
    fn name_source_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&NameSource::AutoFloor).unwrap(),
            "\"auto_floor\""
        );
        assert_eq!(
            serde_json::to_string(&NameSource::Custom).unwrap(),
            "\"custom\""
        );
    }

    #[test]
    fn selection_deserializes_with_missing_fields() {
        let selection: SpeakerSelection =
            serde_json::from_str(r#"{"include_areas": ["kitchen"]}"#).unwrap();
        assert_eq!(selection.include_areas, vec!["kitchen"]);
        assert!(selection.include_floors.is_empty());
        assert_eq!(selection.excluded_count(), 0);
    }

    #[test]
    fn session_round_trips_through_json() {
        let session = Session {
            id: "abc12345".into(),
            name: "Kitchen".into(),
            name_source: NameSource::AutoArea,
            theme_id: Some("forest".into()),
            preset_id: None,
            speaker_group_id: None,
            adhoc_selection: Some(SpeakerSelection {
                include_areas: vec!["kitchen".into()],
                ..Default::default()
            }),
            volume: 40,
            is_playing: false,
            cycle_config: CycleConfig::default(),
            created_at: 1_700_000_000,
            last_played_at: None,
        };
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.theme_id, session.theme_id);
        assert_eq!(back.volume, 40);
    }
}
