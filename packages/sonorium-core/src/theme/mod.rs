//! Themes: folder-backed collections of tracks with persisted settings.
//!
//! A theme is a directory of audio files plus a `metadata.json` carrying a
//! stable UUID, display metadata, per-track settings, and presets. The UUID
//! is persisted so a theme keeps its identity across folder renames.

pub mod library;
pub mod recording;
pub mod track;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::engine::exclusion::ExclusionCoordinator;
use crate::error::{SonoriumError, SonoriumResult};
use self::recording::Recording;
use self::track::{TrackInstance, TrackSettings};

/// Default threshold below which files are treated as short (seconds).
pub const DEFAULT_SHORT_FILE_THRESHOLD: f32 = 15.0;

/// Audio file extensions included in a theme scan.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg"];

fn default_short_file_threshold() -> f32 {
    DEFAULT_SHORT_FILE_THRESHOLD
}

/// A named snapshot of per-track settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub tracks: BTreeMap<String, TrackSettings>,
}

/// The on-disk shape of a theme's `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeMetadata {
    /// Persistent theme id; survives folder renames.
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub categories: Vec<String>,
    pub is_favorite: bool,
    #[serde(default = "default_short_file_threshold")]
    pub short_file_threshold: f32,
    pub tracks: BTreeMap<String, TrackSettings>,
    pub presets: BTreeMap<String, Preset>,
}

impl Default for ThemeMetadata {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            icon: String::new(),
            categories: Vec::new(),
            is_favorite: false,
            short_file_threshold: DEFAULT_SHORT_FILE_THRESHOLD,
            tracks: BTreeMap::new(),
            presets: BTreeMap::new(),
        }
    }
}

/// A loaded theme: track instances plus mutable metadata.
pub struct Theme {
    id: String,
    dir: PathBuf,
    metadata: RwLock<ThemeMetadata>,
    tracks: Vec<Arc<TrackInstance>>,
    exclusion: Arc<ExclusionCoordinator>,
}

impl Theme {
    /// Loads a theme from a directory, creating `metadata.json` (with a
    /// fresh UUID) when absent so the id persists from first sight.
    pub fn load(dir: &Path) -> SonoriumResult<Theme> {
        let metadata_path = dir.join("metadata.json");
        let mut metadata = if metadata_path.exists() {
            let contents = fs::read_to_string(&metadata_path)
                .map_err(|e| SonoriumError::Persist(e.to_string()))?;
            serde_json::from_str::<ThemeMetadata>(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "[Library] Corrupt metadata in {} ({}), rebuilding",
                    dir.display(),
                    err
                );
                ThemeMetadata::default()
            })
        } else {
            ThemeMetadata::default()
        };

        let needs_save = !metadata_path.exists() || metadata.id.is_empty();
        if metadata.id.is_empty() {
            metadata.id = uuid::Uuid::new_v4().to_string();
        }
        if metadata.name.is_empty() {
            metadata.name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Unnamed".into());
        }

        // Track names within a theme are unique; duplicate stems across
        // extensions keep the first seen and log the rest.
        let mut tracks: Vec<Arc<TrackInstance>> = Vec::new();
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| SonoriumError::Persist(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        entries.sort();

        for path in entries {
            let recording = Arc::new(Recording::new(path));
            if tracks.iter().any(|t| t.name() == recording.name()) {
                log::warn!(
                    "[Library] Duplicate track name '{}' in {}, skipping",
                    recording.name(),
                    dir.display()
                );
                continue;
            }
            let settings = metadata
                .tracks
                .get(recording.name())
                .copied()
                .unwrap_or_default();
            tracks.push(Arc::new(TrackInstance::with_settings(recording, &settings)));
        }

        let theme = Theme {
            id: metadata.id.clone(),
            dir: dir.to_path_buf(),
            metadata: RwLock::new(metadata),
            tracks,
            exclusion: Arc::new(ExclusionCoordinator::new()),
        };

        if needs_save {
            // Persist the freshly assigned UUID immediately.
            theme.save()?;
        }
        Ok(theme)
    }

    /// The persistent theme id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The display name from metadata.
    pub fn name(&self) -> String {
        self.metadata.read().name.clone()
    }

    /// The theme directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Short-file threshold in seconds, read live so edits apply.
    pub fn short_file_threshold(&self) -> f32 {
        self.metadata.read().short_file_threshold
    }

    /// All track instances, in name order.
    pub fn tracks(&self) -> &[Arc<TrackInstance>] {
        &self.tracks
    }

    /// Looks up a track by name.
    pub fn track(&self, name: &str) -> Option<&Arc<TrackInstance>> {
        self.tracks.iter().find(|t| t.name() == name)
    }

    /// The per-theme exclusive-playback arbiter.
    pub fn exclusion(&self) -> &Arc<ExclusionCoordinator> {
        &self.exclusion
    }

    /// Snapshot of the current metadata.
    pub fn metadata(&self) -> ThemeMetadata {
        self.metadata.read().clone()
    }

    /// Looks up a preset by id.
    pub fn preset(&self, preset_id: &str) -> Option<Preset> {
        self.metadata.read().presets.get(preset_id).cloned()
    }

    /// The id of the default preset, if one is marked.
    pub fn default_preset_id(&self) -> Option<String> {
        self.metadata
            .read()
            .presets
            .iter()
            .find(|(_, p)| p.is_default)
            .map(|(id, _)| id.clone())
    }

    /// Applies a preset to the live track instances.
    ///
    /// Only tracks the preset names are touched; everything else keeps its
    /// current settings. Applying the same preset twice is a no-op the
    /// second time.
    pub fn apply_preset(&self, preset_id: &str) -> SonoriumResult<()> {
        let preset = self
            .preset(preset_id)
            .ok_or_else(|| SonoriumError::NotFound(format!("preset {preset_id}")))?;
        for (name, settings) in &preset.tracks {
            match self.track(name) {
                Some(instance) => instance.apply_settings(settings),
                None => log::warn!(
                    "[Library] Preset '{}' names unknown track '{}'",
                    preset.name,
                    name
                ),
            }
        }
        Ok(())
    }

    /// Updates the persisted settings entry for one track from its live
    /// instance, then saves. Soft-fails on write errors.
    pub fn persist_track_settings(&self, track_name: &str) -> SonoriumResult<()> {
        let Some(instance) = self.track(track_name) else {
            return Err(SonoriumError::NotFound(format!("track {track_name}")));
        };
        self.metadata
            .write()
            .tracks
            .insert(track_name.to_string(), instance.settings());
        self.save()
    }

    /// Mutates metadata through a closure, then saves.
    pub fn update_metadata<R>(&self, f: impl FnOnce(&mut ThemeMetadata) -> R) -> SonoriumResult<R> {
        let result = f(&mut self.metadata.write());
        self.save()?;
        Ok(result)
    }

    /// Writes `metadata.json` atomically (temp file, then rename).
    pub fn save(&self) -> SonoriumResult<()> {
        let json = serde_json::to_string_pretty(&*self.metadata.read())
            .map_err(|e| SonoriumError::Persist(e.to_string()))?;
        let path = self.dir.join("metadata.json");
        let tmp = self.dir.join("metadata.json.tmp");
        fs::write(&tmp, json.as_bytes())
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| {
                log::warn!("[Library] Failed to save {}: {}", path.display(), e);
                SonoriumError::Persist(e.to_string())
            })
    }
}

impl std::fmt::Debug for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Theme")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::test_fixtures::{sine_wav, write_wav};

    fn make_theme_dir(dir: &Path, tracks: &[&str]) {
        for name in tracks {
            write_wav(
                &dir.join(name),
                &sine_wav(SAMPLE_RATE, 440, 1.0),
                SAMPLE_RATE,
                1,
            );
        }
    }

    #[test]
    fn load_assigns_and_persists_uuid() {
        let dir = tempfile::tempdir().unwrap();
        make_theme_dir(dir.path(), &["wind.wav"]);

        let theme = Theme::load(dir.path()).unwrap();
        let id = theme.id().to_string();
        assert!(!id.is_empty());

        // Reloading reads the same persisted id.
        let reloaded = Theme::load(dir.path()).unwrap();
        assert_eq!(reloaded.id(), id);
    }

    #[test]
    fn load_picks_up_audio_files_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        make_theme_dir(dir.path(), &["wind.wav", "birds.wav"]);
        fs::write(dir.path().join("notes.txt"), "not audio").unwrap();

        let theme = Theme::load(dir.path()).unwrap();
        let names: Vec<&str> = theme.tracks().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["birds", "wind"]);
    }

    #[test]
    fn metadata_settings_are_applied_to_instances() {
        let dir = tempfile::tempdir().unwrap();
        make_theme_dir(dir.path(), &["wind.wav"]);
        let metadata = ThemeMetadata {
            id: "theme-1".into(),
            name: "Forest".into(),
            tracks: BTreeMap::from([(
                "wind".to_string(),
                TrackSettings {
                    presence: 0.4,
                    volume: 0.6,
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };
        fs::write(
            dir.path().join("metadata.json"),
            serde_json::to_string(&metadata).unwrap(),
        )
        .unwrap();

        let theme = Theme::load(dir.path()).unwrap();
        let track = theme.track("wind").unwrap();
        assert!((track.presence() - 0.4).abs() < f32::EPSILON);
        assert!((track.volume() - 0.6).abs() < f32::EPSILON);
        assert_eq!(theme.name(), "Forest");
    }

    #[test]
    fn apply_preset_only_touches_named_tracks() {
        let dir = tempfile::tempdir().unwrap();
        make_theme_dir(dir.path(), &["wind.wav", "birds.wav"]);

        let theme = Theme::load(dir.path()).unwrap();
        theme.track("birds").unwrap().set_volume(0.9);
        theme
            .update_metadata(|m| {
                m.presets.insert(
                    "night".into(),
                    Preset {
                        name: "Night".into(),
                        is_default: false,
                        tracks: BTreeMap::from([(
                            "wind".to_string(),
                            TrackSettings {
                                volume: 0.2,
                                ..Default::default()
                            },
                        )]),
                    },
                );
            })
            .unwrap();

        theme.apply_preset("night").unwrap();
        assert!((theme.track("wind").unwrap().volume() - 0.2).abs() < f32::EPSILON);
        // Unnamed track untouched.
        assert!((theme.track("birds").unwrap().volume() - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn apply_preset_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        make_theme_dir(dir.path(), &["wind.wav"]);
        let theme = Theme::load(dir.path()).unwrap();
        theme
            .update_metadata(|m| {
                m.presets.insert(
                    "day".into(),
                    Preset {
                        name: "Day".into(),
                        is_default: true,
                        tracks: BTreeMap::from([(
                            "wind".to_string(),
                            TrackSettings {
                                presence: 0.5,
                                ..Default::default()
                            },
                        )]),
                    },
                );
            })
            .unwrap();

        theme.apply_preset("day").unwrap();
        let first = theme.track("wind").unwrap().settings();
        theme.apply_preset("day").unwrap();
        assert_eq!(theme.track("wind").unwrap().settings(), first);
    }

    #[test]
    fn unknown_preset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        make_theme_dir(dir.path(), &["wind.wav"]);
        let theme = Theme::load(dir.path()).unwrap();
        assert!(matches!(
            theme.apply_preset("ghost"),
            Err(SonoriumError::NotFound(_))
        ));
    }
}
