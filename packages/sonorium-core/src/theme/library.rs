//! Theme discovery and persistence.
//!
//! Scans a themes directory where every subdirectory holding audio files is
//! a theme. Exposes the control-surface operations the REST layer calls:
//! listing, refreshing, per-track field edits, and preset CRUD.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use super::track::PlaybackMode;
use super::{Preset, Theme};
use crate::error::{SonoriumError, SonoriumResult};

/// One editable per-track field, as named by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackField {
    Presence(f32),
    Volume(f32),
    Muted(bool),
    PlaybackMode(PlaybackMode),
    SeamlessLoop(bool),
    Exclusive(bool),
}

/// Owner of all loaded themes.
pub struct ThemeLibrary {
    themes_dir: PathBuf,
    themes: RwLock<Vec<Arc<Theme>>>,
}

impl ThemeLibrary {
    /// Creates a library and performs the initial scan.
    pub fn new(themes_dir: PathBuf) -> Self {
        let library = Self {
            themes_dir,
            themes: RwLock::new(Vec::new()),
        };
        library.refresh();
        library
    }

    /// Rescans the themes directory, replacing the loaded set.
    ///
    /// Sessions holding a previous `Arc<Theme>` keep playing it; they pick
    /// up the fresh instance on their next theme assignment.
    pub fn refresh(&self) {
        let mut themes: Vec<Arc<Theme>> = Vec::new();
        let entries = match std::fs::read_dir(&self.themes_dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!(
                    "[Library] Cannot read themes dir {}: {}",
                    self.themes_dir.display(),
                    err
                );
                *self.themes.write() = themes;
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match Theme::load(&path) {
                Ok(theme) => {
                    if theme.tracks().is_empty() {
                        log::debug!("[Library] Skipping empty theme dir {}", path.display());
                        continue;
                    }
                    themes.push(Arc::new(theme));
                }
                Err(err) => {
                    log::warn!("[Library] Failed to load theme {}: {}", path.display(), err);
                }
            }
        }
        themes.sort_by_key(|t| t.name());
        log::info!(
            "[Library] Loaded {} theme(s) from {}",
            themes.len(),
            self.themes_dir.display()
        );
        *self.themes.write() = themes;
    }

    /// All loaded themes, sorted by name.
    pub fn list(&self) -> Vec<Arc<Theme>> {
        self.themes.read().clone()
    }

    /// Looks up a theme by its persistent id.
    pub fn get(&self, theme_id: &str) -> Option<Arc<Theme>> {
        self.themes
            .read()
            .iter()
            .find(|t| t.id() == theme_id)
            .cloned()
    }

    /// Like [`get`](Self::get) but with a typed error for control paths.
    pub fn require(&self, theme_id: &str) -> SonoriumResult<Arc<Theme>> {
        self.get(theme_id)
            .ok_or_else(|| SonoriumError::NotFound(format!("theme {theme_id}")))
    }

    /// Sets one track field and persists the theme metadata.
    ///
    /// The in-memory change always lands; a failed metadata write surfaces
    /// as a soft persist error.
    pub fn set_track_field(
        &self,
        theme_id: &str,
        track_name: &str,
        field: TrackField,
    ) -> SonoriumResult<()> {
        let theme = self.require(theme_id)?;
        let instance = theme
            .track(track_name)
            .ok_or_else(|| SonoriumError::NotFound(format!("track {track_name}")))?;

        match field {
            TrackField::Presence(v) => instance.set_presence(v),
            TrackField::Volume(v) => instance.set_volume(v),
            TrackField::Muted(muted) => instance.set_enabled(!muted),
            TrackField::PlaybackMode(mode) => instance.set_playback_mode(mode),
            TrackField::SeamlessLoop(v) => instance.set_crossfade_enabled(v),
            TrackField::Exclusive(v) => instance.set_exclusive(v),
        }
        theme.persist_track_settings(track_name)
    }

    /// Applies a preset to a theme's live instances.
    pub fn apply_preset(&self, theme_id: &str, preset_id: &str) -> SonoriumResult<()> {
        self.require(theme_id)?.apply_preset(preset_id)
    }

    /// Creates a preset snapshotting the theme's current track settings.
    ///
    /// The first preset of a theme becomes the default.
    pub fn create_preset(&self, theme_id: &str, name: &str) -> SonoriumResult<String> {
        let theme = self.require(theme_id)?;
        let preset_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let tracks = theme
            .tracks()
            .iter()
            .map(|t| (t.name().to_string(), t.settings()))
            .collect();
        let id = preset_id.clone();
        theme.update_metadata(move |metadata| {
            let is_default = metadata.presets.is_empty();
            metadata.presets.insert(
                id,
                Preset {
                    name: name.to_string(),
                    is_default,
                    tracks,
                },
            );
        })?;
        Ok(preset_id)
    }

    /// Deletes a preset. If it was the default, the first remaining preset
    /// is promoted.
    pub fn delete_preset(&self, theme_id: &str, preset_id: &str) -> SonoriumResult<()> {
        let theme = self.require(theme_id)?;
        let preset_id_owned = preset_id.to_string();
        let found = theme.update_metadata(move |metadata| {
            let Some(removed) = metadata.presets.remove(&preset_id_owned) else {
                return false;
            };
            if removed.is_default {
                if let Some(first) = metadata.presets.values_mut().next() {
                    first.is_default = true;
                }
            }
            true
        })?;
        if !found {
            return Err(SonoriumError::NotFound(format!("preset {preset_id}")));
        }
        Ok(())
    }

    /// Marks one preset as the default, clearing any other default.
    pub fn set_default_preset(&self, theme_id: &str, preset_id: &str) -> SonoriumResult<()> {
        let theme = self.require(theme_id)?;
        let preset_id_owned = preset_id.to_string();
        let found = theme.update_metadata(move |metadata| {
            if !metadata.presets.contains_key(&preset_id_owned) {
                return false;
            }
            for (id, preset) in metadata.presets.iter_mut() {
                preset.is_default = *id == preset_id_owned;
            }
            true
        })?;
        if !found {
            return Err(SonoriumError::NotFound(format!("preset {preset_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::test_fixtures::{sine_wav, write_wav};
    use std::path::Path;

    fn make_theme(root: &Path, name: &str, tracks: &[&str]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for track in tracks {
            write_wav(
                &dir.join(track),
                &sine_wav(SAMPLE_RATE, 440, 1.0),
                SAMPLE_RATE,
                1,
            );
        }
    }

    #[test]
    fn scan_finds_theme_directories() {
        let root = tempfile::tempdir().unwrap();
        make_theme(root.path(), "forest", &["wind.wav"]);
        make_theme(root.path(), "tavern", &["chatter.wav", "fire.wav"]);

        let library = ThemeLibrary::new(root.path().to_path_buf());
        let names: Vec<String> = library.list().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["forest", "tavern"]);
    }

    #[test]
    fn theme_id_survives_folder_rename() {
        let root = tempfile::tempdir().unwrap();
        make_theme(root.path(), "forest", &["wind.wav"]);

        let library = ThemeLibrary::new(root.path().to_path_buf());
        let id = library.list()[0].id().to_string();

        std::fs::rename(root.path().join("forest"), root.path().join("woods")).unwrap();
        library.refresh();

        let theme = library.get(&id).expect("theme should keep its id");
        assert_eq!(theme.name(), "forest", "display name comes from metadata");
    }

    #[test]
    fn set_track_field_updates_instance_and_persists() {
        let root = tempfile::tempdir().unwrap();
        make_theme(root.path(), "forest", &["wind.wav"]);

        let library = ThemeLibrary::new(root.path().to_path_buf());
        let id = library.list()[0].id().to_string();
        library
            .set_track_field(&id, "wind", TrackField::Presence(0.3))
            .unwrap();
        library
            .set_track_field(&id, "wind", TrackField::Exclusive(true))
            .unwrap();

        library.refresh();
        let theme = library.get(&id).unwrap();
        let track = theme.track("wind").unwrap();
        assert!((track.presence() - 0.3).abs() < f32::EPSILON);
        assert!(track.is_exclusive());
    }

    #[test]
    fn first_preset_becomes_default() {
        let root = tempfile::tempdir().unwrap();
        make_theme(root.path(), "forest", &["wind.wav"]);
        let library = ThemeLibrary::new(root.path().to_path_buf());
        let id = library.list()[0].id().to_string();

        let day = library.create_preset(&id, "Day").unwrap();
        let night = library.create_preset(&id, "Night").unwrap();

        let theme = library.get(&id).unwrap();
        assert_eq!(theme.default_preset_id(), Some(day.clone()));
        assert!(!theme.preset(&night).unwrap().is_default);

        // Presets survive a rescan from disk.
        library.refresh();
        let theme = library.get(&id).unwrap();
        assert_eq!(theme.default_preset_id(), Some(day));
        assert_eq!(theme.preset(&night).unwrap().name, "Night");
    }

    #[test]
    fn set_default_clears_previous_default() {
        let root = tempfile::tempdir().unwrap();
        make_theme(root.path(), "forest", &["wind.wav"]);
        let library = ThemeLibrary::new(root.path().to_path_buf());
        let id = library.list()[0].id().to_string();

        let day = library.create_preset(&id, "Day").unwrap();
        let night = library.create_preset(&id, "Night").unwrap();
        library.set_default_preset(&id, &night).unwrap();

        let theme = library.get(&id).unwrap();
        assert_eq!(theme.default_preset_id(), Some(night));
        assert!(!theme.preset(&day).unwrap().is_default);
    }

    #[test]
    fn deleting_default_promotes_first_remaining() {
        let root = tempfile::tempdir().unwrap();
        make_theme(root.path(), "forest", &["wind.wav"]);
        let library = ThemeLibrary::new(root.path().to_path_buf());
        let id = library.list()[0].id().to_string();

        let day = library.create_preset(&id, "Day").unwrap();
        let _night = library.create_preset(&id, "Night").unwrap();
        library.delete_preset(&id, &day).unwrap();

        let theme = library.get(&id).unwrap();
        assert!(theme.default_preset_id().is_some());
    }

    #[test]
    fn unknown_theme_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let library = ThemeLibrary::new(root.path().to_path_buf());
        assert!(matches!(
            library.apply_preset("ghost", "day"),
            Err(SonoriumError::NotFound(_))
        ));
    }
}
