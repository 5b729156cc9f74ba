//! Immutable descriptor for a single audio file.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::audio::decoder::{fallback_duration_samples, probe_duration_samples};
use crate::audio::SAMPLE_RATE;

/// One audio file on disk, with a lazily computed duration.
///
/// Created on theme scan and never mutated. The duration is probed exactly
/// once per process; a failed probe logs a warning and assumes 60 seconds.
#[derive(Debug)]
pub struct Recording {
    path: PathBuf,
    name: String,
    duration_samples: OnceLock<u64>,
}

impl Recording {
    /// Creates a descriptor for `path`. The track name is the file stem.
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            duration_samples: OnceLock::new(),
        }
    }

    /// The track name (file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path to the audio file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total duration in canonical samples, memoized.
    pub fn duration_samples(&self) -> u64 {
        *self.duration_samples.get_or_init(|| {
            match probe_duration_samples(&self.path) {
                Ok(samples) => samples,
                Err(err) => {
                    log::warn!(
                        "[Library] Could not get duration for {}: {}",
                        self.path.display(),
                        err
                    );
                    fallback_duration_samples()
                }
            }
        })
    }

    /// Total duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.duration_samples() as f64 / SAMPLE_RATE as f64
    }

    /// True when the file is shorter than the short-file threshold and
    /// should use sparse playback at reduced presence.
    pub fn is_short(&self, threshold_seconds: f32) -> bool {
        self.duration_seconds() < threshold_seconds as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{sine_wav, write_wav};

    #[test]
    fn name_is_file_stem() {
        let recording = Recording::new(PathBuf::from("/themes/forest/wind.mp3"));
        assert_eq!(recording.name(), "wind");
    }

    #[test]
    fn duration_is_probed_once_and_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, &sine_wav(SAMPLE_RATE, 440, 1.0), SAMPLE_RATE, 1);

        let recording = Recording::new(path.clone());
        assert_eq!(recording.duration_samples(), SAMPLE_RATE as u64);

        // Deleting the file does not affect the memoized value.
        std::fs::remove_file(&path).unwrap();
        assert_eq!(recording.duration_samples(), SAMPLE_RATE as u64);
    }

    #[test]
    fn missing_file_falls_back_to_sixty_seconds() {
        let recording = Recording::new(PathBuf::from("/nonexistent/ghost.wav"));
        assert_eq!(recording.duration_samples(), SAMPLE_RATE as u64 * 60);
    }

    #[test]
    fn short_file_predicate_uses_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blip.wav");
        write_wav(&path, &sine_wav(SAMPLE_RATE, 440, 2.0), SAMPLE_RATE, 1);

        let recording = Recording::new(path);
        assert!(recording.is_short(15.0));
        assert!(!recording.is_short(1.0));
    }
}
