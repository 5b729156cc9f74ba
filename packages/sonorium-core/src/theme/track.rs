//! Per-theme track state.
//!
//! A [`TrackInstance`] is one recording as it appears in one theme. Its
//! settings are written by the control plane and read by the audio thread
//! every chunk, so each field is an individual atomic: readers tolerate
//! stale values, and no lock sits on the mixing hot path.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::recording::Recording;

/// How a track is scheduled into the mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Pick a strategy from the file length and presence.
    #[default]
    Auto,
    /// Always looping, never presence-gated.
    Continuous,
    /// One-shot play-outs separated by randomized silence.
    Sparse,
    /// Looping underneath, faded in and out of audibility.
    Presence,
}

impl PlaybackMode {
    fn as_u8(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Continuous => 1,
            Self::Sparse => 2,
            Self::Presence => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Continuous,
            2 => Self::Sparse,
            3 => Self::Presence,
            _ => Self::Auto,
        }
    }
}

/// The persisted per-track settings, as stored in `metadata.json`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSettings {
    pub presence: f32,
    pub muted: bool,
    pub volume: f32,
    pub playback_mode: PlaybackMode,
    pub seamless_loop: bool,
    pub exclusive: bool,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            presence: 1.0,
            muted: false,
            volume: 1.0,
            playback_mode: PlaybackMode::Auto,
            seamless_loop: true,
            exclusive: false,
        }
    }
}

/// A recording as configured within one theme.
pub struct TrackInstance {
    recording: Arc<Recording>,
    /// Amplitude multiplier, f32 bits in [0, 1].
    volume: AtomicU32,
    /// Temporal density, f32 bits in [0, 1]. Not a gain.
    presence: AtomicU32,
    enabled: AtomicBool,
    exclusive: AtomicBool,
    crossfade_enabled: AtomicBool,
    playback_mode: AtomicU8,
}

impl TrackInstance {
    /// Creates an instance with default settings (audible, always present,
    /// seamless looping).
    pub fn new(recording: Arc<Recording>) -> Self {
        Self::with_settings(recording, &TrackSettings::default())
    }

    /// Creates an instance from persisted settings.
    pub fn with_settings(recording: Arc<Recording>, settings: &TrackSettings) -> Self {
        let instance = Self {
            recording,
            volume: AtomicU32::new(1.0f32.to_bits()),
            presence: AtomicU32::new(1.0f32.to_bits()),
            enabled: AtomicBool::new(true),
            exclusive: AtomicBool::new(false),
            crossfade_enabled: AtomicBool::new(true),
            playback_mode: AtomicU8::new(PlaybackMode::Auto.as_u8()),
        };
        instance.apply_settings(settings);
        instance
    }

    /// The track name (recording file stem).
    pub fn name(&self) -> &str {
        self.recording.name()
    }

    /// The underlying recording.
    pub fn recording(&self) -> &Arc<Recording> {
        &self.recording
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Sets the amplitude multiplier, clamped to [0, 1].
    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn presence(&self) -> f32 {
        f32::from_bits(self.presence.load(Ordering::Relaxed))
    }

    /// Sets the temporal density, clamped to [0, 1].
    pub fn set_presence(&self, presence: f32) {
        self.presence
            .store(presence.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::Relaxed)
    }

    pub fn set_exclusive(&self, exclusive: bool) {
        self.exclusive.store(exclusive, Ordering::Relaxed);
    }

    pub fn crossfade_enabled(&self) -> bool {
        self.crossfade_enabled.load(Ordering::Relaxed)
    }

    pub fn set_crossfade_enabled(&self, enabled: bool) {
        self.crossfade_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn playback_mode(&self) -> PlaybackMode {
        PlaybackMode::from_u8(self.playback_mode.load(Ordering::Relaxed))
    }

    pub fn set_playback_mode(&self, mode: PlaybackMode) {
        self.playback_mode.store(mode.as_u8(), Ordering::Relaxed);
    }

    /// Applies a full settings record (preset application or scan).
    pub fn apply_settings(&self, settings: &TrackSettings) {
        self.set_volume(settings.volume);
        self.set_presence(settings.presence);
        self.set_enabled(!settings.muted);
        self.set_exclusive(settings.exclusive);
        self.set_crossfade_enabled(settings.seamless_loop);
        self.set_playback_mode(settings.playback_mode);
    }

    /// Snapshots the live settings back into persistable form.
    pub fn settings(&self) -> TrackSettings {
        TrackSettings {
            presence: self.presence(),
            muted: !self.is_enabled(),
            volume: self.volume(),
            playback_mode: self.playback_mode(),
            seamless_loop: self.crossfade_enabled(),
            exclusive: self.is_exclusive(),
        }
    }
}

impl std::fmt::Debug for TrackInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackInstance")
            .field("name", &self.name())
            .field("volume", &self.volume())
            .field("presence", &self.presence())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_instance() -> TrackInstance {
        TrackInstance::new(Arc::new(Recording::new(PathBuf::from("wind.wav"))))
    }

    #[test]
    fn defaults_match_metadata_defaults() {
        let instance = make_instance();
        assert_eq!(instance.volume(), 1.0);
        assert_eq!(instance.presence(), 1.0);
        assert!(instance.is_enabled());
        assert!(!instance.is_exclusive());
        assert!(instance.crossfade_enabled());
        assert_eq!(instance.playback_mode(), PlaybackMode::Auto);
    }

    #[test]
    fn setters_clamp_to_documented_ranges() {
        let instance = make_instance();
        instance.set_volume(1.5);
        assert_eq!(instance.volume(), 1.0);
        instance.set_volume(-0.5);
        assert_eq!(instance.volume(), 0.0);
        instance.set_presence(2.0);
        assert_eq!(instance.presence(), 1.0);
    }

    #[test]
    fn settings_round_trip() {
        let instance = make_instance();
        let settings = TrackSettings {
            presence: 0.3,
            muted: true,
            volume: 0.7,
            playback_mode: PlaybackMode::Sparse,
            seamless_loop: false,
            exclusive: true,
        };
        instance.apply_settings(&settings);
        assert_eq!(instance.settings(), settings);
        assert!(!instance.is_enabled());
    }

    #[test]
    fn playback_mode_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&PlaybackMode::Continuous).unwrap(),
            "\"continuous\""
        );
        let mode: PlaybackMode = serde_json::from_str("\"presence\"").unwrap();
        assert_eq!(mode, PlaybackMode::Presence);
    }
}
