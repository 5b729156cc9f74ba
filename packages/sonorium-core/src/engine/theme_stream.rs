//! The theme mixer.
//!
//! Pulls one chunk from every enabled track stream, sums into a float
//! accumulator, applies the output gain and the channel's master gain, and
//! clamps to the canonical int16 format. The clamp doubles as a hard
//! limiter when many loud tracks coincide.
//!
//! Track enable/disable edits are reconciled live on every cycle: newly
//! enabled tracks get a stream (built before any fade is touched, from a
//! random start offset) and fade in over 6 s; disabled tracks fade out and
//! are dropped once silent. Volume edits ramp inside the track streams, so
//! nothing here is ever recreated for a preset change.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::{
    clamp_i16, fade_in_gain, fade_out_gain, Chunk, CHUNK_SAMPLES, TRACK_FADE_SAMPLES,
};
use crate::engine::track_stream::{fade_position_for_gain, TrackStreamKind};
use crate::theme::Theme;

/// A gain value shared between a control-plane writer and the audio thread.
#[derive(Clone)]
pub struct SharedGain(Arc<AtomicU32>);

impl SharedGain {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(value.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for SharedGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Fade state of one mixer slot.
enum EntryFade {
    In { position: usize },
    Steady,
    Out { position: usize },
}

struct MixerEntry {
    name: String,
    stream: TrackStreamKind,
    fade: EntryFade,
    remove_when_silent: bool,
}

impl MixerEntry {
    /// Advances the slot fade one chunk and returns its gain.
    /// Returns `None` once a fade-out has fully completed.
    fn advance(&mut self) -> Option<f32> {
        match &mut self.fade {
            EntryFade::Steady => Some(1.0),
            EntryFade::In { position } => {
                let p = (*position as f32 / TRACK_FADE_SAMPLES as f32).min(1.0);
                *position += CHUNK_SAMPLES;
                if p >= 1.0 {
                    self.fade = EntryFade::Steady;
                    Some(1.0)
                } else {
                    Some(fade_in_gain(p))
                }
            }
            EntryFade::Out { position } => {
                let p = (*position as f32 / TRACK_FADE_SAMPLES as f32).min(1.0);
                *position += CHUNK_SAMPLES;
                if p >= 1.0 {
                    None
                } else {
                    Some(fade_out_gain(p))
                }
            }
        }
    }

    /// Current gain of the slot without advancing, for fade handovers.
    fn current_gain(&self) -> f32 {
        match &self.fade {
            EntryFade::Steady => 1.0,
            EntryFade::In { position } => {
                fade_in_gain((*position as f32 / TRACK_FADE_SAMPLES as f32).min(1.0))
            }
            EntryFade::Out { position } => {
                fade_out_gain((*position as f32 / TRACK_FADE_SAMPLES as f32).min(1.0))
            }
        }
    }
}

/// Real-time mixer for one theme.
pub struct ThemeStream {
    theme: Arc<Theme>,
    entries: Vec<MixerEntry>,
    output_gain: f32,
    master_gain: SharedGain,
}

impl ThemeStream {
    /// Builds a mixer over the theme's currently enabled tracks.
    pub fn new(theme: Arc<Theme>, output_gain: f32, master_gain: SharedGain) -> Self {
        let threshold = theme.short_file_threshold();
        let entries = theme
            .tracks()
            .iter()
            .filter(|t| t.is_enabled())
            .map(|instance| MixerEntry {
                name: instance.name().to_string(),
                stream: TrackStreamKind::new(
                    Arc::clone(instance),
                    threshold,
                    Arc::clone(theme.exclusion()),
                    false,
                ),
                fade: EntryFade::Steady,
                remove_when_silent: false,
            })
            .collect();
        Self {
            theme,
            entries,
            output_gain,
            master_gain,
        }
    }

    /// The theme this stream mixes.
    pub fn theme(&self) -> &Arc<Theme> {
        &self.theme
    }

    /// Produces one mixed chunk.
    pub fn next_chunk(&mut self) -> Chunk {
        self.reconcile();

        let mut accumulator = [0f32; CHUNK_SAMPLES];
        let mut finished: Vec<usize> = Vec::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let chunk = entry.stream.next_chunk();
            match entry.advance() {
                Some(gain) if gain > 0.0 => {
                    for (slot, &sample) in accumulator.iter_mut().zip(chunk.samples()) {
                        *slot += sample as f32 * gain;
                    }
                }
                Some(_) => {}
                None => finished.push(index),
            }
        }
        for index in finished.into_iter().rev() {
            let entry = self.entries.remove(index);
            log::debug!("[Mixer] Track '{}' removed after fade-out", entry.name);
        }

        // Master gain is read every cycle so live volume edits apply.
        let gain = self.output_gain * self.master_gain.get();
        let mut out = [0i16; CHUNK_SAMPLES];
        for (slot, &sample) in out.iter_mut().zip(accumulator.iter()) {
            *slot = clamp_i16(sample * gain);
        }
        Chunk::from_i16(&out)
    }

    /// Aligns mixer slots with the theme's enabled tracks.
    ///
    /// New streams are prepared before any fade state changes; tracks that
    /// were disabled start a fade-out and are dropped when silent.
    fn reconcile(&mut self) {
        let threshold = self.theme.short_file_threshold();

        // Prepare streams for newly enabled tracks first. Mid-stream
        // additions start at a random offset so they do not audibly restart
        // from zero.
        let mut additions: Vec<MixerEntry> = Vec::new();
        for instance in self.theme.tracks() {
            if !instance.is_enabled() {
                continue;
            }
            let existing = self.entries.iter_mut().find(|e| e.name == instance.name());
            match existing {
                Some(entry) if entry.remove_when_silent => {
                    // Re-enabled while fading out: turn around from the
                    // current gain.
                    entry.remove_when_silent = false;
                    let gain = entry.current_gain();
                    entry.fade = EntryFade::In {
                        position: fade_position_for_gain(gain, true),
                    };
                }
                Some(_) => {}
                None => {
                    log::debug!("[Mixer] Track '{}' joining mix", instance.name());
                    additions.push(MixerEntry {
                        name: instance.name().to_string(),
                        stream: TrackStreamKind::new(
                            Arc::clone(instance),
                            threshold,
                            Arc::clone(self.theme.exclusion()),
                            true,
                        ),
                        fade: EntryFade::In { position: 0 },
                        remove_when_silent: false,
                    });
                }
            }
        }

        for entry in self.entries.iter_mut() {
            let enabled = self
                .theme
                .track(&entry.name)
                .map(|t| t.is_enabled())
                .unwrap_or(false);
            if !enabled && !entry.remove_when_silent {
                log::debug!("[Mixer] Track '{}' leaving mix", entry.name);
                let gain = entry.current_gain();
                entry.fade = EntryFade::Out {
                    position: fade_position_for_gain(gain, false),
                };
                entry.remove_when_silent = true;
            }
        }

        self.entries.extend(additions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::test_fixtures::{constant_wav, write_wav};
    use crate::theme::Theme;
    use std::path::Path;

    const CHUNKS_PER_SEC: usize = SAMPLE_RATE as usize / CHUNK_SAMPLES;

    fn make_theme(dir: &Path, tracks: &[(&str, i16)]) -> Arc<Theme> {
        for (name, level) in tracks {
            write_wav(
                &dir.join(format!("{name}.wav")),
                &constant_wav(*level, SAMPLE_RATE as usize * 4),
                SAMPLE_RATE,
                1,
            );
        }
        let theme = Theme::load(dir).unwrap();
        // Hard-cut looping keeps constant fixtures at a constant level,
        // which makes the mix arithmetic in these tests exact.
        for track in theme.tracks() {
            track.set_crossfade_enabled(false);
        }
        Arc::new(theme)
    }

    fn rms(chunk: &Chunk) -> f64 {
        let sum: f64 = chunk
            .samples()
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        (sum / chunk.samples().len() as f64).sqrt()
    }

    #[test]
    fn zero_enabled_tracks_yields_silence() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), &[("wind", 5000)]);
        theme.track("wind").unwrap().set_enabled(false);

        let mut stream = ThemeStream::new(theme, 6.0, SharedGain::default());
        for _ in 0..4 {
            assert!(stream.next_chunk().is_silent());
        }
    }

    #[test]
    fn tracks_sum_and_gain_applies() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), &[("a", 1000), ("b", 2000)]);

        let mut stream = ThemeStream::new(theme, 2.0, SharedGain::default());
        let chunk = stream.next_chunk();
        // (1000 + 2000) * 2.0 = 6000.
        let level = chunk.samples()[100];
        assert!((5_800..=6_200).contains(&level), "expected ~6000, got {level}");
    }

    #[test]
    fn output_clamps_instead_of_wrapping() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), &[("a", 10_000), ("b", 10_000)]);

        // 20000 * 6.0 is far past i16 range; the clamp limits it.
        let mut stream = ThemeStream::new(theme, 6.0, SharedGain::default());
        let chunk = stream.next_chunk();
        assert_eq!(chunk.samples()[100], i16::MAX);
    }

    #[test]
    fn master_gain_scales_the_mix() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), &[("a", 10_000)]);
        let master = SharedGain::default();
        let mut stream = ThemeStream::new(theme, 1.0, master.clone());

        let full = stream.next_chunk().samples()[100];
        master.set(0.5);
        let halved = stream.next_chunk().samples()[100];
        assert!((full / 2 - halved).abs() < 200, "full={full} halved={halved}");
    }

    #[test]
    fn disabling_a_track_fades_it_out_within_six_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), &[("wind", 8_000), ("birds", 8_000)]);
        let mut stream = ThemeStream::new(Arc::clone(&theme), 1.0, SharedGain::default());

        let before = rms(&stream.next_chunk());
        theme.track("birds").unwrap().set_enabled(false);

        // Master audio never drops to silence while the other track plays.
        let mut level = before;
        for _ in 0..(CHUNKS_PER_SEC * 7) {
            level = rms(&stream.next_chunk());
            assert!(level > 1_000.0, "mix must stay audible during the fade");
        }
        // After the fade the mix settles at the single remaining track.
        assert!(
            level < before * 0.7,
            "expected level to drop after fade-out: before={before:.0} after={level:.0}"
        );
    }

    #[test]
    fn enabling_a_track_fades_it_in() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), &[("wind", 8_000), ("crickets", 8_000)]);
        theme.track("crickets").unwrap().set_enabled(false);
        let mut stream = ThemeStream::new(Arc::clone(&theme), 1.0, SharedGain::default());

        let before = rms(&stream.next_chunk());
        theme.track("crickets").unwrap().set_enabled(true);

        let mut level = before;
        for _ in 0..(CHUNKS_PER_SEC * 7) {
            level = rms(&stream.next_chunk());
        }
        assert!(
            level > before * 1.5,
            "expected level to rise after fade-in: before={before:.0} after={level:.0}"
        );
    }

    #[test]
    fn preset_style_swap_keeps_audio_continuous() {
        // Mute one track and enable another in the same control action; the
        // mix never gaps.
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), &[("wind", 8_000), ("birds", 8_000), ("crickets", 8_000)]);
        theme.track("crickets").unwrap().set_enabled(false);
        let mut stream = ThemeStream::new(Arc::clone(&theme), 1.0, SharedGain::default());
        stream.next_chunk();

        theme.track("birds").unwrap().set_enabled(false);
        theme.track("crickets").unwrap().set_enabled(true);

        for _ in 0..(CHUNKS_PER_SEC * 7) {
            assert!(
                rms(&stream.next_chunk()) > 1_000.0,
                "mix gapped during preset swap"
            );
        }
    }
}
