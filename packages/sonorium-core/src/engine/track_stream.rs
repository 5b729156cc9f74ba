//! Per-track PCM producers.
//!
//! Each enabled track gets one stream, picked once at creation:
//!
//! - [`SimpleLoop`]: decode, loop with a hard cut at EOF.
//! - [`CrossfadeLoop`]: loop with a 1.5 s equal-power overlap between the
//!   tail of one iteration and the head of the next.
//! - [`SparseStream`]: one-shot play of a short sample, then randomized
//!   silence scaled by presence.
//! - [`PresenceMixer`]: wraps a loop and fades it in and out of audibility
//!   on randomized dwell times.
//!
//! Streams are infinite pull sources: `next_chunk()` always returns a chunk
//! and the caller stops by dropping the stream. Decode failures degrade the
//! track to silence; the rest of the mix proceeds.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::Rng;

use crate::audio::decoder::FileDecoder;
use crate::audio::{
    fade_in_gain, fade_out_gain, Chunk, CHUNK_SAMPLES, CROSSFADE_SAMPLES, SAMPLE_RATE,
    TRACK_FADE_SAMPLES, TRACK_FADE_SECS,
};
use crate::engine::exclusion::ExclusionCoordinator;
use crate::theme::track::{PlaybackMode, TrackInstance};

/// Sparse playback interval bounds (seconds between plays).
const SPARSE_MIN_INTERVAL_SECS: f32 = 30.0;
const SPARSE_MAX_INTERVAL_SECS: f32 = 300.0;

/// Presence dwell-time bounds (seconds).
const MIN_ACTIVE_SECS: f32 = 30.0;
const MAX_ACTIVE_SECS: f32 = 120.0;
const MIN_INACTIVE_SECS: f32 = 20.0;
const MAX_INACTIVE_SECS: f32 = 90.0;

/// Per-chunk slew applied to live volume edits (~0.5 s full scale).
const VOLUME_RAMP_STEP: f32 = 0.05;

/// Smooths control-plane volume edits so they land as a short ramp rather
/// than a step between chunks.
struct VolumeRamp {
    current: f32,
}

impl VolumeRamp {
    fn new(initial: f32) -> Self {
        Self { current: initial }
    }

    fn step(&mut self, target: f32) -> f32 {
        if (self.current - target).abs() <= VOLUME_RAMP_STEP {
            self.current = target;
        } else if self.current < target {
            self.current += VOLUME_RAMP_STEP;
        } else {
            self.current -= VOLUME_RAMP_STEP;
        }
        self.current
    }
}

/// Pops one chunk's worth of samples, scaling by `gain`. Missing samples
/// come out as silence.
fn drain_chunk(buffer: &mut VecDeque<f32>, gain: f32) -> Chunk {
    let mut out = [0f32; CHUNK_SAMPLES];
    for slot in out.iter_mut() {
        match buffer.pop_front() {
            Some(sample) => *slot = sample * gain,
            None => break,
        }
    }
    Chunk::from_f32(&out)
}

fn open_decoder(instance: &TrackInstance) -> Option<FileDecoder> {
    match FileDecoder::open(instance.recording().path()) {
        Ok(decoder) => Some(decoder),
        Err(err) => {
            log::warn!(
                "[Stream] Cannot open '{}', track goes silent: {}",
                instance.name(),
                err
            );
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TrackStreamKind
// ─────────────────────────────────────────────────────────────────────────────

/// The strategy chosen for one track, dispatched in one place.
pub enum TrackStreamKind {
    Simple(SimpleLoop),
    Crossfade(CrossfadeLoop),
    Sparse(SparseStream),
    Presence(PresenceMixer),
}

impl TrackStreamKind {
    /// Picks a strategy for `instance`. Evaluated once at stream creation.
    ///
    /// `random_start` shifts the initial playback position (decoder
    /// fast-forward for loops, buffer rotation for sparse) so re-enabled
    /// tracks do not audibly restart from zero.
    pub fn new(
        instance: Arc<TrackInstance>,
        short_file_threshold: f32,
        exclusion: Arc<ExclusionCoordinator>,
        random_start: bool,
    ) -> TrackStreamKind {
        let presence = instance.presence();
        let is_short = instance.recording().is_short(short_file_threshold);

        match instance.playback_mode() {
            PlaybackMode::Auto => {
                if is_short && presence < 1.0 {
                    TrackStreamKind::Sparse(SparseStream::new(instance, exclusion, random_start))
                } else if presence < 1.0 {
                    let inner = Self::base_loop(Arc::clone(&instance), random_start);
                    TrackStreamKind::Presence(PresenceMixer::new(inner, instance, exclusion))
                } else {
                    Self::base_loop(instance, random_start)
                }
            }
            PlaybackMode::Continuous => Self::base_loop(instance, random_start),
            PlaybackMode::Sparse => {
                TrackStreamKind::Sparse(SparseStream::new(instance, exclusion, random_start))
            }
            PlaybackMode::Presence => {
                let inner = Self::base_loop(Arc::clone(&instance), random_start);
                TrackStreamKind::Presence(PresenceMixer::new(inner, instance, exclusion))
            }
        }
    }

    fn base_loop(instance: Arc<TrackInstance>, random_start: bool) -> TrackStreamKind {
        if instance.crossfade_enabled() {
            TrackStreamKind::Crossfade(CrossfadeLoop::new(instance, random_start))
        } else {
            TrackStreamKind::Simple(SimpleLoop::new(instance, random_start))
        }
    }

    /// Pulls the next canonical chunk.
    pub fn next_chunk(&mut self) -> Chunk {
        match self {
            TrackStreamKind::Simple(stream) => stream.next_chunk(),
            TrackStreamKind::Crossfade(stream) => stream.next_chunk(),
            TrackStreamKind::Sparse(stream) => stream.next_chunk(),
            TrackStreamKind::Presence(stream) => stream.next_chunk(),
        }
    }

    /// The track this stream was built for.
    pub fn instance(&self) -> &Arc<TrackInstance> {
        match self {
            TrackStreamKind::Simple(stream) => &stream.instance,
            TrackStreamKind::Crossfade(stream) => &stream.instance,
            TrackStreamKind::Sparse(stream) => &stream.instance,
            TrackStreamKind::Presence(stream) => &stream.instance,
        }
    }
}

impl Drop for TrackStreamKind {
    fn drop(&mut self) {
        // Dropping an exclusive stream must not strand the token.
        match self {
            TrackStreamKind::Sparse(stream) => stream.release_token(),
            TrackStreamKind::Presence(stream) => stream.release_token(),
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimpleLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Hard-cut looping: decode to EOF, reopen, continue.
pub struct SimpleLoop {
    instance: Arc<TrackInstance>,
    decoder: Option<FileDecoder>,
    buffer: VecDeque<f32>,
    volume: VolumeRamp,
    random_start: bool,
    failed: bool,
}

impl SimpleLoop {
    pub fn new(instance: Arc<TrackInstance>, random_start: bool) -> Self {
        let volume = VolumeRamp::new(instance.volume());
        Self {
            instance,
            decoder: None,
            buffer: VecDeque::new(),
            volume,
            random_start,
            failed: false,
        }
    }

    pub fn next_chunk(&mut self) -> Chunk {
        if self.failed {
            return Chunk::silence();
        }

        let mut reopens = 0;
        while self.buffer.len() < CHUNK_SAMPLES {
            if self.decoder.is_none() {
                let Some(mut decoder) = open_decoder(&self.instance) else {
                    self.failed = true;
                    return Chunk::silence();
                };
                if std::mem::take(&mut self.random_start) {
                    let duration = self.instance.recording().duration_samples();
                    if duration > 0 {
                        let offset = rand::rng().random_range(0..duration);
                        let _ = decoder.skip_samples(offset);
                    }
                }
                self.decoder = Some(decoder);
            }

            match self.decoder.as_mut().expect("decoder just opened").next_block() {
                Ok(Some(block)) => self.buffer.extend(block),
                Ok(None) => {
                    self.decoder = None;
                    reopens += 1;
                    if reopens > 2 && self.buffer.is_empty() {
                        log::warn!(
                            "[Stream] '{}' decodes to nothing, track goes silent",
                            self.instance.name()
                        );
                        self.failed = true;
                        return Chunk::silence();
                    }
                }
                Err(err) => {
                    log::warn!(
                        "[Stream] Decode failed for '{}', track goes silent: {}",
                        self.instance.name(),
                        err
                    );
                    self.failed = true;
                    return Chunk::silence();
                }
            }
        }

        let gain = self.volume.step(self.instance.volume());
        drain_chunk(&mut self.buffer, gain)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CrossfadeLoop
// ─────────────────────────────────────────────────────────────────────────────

struct DecodeHalf {
    decoder: Option<FileDecoder>,
    buffer: VecDeque<f32>,
}

impl DecodeHalf {
    fn open(instance: &TrackInstance) -> Option<DecodeHalf> {
        open_decoder(instance).map(|decoder| DecodeHalf {
            decoder: Some(decoder),
            buffer: VecDeque::new(),
        })
    }

    /// Fills the buffer toward `target` samples. Returns false once the
    /// decoder is exhausted and the buffer is below target.
    fn fill(&mut self, target: usize) -> bool {
        while self.buffer.len() < target {
            let Some(decoder) = self.decoder.as_mut() else {
                return false;
            };
            match decoder.next_block() {
                Ok(Some(block)) => self.buffer.extend(block),
                Ok(None) | Err(_) => {
                    self.decoder = None;
                    return false;
                }
            }
        }
        true
    }
}

/// Seamless looping: approaching EOF, a second decoder starts on the same
/// file and the two are blended with equal-power curves.
pub struct CrossfadeLoop {
    instance: Arc<TrackInstance>,
    primary: Option<DecodeHalf>,
    secondary: Option<DecodeHalf>,
    samples_played: u64,
    crossfade_start: u64,
    crossfade_position: usize,
    volume: VolumeRamp,
    random_start: bool,
    failed: bool,
}

impl CrossfadeLoop {
    pub fn new(instance: Arc<TrackInstance>, random_start: bool) -> Self {
        let duration = instance.recording().duration_samples();
        // Files shorter than the window crossfade from sample zero: the
        // loop overlaps continuously.
        let crossfade_start = duration.saturating_sub(CROSSFADE_SAMPLES as u64);
        let volume = VolumeRamp::new(instance.volume());
        Self {
            instance,
            primary: None,
            secondary: None,
            samples_played: 0,
            crossfade_start,
            crossfade_position: 0,
            volume,
            random_start,
            failed: false,
        }
    }

    pub fn next_chunk(&mut self) -> Chunk {
        if self.failed {
            return Chunk::silence();
        }

        // Open (or reopen after a hard EOF) the primary decoder.
        if self.primary.is_none() {
            let Some(mut primary) = DecodeHalf::open(&self.instance) else {
                self.failed = true;
                return Chunk::silence();
            };
            self.samples_played = 0;
            if std::mem::take(&mut self.random_start) {
                let duration = self.instance.recording().duration_samples();
                if duration > 0 {
                    let offset = rand::rng().random_range(0..duration);
                    if let Some(decoder) = primary.decoder.as_mut() {
                        let _ = decoder.skip_samples(offset);
                    }
                    self.samples_played = offset;
                }
            }
            self.primary = Some(primary);
        }

        let primary_live = self
            .primary
            .as_mut()
            .expect("primary just opened")
            .fill(CHUNK_SAMPLES * 2);

        // Primary ran dry before the handover finished: start fresh. This
        // is the hard-cut fallback the crossfade normally avoids.
        if !primary_live && self.primary.as_ref().is_some_and(|p| p.buffer.len() < CHUNK_SAMPLES) {
            if self.secondary.is_none() {
                log::debug!("[Stream] '{}' ended mid-loop, restarting", self.instance.name());
                self.primary = None;
                self.secondary = None;
                self.crossfade_position = 0;
                return self.next_chunk();
            }
            // Hand what is left to the incoming side immediately.
            self.promote_secondary();
            return self.next_chunk();
        }

        // Entering the crossfade window: open the incoming decoder.
        if self.secondary.is_none() && self.samples_played >= self.crossfade_start {
            log::debug!(
                "[Stream] '{}' starting loop crossfade at sample {}",
                self.instance.name(),
                self.samples_played
            );
            self.secondary = DecodeHalf::open(&self.instance);
            self.crossfade_position = 0;
        }

        if let Some(secondary) = self.secondary.as_mut() {
            secondary.fill(CHUNK_SAMPLES * 2);
        }

        let gain = self.volume.step(self.instance.volume());
        let primary = self.primary.as_mut().expect("primary present");
        let mut out = [0f32; CHUNK_SAMPLES];
        for slot in out.iter_mut() {
            match primary.buffer.pop_front() {
                Some(sample) => *slot = sample,
                None => break,
            }
        }

        if let Some(secondary) = self
            .secondary
            .as_mut()
            .filter(|s| s.buffer.len() >= CHUNK_SAMPLES)
        {
            let position = self.crossfade_position;
            for (i, slot) in out.iter_mut().enumerate() {
                let incoming = secondary.buffer.pop_front().unwrap_or(0.0);
                let p = ((position + i) as f32 / CROSSFADE_SAMPLES as f32).min(1.0);
                *slot = *slot * fade_out_gain(p) + incoming * fade_in_gain(p);
            }
            self.crossfade_position += CHUNK_SAMPLES;
            if self.crossfade_position >= CROSSFADE_SAMPLES {
                self.promote_secondary();
            }
        }

        self.samples_played += CHUNK_SAMPLES as u64;

        for slot in out.iter_mut() {
            *slot *= gain;
        }
        Chunk::from_f32(&out)
    }

    /// The incoming decoder becomes the primary; position resets to how far
    /// into the new iteration the crossfade consumed.
    fn promote_secondary(&mut self) {
        if let Some(secondary) = self.secondary.take() {
            self.primary = Some(secondary);
            self.samples_played = self.crossfade_position as u64;
            self.crossfade_position = 0;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SparseStream
// ─────────────────────────────────────────────────────────────────────────────

/// One-shot playback of a short sample with randomized silent intervals.
///
/// The whole file is decoded once and kept; each cycle plays it with a
/// one-shot fade-in/out, then draws a fresh silence interval from the
/// current presence (re-read every cycle).
pub struct SparseStream {
    instance: Arc<TrackInstance>,
    exclusion: Arc<ExclusionCoordinator>,
    samples: Vec<f32>,
    /// `Some(offset)` while a play-out is in progress.
    position: Option<usize>,
    silence_remaining: u64,
    has_played: bool,
    holds_token: bool,
    volume: VolumeRamp,
}

impl SparseStream {
    pub fn new(
        instance: Arc<TrackInstance>,
        exclusion: Arc<ExclusionCoordinator>,
        random_start: bool,
    ) -> Self {
        let mut samples = match crate::audio::decoder::decode_all(instance.recording().path()) {
            Ok(samples) => samples,
            Err(err) => {
                log::warn!(
                    "[Stream] Cannot decode '{}', track goes silent: {}",
                    instance.name(),
                    err
                );
                Vec::new()
            }
        };

        if random_start && !samples.is_empty() {
            let offset = rand::rng().random_range(0..samples.len());
            samples.rotate_left(offset);
        }

        // One-shot envelope: short files get proportionally shorter fades.
        if !samples.is_empty() {
            let duration_secs = samples.len() as f32 / SAMPLE_RATE as f32;
            let fade_secs = TRACK_FADE_SECS.min(duration_secs / 3.0);
            let fade_samples = ((fade_secs * SAMPLE_RATE as f32) as usize).min(samples.len());
            if fade_samples > 0 {
                for i in 0..fade_samples {
                    let p = i as f32 / fade_samples as f32;
                    samples[i] *= fade_in_gain(p);
                }
                let tail = samples.len() - fade_samples;
                for i in 0..fade_samples {
                    let p = i as f32 / fade_samples as f32;
                    samples[tail + i] *= fade_out_gain(p);
                }
            }
        }

        let volume = VolumeRamp::new(instance.volume());
        Self {
            instance,
            exclusion,
            samples,
            position: None,
            silence_remaining: 0,
            has_played: false,
            holds_token: false,
            volume,
        }
    }

    pub fn next_chunk(&mut self) -> Chunk {
        if self.samples.is_empty() {
            return Chunk::silence();
        }

        if let Some(offset) = self.position {
            let gain = self.volume.step(self.instance.volume());
            let end = (offset + CHUNK_SAMPLES).min(self.samples.len());
            let mut out = [0f32; CHUNK_SAMPLES];
            for (slot, &sample) in out.iter_mut().zip(&self.samples[offset..end]) {
                *slot = sample * gain;
            }

            if end >= self.samples.len() {
                // The token is held through this final chunk and released on
                // the first silent one, so two exclusive tracks can never be
                // audible in the same chunk step.
                self.position = None;
                self.has_played = true;
                self.silence_remaining = self.next_interval_samples();
                log::debug!(
                    "[Stream] '{}' entering silence for {:.1}s",
                    self.instance.name(),
                    self.silence_remaining as f64 / SAMPLE_RATE as f64
                );
            } else {
                self.position = Some(end);
            }
            return Chunk::from_f32(&out);
        }

        if self.silence_remaining > 0 {
            self.release_token();
            self.silence_remaining = self.silence_remaining.saturating_sub(CHUNK_SAMPLES as u64);
            return Chunk::silence();
        }

        // Ready to start a new cycle. Presence zero means the track stays
        // silent after its first play-out until presence rises again.
        if self.has_played && self.instance.presence() <= 0.0 {
            self.release_token();
            return Chunk::silence();
        }

        if self.instance.is_exclusive() && !self.exclusion.try_acquire(self.instance.name()) {
            return Chunk::silence();
        }
        self.holds_token = self.instance.is_exclusive();
        self.position = Some(0);
        self.next_chunk()
    }

    /// Fresh silence interval from the current presence. Presence 1.0
    /// replays immediately, making the stream indistinguishable from a loop.
    fn next_interval_samples(&self) -> u64 {
        let presence = self.instance.presence();
        if presence >= 1.0 {
            return 0;
        }
        let factor = 1.0 - presence;
        let base = SPARSE_MIN_INTERVAL_SECS
            + (SPARSE_MAX_INTERVAL_SECS - SPARSE_MIN_INTERVAL_SECS) * factor;
        let interval = base * rand::rng().random_range(0.7..=1.3);
        (interval * SAMPLE_RATE as f32) as u64
    }

    fn release_token(&mut self) {
        if std::mem::take(&mut self.holds_token) {
            self.exclusion.release(self.instance.name());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PresenceMixer
// ─────────────────────────────────────────────────────────────────────────────

/// Fades a looping stream in and out of audibility over randomized dwell
/// times derived from presence. The inner stream keeps running while
/// inactive; only its gain changes.
pub struct PresenceMixer {
    inner: Box<TrackStreamKind>,
    instance: Arc<TrackInstance>,
    exclusion: Arc<ExclusionCoordinator>,
    desired_active: bool,
    /// Gain actually applied to the last chunk.
    applied_gain: f32,
    target_gain: f32,
    fade_position: usize,
    /// `u64::MAX` while pinned or waiting for a token grant.
    samples_until_change: u64,
    last_presence: f32,
    holds_token: bool,
}

impl PresenceMixer {
    pub fn new(
        inner: TrackStreamKind,
        instance: Arc<TrackInstance>,
        exclusion: Arc<ExclusionCoordinator>,
    ) -> Self {
        let presence = instance.presence();
        // Exclusive tracks always start inactive and go through the token
        // queue; others start active with probability equal to presence.
        let start_active = if presence >= 1.0 {
            !instance.is_exclusive()
        } else if presence <= 0.0 || instance.is_exclusive() {
            false
        } else {
            rand::rng().random_bool(presence as f64)
        };

        let mut mixer = Self {
            inner: Box::new(inner),
            instance,
            exclusion,
            desired_active: start_active,
            applied_gain: if start_active { 1.0 } else { 0.0 },
            target_gain: if start_active { 1.0 } else { 0.0 },
            fade_position: if start_active { TRACK_FADE_SAMPLES } else { 0 },
            samples_until_change: u64::MAX,
            last_presence: presence,
            holds_token: false,
        };
        if 0.0 < presence && presence < 1.0 {
            mixer.samples_until_change = mixer.next_duration(start_active);
        }
        // Pinned-active exclusive tracks still need the token before
        // becoming audible.
        if presence >= 1.0 && mixer.instance.is_exclusive() {
            mixer.desired_active = true;
        }
        mixer
    }

    pub fn next_chunk(&mut self) -> Chunk {
        let chunk = self.inner.next_chunk();
        self.update_state();
        let gain = self.advance_fade();

        if gain >= 1.0 {
            return chunk;
        }
        if gain <= 0.0 {
            return Chunk::silence();
        }
        let mut out = [0f32; CHUNK_SAMPLES];
        for (slot, &sample) in out.iter_mut().zip(chunk.samples()) {
            *slot = sample as f32 * gain;
        }
        Chunk::from_f32(&out)
    }

    fn update_state(&mut self) {
        let presence = self.instance.presence();
        if presence != self.last_presence {
            self.last_presence = presence;
            if presence >= 1.0 {
                self.desired_active = true;
                self.samples_until_change = u64::MAX;
            } else if presence <= 0.0 {
                self.desired_active = false;
                self.samples_until_change = u64::MAX;
            } else if self.samples_until_change == u64::MAX {
                // Leaving a pinned state: resume dwell scheduling.
                self.samples_until_change = self.next_duration(self.desired_active);
            }
        }

        // Dwell timer.
        if self.samples_until_change != u64::MAX {
            self.samples_until_change = self
                .samples_until_change
                .saturating_sub(CHUNK_SAMPLES as u64);
            if self.samples_until_change == 0 && 0.0 < presence && presence < 1.0 {
                self.desired_active = !self.desired_active;
                // The next dwell starts once the flip actually engages.
                self.samples_until_change = u64::MAX;
            }
        }

        // Engage the desired state, going through the token queue when
        // exclusive. A denied grant is retried on the next chunk.
        if self.desired_active && self.target_gain < 1.0 {
            if self.instance.is_exclusive() {
                if !self.exclusion.try_acquire(self.instance.name()) {
                    return;
                }
                self.holds_token = true;
            }
            log::debug!("[Stream] '{}' fading in", self.instance.name());
            self.target_gain = 1.0;
            self.fade_position = fade_position_for_gain(self.applied_gain, true);
            if 0.0 < presence && presence < 1.0 {
                self.samples_until_change = self.next_duration(true);
            }
        } else if !self.desired_active && self.target_gain > 0.0 {
            log::debug!("[Stream] '{}' fading out", self.instance.name());
            self.target_gain = 0.0;
            self.fade_position = fade_position_for_gain(self.applied_gain, false);
            if 0.0 < presence && presence < 1.0 {
                self.samples_until_change = self.next_duration(false);
            }
        }
    }

    /// Advances the fade one chunk and returns the gain to apply.
    fn advance_fade(&mut self) -> f32 {
        if self.applied_gain == self.target_gain {
            return self.applied_gain;
        }
        let progress = (self.fade_position as f32 / TRACK_FADE_SAMPLES as f32).min(1.0);
        let gain = if self.target_gain > self.applied_gain {
            fade_in_gain(progress)
        } else {
            fade_out_gain(progress)
        };
        self.fade_position += CHUNK_SAMPLES;

        if progress >= 1.0 {
            self.applied_gain = self.target_gain;
            if self.target_gain <= 0.0 {
                self.release_token();
            }
            return self.target_gain;
        }
        self.applied_gain = gain;
        gain
    }

    /// Dwell time for the state just entered, jittered ±30%.
    fn next_duration(&self, active: bool) -> u64 {
        let presence = self.instance.presence();
        let base_secs = if active {
            MIN_ACTIVE_SECS + (MAX_ACTIVE_SECS - MIN_ACTIVE_SECS) * presence
        } else {
            MAX_INACTIVE_SECS - (MAX_INACTIVE_SECS - MIN_INACTIVE_SECS) * presence
        };
        let secs = base_secs * rand::rng().random_range(0.7..=1.3);
        (secs * SAMPLE_RATE as f32) as u64
    }

    fn release_token(&mut self) {
        if std::mem::take(&mut self.holds_token) {
            self.exclusion.release(self.instance.name());
        }
    }
}

/// Fade offset whose curve value equals `gain`, so an interrupted fade
/// restarts from the current gain instead of jumping.
pub(crate) fn fade_position_for_gain(gain: f32, fading_in: bool) -> usize {
    let clamped = gain.clamp(0.0, 1.0);
    let progress = if fading_in {
        clamped.asin() / std::f32::consts::FRAC_PI_2
    } else {
        clamped.acos() / std::f32::consts::FRAC_PI_2
    };
    (progress * TRACK_FADE_SAMPLES as f32) as usize
}
