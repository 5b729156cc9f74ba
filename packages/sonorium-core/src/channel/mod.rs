//! Persistent broadcast channels.
//!
//! A channel is a numbered endpoint that speakers connect to. One generator
//! thread per channel produces PCM at wall-clock pace into a bounded ring of
//! `(sequence, chunk)` pairs; every HTTP client reads the same ring through
//! its own cursor and encoder. Theme changes crossfade inside the paced
//! generator, so the byte stream never breaks and the sequence counter
//! stays continuous.

pub mod client;
pub mod manager;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::audio::{crossfade_chunks, Chunk, CHUNK_SAMPLES, THEME_CROSSFADE_SAMPLES};
use crate::engine::{SharedGain, ThemeStream};
use crate::theme::Theme;

/// How long `shutdown` waits for the generator thread to exit.
const GENERATOR_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Current state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No theme assigned; paced silence keeps clients connected.
    Idle,
    /// Mixing a theme.
    Playing,
}

/// What the generator pulls from each cycle.
enum ChunkSource {
    Silence,
    Theme(ThemeStream),
    Crossfade {
        outgoing: ThemeStream,
        incoming: ThemeStream,
        position: usize,
    },
}

impl ChunkSource {
    /// Produces the next chunk, advancing (and eventually collapsing) an
    /// in-flight theme crossfade.
    fn next_chunk(&mut self) -> Chunk {
        match self {
            ChunkSource::Silence => Chunk::silence(),
            ChunkSource::Theme(stream) => stream.next_chunk(),
            ChunkSource::Crossfade {
                outgoing,
                incoming,
                position,
            } => {
                let old = outgoing.next_chunk();
                let new = incoming.next_chunk();
                let mixed = crossfade_chunks(&old, &new, *position, THEME_CROSSFADE_SAMPLES);
                *position += CHUNK_SAMPLES;
                if *position >= THEME_CROSSFADE_SAMPLES {
                    let ChunkSource::Crossfade { incoming, .. } =
                        std::mem::replace(self, ChunkSource::Silence)
                    else {
                        unreachable!()
                    };
                    *self = ChunkSource::Theme(incoming);
                }
                mixed
            }
        }
    }
}

/// Bounded broadcast buffer of recent chunks.
struct Ring {
    chunks: VecDeque<(u64, Chunk)>,
    sequence: u64,
    capacity: usize,
}

/// Serializable channel snapshot for the API.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub id: u32,
    pub name: String,
    pub state: ChannelState,
    pub current_theme: Option<String>,
    pub current_theme_name: Option<String>,
    pub client_count: usize,
    pub stream_path: String,
    pub theme_version: u64,
}

/// A persistent broadcast channel.
pub struct Channel {
    id: u32,
    name: String,
    output_gain: f32,
    master_gain: SharedGain,
    theme_version: AtomicU64,
    client_count: AtomicUsize,
    running: AtomicBool,
    current_theme: Mutex<Option<Arc<Theme>>>,
    source: Mutex<ChunkSource>,
    ring: Mutex<Ring>,
    generator: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Creates an idle channel. The generator thread starts on the first
    /// theme assignment.
    pub fn new(id: u32, ring_capacity: usize, output_gain: f32) -> Self {
        Self {
            id,
            name: format!("Channel {id}"),
            output_gain,
            master_gain: SharedGain::default(),
            theme_version: AtomicU64::new(0),
            client_count: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            current_theme: Mutex::new(None),
            source: Mutex::new(ChunkSource::Silence),
            ring: Mutex::new(Ring {
                chunks: VecDeque::new(),
                sequence: 0,
                capacity: ring_capacity,
            }),
            generator: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL path clients use to reach this channel's stream.
    pub fn stream_path(&self) -> String {
        format!("/stream/channel{}", self.id)
    }

    pub fn state(&self) -> ChannelState {
        if self.current_theme.lock().is_some() {
            ChannelState::Playing
        } else {
            ChannelState::Idle
        }
    }

    pub fn current_theme(&self) -> Option<Arc<Theme>> {
        self.current_theme.lock().clone()
    }

    /// Monotonic version, bumped on every theme set or stop.
    pub fn theme_version(&self) -> u64 {
        self.theme_version.load(Ordering::Relaxed)
    }

    /// Master gain multiplier for this channel's mix (session volume).
    pub fn master_gain(&self) -> &SharedGain {
        &self.master_gain
    }

    /// Assigns a theme, crossfading from whatever is currently playing.
    ///
    /// The crossfade itself is driven by the paced generator loop: it lasts
    /// 3 s of stream time, both themes are audible throughout, and the
    /// chunk sequence keeps counting without a gap.
    pub fn set_theme(self: &Arc<Self>, theme: Arc<Theme>) {
        {
            let mut current = self.current_theme.lock();
            if current.as_ref().map(|t| t.id()) == Some(theme.id()) {
                log::info!(
                    "[Channel {}] Theme '{}' already active, no change needed",
                    self.id,
                    theme.name()
                );
                return;
            }
            let old_name = current
                .as_ref()
                .map(|t| t.name())
                .unwrap_or_else(|| "none".into());
            log::info!(
                "[Channel {}] Changing theme from '{}' to '{}'",
                self.id,
                old_name,
                theme.name()
            );

            let incoming =
                ThemeStream::new(Arc::clone(&theme), self.output_gain, self.master_gain.clone());
            let mut source = self.source.lock();
            *source = match std::mem::replace(&mut *source, ChunkSource::Silence) {
                ChunkSource::Silence => ChunkSource::Theme(incoming),
                ChunkSource::Theme(outgoing) => ChunkSource::Crossfade {
                    outgoing,
                    incoming,
                    position: 0,
                },
                // A swap during a swap: the stream that was fading in
                // becomes the outgoing side.
                ChunkSource::Crossfade {
                    incoming: outgoing, ..
                } => ChunkSource::Crossfade {
                    outgoing,
                    incoming,
                    position: 0,
                },
            };

            *current = Some(theme);
            self.theme_version.fetch_add(1, Ordering::Relaxed);
        }
        self.ensure_generator_running();
    }

    /// Clears the theme and returns to idle.
    ///
    /// The generator keeps running and emits paced silence so connected
    /// speakers stay connected; it only exits on [`shutdown`](Self::shutdown).
    pub fn stop(&self) {
        log::info!("[Channel {}] Stopping playback", self.id);
        *self.current_theme.lock() = None;
        *self.source.lock() = ChunkSource::Silence;
        self.theme_version.fetch_add(1, Ordering::Relaxed);
        self.ring.lock().chunks.clear();
    }

    /// Stops the generator thread, waiting up to 2 s for it to exit.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.generator.lock().take() else {
            return;
        };
        let deadline = Instant::now() + GENERATOR_JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "[Channel {}] Generator did not stop within {:?}",
                    self.id,
                    GENERATOR_JOIN_TIMEOUT
                );
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let _ = handle.join();
    }

    /// Tracks a new client connection.
    pub fn client_connected(&self) -> usize {
        let count = self.client_count.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!("[Channel {}] Client connected ({} total)", self.id, count);
        count
    }

    /// Tracks a client disconnection.
    pub fn client_disconnected(&self) -> usize {
        let count = self
            .client_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            })
            .unwrap_or(0)
            .saturating_sub(1);
        log::info!(
            "[Channel {}] Client disconnected ({} remaining)",
            self.id,
            count
        );
        count
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    /// The sequence number of the newest chunk in the ring.
    pub fn current_sequence(&self) -> u64 {
        self.ring.lock().sequence
    }

    /// All ring entries newer than `since`, oldest first.
    pub fn chunks_since(&self, since: u64) -> Vec<(u64, Chunk)> {
        self.ring
            .lock()
            .chunks
            .iter()
            .filter(|(seq, _)| *seq > since)
            .cloned()
            .collect()
    }

    /// Serializes channel state for the API.
    pub fn status(&self) -> ChannelStatus {
        let theme = self.current_theme();
        ChannelStatus {
            id: self.id,
            name: self.name.clone(),
            state: self.state(),
            current_theme: theme.as_ref().map(|t| t.id().to_string()),
            current_theme_name: theme.as_ref().map(|t| t.name()),
            client_count: self.client_count(),
            stream_path: self.stream_path(),
            theme_version: self.theme_version(),
        }
    }

    fn push_chunk(&self, chunk: Chunk) {
        let mut ring = self.ring.lock();
        ring.sequence += 1;
        let sequence = ring.sequence;
        ring.chunks.push_back((sequence, chunk));
        while ring.chunks.len() > ring.capacity {
            ring.chunks.pop_front();
        }
    }

    fn ensure_generator_running(self: &Arc<Self>) {
        let mut generator = self.generator.lock();
        if generator.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.running.store(true, Ordering::Release);
        let channel = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("channel-{}", self.id))
            .spawn(move || generator_loop(channel));
        match spawned {
            Ok(handle) => {
                log::info!("[Channel {}] Started generator thread", self.id);
                *generator = Some(handle);
            }
            Err(err) => {
                log::error!("[Channel {}] Failed to spawn generator: {}", self.id, err);
                self.running.store(false, Ordering::Release);
            }
        }
    }
}

/// Background loop producing chunks at wall-clock pace.
///
/// The pace comes from accumulated audio time against a monotonic start
/// instant, never from the encoder: sleep whenever audio is ahead of the
/// wall clock. Generation is best-effort forever; nothing short of
/// `shutdown` stops a channel with work to do.
fn generator_loop(channel: Arc<Channel>) {
    log::info!("[Channel {}] Generator loop started", channel.id);
    let start = Instant::now();
    let mut audio_time = 0.0f64;

    while channel.running.load(Ordering::Acquire) {
        let chunk = channel.source.lock().next_chunk();
        channel.push_chunk(chunk);

        audio_time += Chunk::duration_secs();
        let ahead = audio_time - start.elapsed().as_secs_f64();
        if ahead > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(ahead));
        }
    }
    log::info!("[Channel {}] Generator loop stopped", channel.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::test_fixtures::{constant_wav, write_wav};
    use std::path::Path;

    fn make_theme(dir: &Path, name: &str, level: i16) -> Arc<Theme> {
        let theme_dir = dir.join(name);
        std::fs::create_dir_all(&theme_dir).unwrap();
        write_wav(
            &theme_dir.join("bed.wav"),
            &constant_wav(level, SAMPLE_RATE as usize * 4),
            SAMPLE_RATE,
            1,
        );
        let theme = Theme::load(&theme_dir).unwrap();
        for track in theme.tracks() {
            track.set_crossfade_enabled(false);
        }
        Arc::new(theme)
    }

    fn mean_level(chunk: &Chunk) -> f64 {
        chunk.samples().iter().map(|&s| s as f64).sum::<f64>() / chunk.samples().len() as f64
    }

    #[test]
    fn sequence_numbers_are_strictly_consecutive() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), "forest", 5000);
        let channel = Arc::new(Channel::new(1, 10, 1.0));
        channel.set_theme(theme);

        std::thread::sleep(Duration::from_millis(300));
        let entries = channel.chunks_since(0);
        assert!(!entries.is_empty());
        for pair in entries.windows(2) {
            assert_eq!(pair[1].0, pair[0].0 + 1, "sequence gap in ring");
        }
        channel.shutdown();
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), "forest", 5000);
        let channel = Arc::new(Channel::new(1, 10, 1.0));
        channel.set_theme(theme);

        std::thread::sleep(Duration::from_millis(500));
        assert!(channel.chunks_since(0).len() <= 10);
        channel.shutdown();
    }

    #[test]
    fn generator_paces_at_real_time() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), "forest", 5000);
        let channel = Arc::new(Channel::new(1, 10, 1.0));
        channel.set_theme(theme);

        std::thread::sleep(Duration::from_secs(1));
        let produced = channel.current_sequence();
        // ~43 chunks per second; allow generous scheduling slack.
        assert!(
            (30..=60).contains(&produced),
            "expected ~43 chunks in 1s, got {produced}"
        );
        channel.shutdown();
    }

    #[test]
    fn theme_swap_crossfades_and_keeps_sequence_continuous() {
        let dir = tempfile::tempdir().unwrap();
        let forest = make_theme(dir.path(), "forest", 4000);
        let tavern = make_theme(dir.path(), "tavern", 12_000);
        let channel = Arc::new(Channel::new(1, 10, 1.0));

        channel.set_theme(forest);
        std::thread::sleep(Duration::from_millis(300));
        let version_before = channel.theme_version();
        let sequence_before = channel.current_sequence();

        channel.set_theme(tavern);
        assert_eq!(channel.theme_version(), version_before + 1);

        // Mid-crossfade the output sits between the two theme levels.
        std::thread::sleep(Duration::from_millis(1200));
        let mid = channel
            .chunks_since(channel.current_sequence() - 1)
            .pop()
            .unwrap();
        let mid_level = mean_level(&mid.1);
        assert!(
            mid_level > 4_500.0 && mid_level < 14_000.0,
            "expected blended level mid-crossfade, got {mid_level:.0}"
        );

        // After the 3 s window only the new theme is audible.
        std::thread::sleep(Duration::from_millis(2500));
        let after = channel
            .chunks_since(channel.current_sequence() - 1)
            .pop()
            .unwrap();
        let after_level = mean_level(&after.1);
        assert!(
            (11_000.0..=13_000.0).contains(&after_level),
            "expected new theme level after crossfade, got {after_level:.0}"
        );

        // The counter never reset across the swap.
        assert!(after.0 > sequence_before);
        channel.shutdown();
    }

    #[test]
    fn stop_keeps_generator_emitting_silence() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), "forest", 5000);
        let channel = Arc::new(Channel::new(1, 10, 1.0));
        channel.set_theme(theme);
        std::thread::sleep(Duration::from_millis(200));

        channel.stop();
        assert_eq!(channel.state(), ChannelState::Idle);

        let sequence_at_stop = channel.current_sequence();
        std::thread::sleep(Duration::from_millis(300));
        let entries = channel.chunks_since(sequence_at_stop);
        assert!(!entries.is_empty(), "idle channel must keep producing");
        assert!(entries.iter().all(|(_, c)| c.is_silent()));
        channel.shutdown();
    }

    #[test]
    fn same_theme_assignment_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let theme = make_theme(dir.path(), "forest", 5000);
        let channel = Arc::new(Channel::new(1, 10, 1.0));
        channel.set_theme(Arc::clone(&theme));
        let version = channel.theme_version();
        channel.set_theme(theme);
        assert_eq!(channel.theme_version(), version);
        channel.shutdown();
    }

    #[test]
    fn client_count_tracks_connections() {
        let channel = Channel::new(1, 10, 1.0);
        assert_eq!(channel.client_count(), 0);
        channel.client_connected();
        channel.client_connected();
        assert_eq!(channel.client_count(), 2);
        channel.client_disconnected();
        assert_eq!(channel.client_count(), 1);
        // Never goes negative.
        channel.client_disconnected();
        channel.client_disconnected();
        assert_eq!(channel.client_count(), 0);
    }
}
