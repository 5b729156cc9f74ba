//! Local playback of a channel's HTTP MP3 stream.
//!
//! Symmetric to a network speaker: a worker thread fetches the stream over
//! HTTP, decodes MP3, resamples to the output device's native rate, and
//! feeds a bounded block queue drained by the audio callback. Transient
//! HTTP or decode errors reconnect with exponential backoff up to a retry
//! cap. Volume is applied in the render callback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Bounded producer-consumer queue depth, in PCM blocks.
const QUEUE_BLOCKS: usize = 50;

/// Mono frames per block pushed to the queue / resampler.
const BLOCK_FRAMES: usize = 1024;

/// Reconnect attempts before giving up on a stream.
const MAX_RETRIES: u32 = 10;

/// Backoff cap between reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How long `stop` waits for the worker thread to wind down.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Renders a channel's MP3 stream on the local audio device.
pub struct LocalStreamPlayer {
    /// f32 bits in [0, 1], read by the render callback.
    volume: Arc<AtomicU32>,
    playing: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    current_channel: Mutex<Option<u32>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LocalStreamPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStreamPlayer {
    pub fn new() -> Self {
        Self {
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            playing: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            current_channel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Sets the render volume, clamped to [0, 1].
    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// The channel currently being rendered, if any.
    pub fn current_channel_id(&self) -> Option<u32> {
        *self.current_channel.lock()
    }

    /// Starts rendering `stream_url` on the default output device,
    /// replacing any stream already playing.
    pub fn play(&self, stream_url: &str, channel_id: u32) {
        self.stop();

        log::info!("[Player] Starting local playback of {stream_url}");
        *self.current_channel.lock() = Some(channel_id);
        self.stop_flag.store(false, Ordering::Release);
        self.playing.store(true, Ordering::Release);

        let url = stream_url.to_string();
        let stop = Arc::clone(&self.stop_flag);
        let volume = Arc::clone(&self.volume);
        let playing = Arc::clone(&self.playing);
        let spawned = std::thread::Builder::new()
            .name("local-player".into())
            .spawn(move || run_player(url, stop, volume, playing));
        match spawned {
            Ok(handle) => *self.worker.lock() = Some(handle),
            Err(err) => {
                log::error!("[Player] Failed to spawn worker: {err}");
                self.playing.store(false, Ordering::Release);
            }
        }
    }

    /// Stops playback and waits briefly for the worker to wind down.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.playing.store(false, Ordering::Release);
        *self.current_channel.lock() = None;

        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                // The worker may be blocked in a socket read; it will see
                // the stop flag at the next frame and exit on its own.
                log::debug!("[Player] Worker still draining, detaching");
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let _ = handle.join();
        log::info!("[Player] Local playback stopped");
    }
}

impl Drop for LocalStreamPlayer {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
    }
}

/// Worker: fetch → decode → resample → queue, with reconnect.
fn run_player(
    url: String,
    stop: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    playing: Arc<AtomicBool>,
) {
    let Some((stream, config, tx)) = build_output(volume) else {
        playing.store(false, Ordering::Release);
        return;
    };
    if let Err(err) = stream.play() {
        log::error!("[Player] Cannot start output stream: {err}");
        playing.store(false, Ordering::Release);
        return;
    }
    let device_rate = config.sample_rate.0;

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(10))
        .build();

    let mut attempts: u32 = 0;
    while !stop.load(Ordering::Acquire) {
        match agent.get(&url).call() {
            Ok(response) => {
                let reader = response.into_reader();
                if decode_stream(reader, device_rate, &tx, &stop) {
                    // Audio flowed; a clean disconnect resets the backoff.
                    attempts = 0;
                }
            }
            Err(err) => {
                log::warn!("[Player] Stream request failed: {err}");
            }
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
        attempts += 1;
        if attempts > MAX_RETRIES {
            log::error!("[Player] Giving up on {url} after {MAX_RETRIES} retries");
            break;
        }
        let backoff = Duration::from_secs(1u64 << attempts.min(5)).min(MAX_BACKOFF);
        log::info!("[Player] Reconnecting in {backoff:?} (attempt {attempts})");
        std::thread::sleep(backoff);
    }
    playing.store(false, Ordering::Release);
}

type OutputParts = (cpal::Stream, cpal::StreamConfig, std::sync::mpsc::SyncSender<Vec<f32>>);

/// Opens the default output device and builds the render stream.
fn build_output(volume: Arc<AtomicU32>) -> Option<OutputParts> {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(device) => device,
        None => {
            log::error!("[Player] No output audio device available");
            return None;
        }
    };
    let supported = match device.default_output_config() {
        Ok(config) => config,
        Err(err) => {
            log::error!("[Player] No default output config: {err}");
            return None;
        }
    };
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;

    let (tx, rx): (_, Receiver<Vec<f32>>) = sync_channel(QUEUE_BLOCKS);
    let mut leftover: VecDeque<f32> = VecDeque::new();

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _| {
            let gain = f32::from_bits(volume.load(Ordering::Relaxed));
            for frame in data.chunks_mut(channels) {
                let sample = leftover.pop_front().or_else(|| {
                    rx.try_recv().ok().and_then(|block| {
                        leftover.extend(block);
                        leftover.pop_front()
                    })
                });
                // Underruns render as silence.
                let value = sample.unwrap_or(0.0) * gain;
                for slot in frame.iter_mut() {
                    *slot = value;
                }
            }
        },
        |err| log::warn!("[Player] Output stream error: {err}"),
        None,
    );
    match stream {
        Ok(stream) => Some((stream, config, tx)),
        Err(err) => {
            log::error!("[Player] Cannot build output stream: {err}");
            None
        }
    }
}

/// Decodes one HTTP connection's MP3 bytes into the block queue.
///
/// Returns true when any audio was delivered. Exits on EOF (caller
/// reconnects), fatal decode errors, a full-queue disconnect, or the stop
/// flag.
fn decode_stream(
    reader: impl std::io::Read,
    device_rate: u32,
    tx: &std::sync::mpsc::SyncSender<Vec<f32>>,
    stop: &AtomicBool,
) -> bool {
    let mut decoder = minimp3::Decoder::new(reader);
    let mut resampler: Option<SincFixedIn<f32>> = None;
    let mut pending: VecDeque<f32> = VecDeque::new();
    let mut delivered = false;

    loop {
        if stop.load(Ordering::Acquire) {
            return delivered;
        }
        let frame = match decoder.next_frame() {
            Ok(frame) => frame,
            Err(minimp3::Error::Eof) => return delivered,
            Err(minimp3::Error::SkippedData) => continue,
            Err(err) => {
                log::warn!("[Player] Decode error, reconnecting: {err}");
                return delivered;
            }
        };

        let channels = frame.channels.max(1);
        let source_rate = frame.sample_rate.max(1) as u32;
        for samples in frame.data.chunks_exact(channels) {
            let sum: i32 = samples.iter().map(|&s| s as i32).sum();
            pending.push_back(sum as f32 / channels as f32 / 32_768.0);
        }

        if source_rate == device_rate {
            while pending.len() >= BLOCK_FRAMES {
                let block: Vec<f32> = pending.drain(..BLOCK_FRAMES).collect();
                if !send_block(tx, block, stop) {
                    return delivered;
                }
                delivered = true;
            }
            continue;
        }

        if resampler.is_none() {
            resampler = make_resampler(source_rate, device_rate);
            if resampler.is_none() {
                return delivered;
            }
        }
        let resampler = resampler.as_mut().expect("resampler just created");
        while pending.len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let input: Vec<f32> = pending.drain(..needed).collect();
            match resampler.process(&[input], None) {
                Ok(output) => {
                    if !send_block(tx, output[0].clone(), stop) {
                        return delivered;
                    }
                    delivered = true;
                }
                Err(err) => {
                    log::warn!("[Player] Resample failed: {err}");
                    return delivered;
                }
            }
        }
    }
}

/// Pushes a block, waiting while the bounded queue is full. Returns false
/// when the consumer vanished or stop was requested.
fn send_block(
    tx: &std::sync::mpsc::SyncSender<Vec<f32>>,
    block: Vec<f32>,
    stop: &AtomicBool,
) -> bool {
    let mut block = block;
    loop {
        match tx.try_send(block) {
            Ok(()) => return true,
            Err(TrySendError::Full(returned)) => {
                if stop.load(Ordering::Acquire) {
                    return false;
                }
                block = returned;
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

fn make_resampler(source_rate: u32, device_rate: u32) -> Option<SincFixedIn<f32>> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    match SincFixedIn::<f32>::new(
        device_rate as f64 / source_rate as f64,
        2.0,
        params,
        BLOCK_FRAMES,
        1,
    ) {
        Ok(resampler) => Some(resampler),
        Err(err) => {
            log::error!("[Player] Cannot create resampler: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let player = LocalStreamPlayer::new();
        assert!(!player.is_playing());
        assert!(player.current_channel_id().is_none());
        assert_eq!(player.volume(), 1.0);
    }

    #[test]
    fn volume_clamps_to_unit_range() {
        let player = LocalStreamPlayer::new();
        player.set_volume(1.8);
        assert_eq!(player.volume(), 1.0);
        player.set_volume(-0.2);
        assert_eq!(player.volume(), 0.0);
        player.set_volume(0.35);
        assert!((player.volume() - 0.35).abs() < f32::EPSILON);
    }

    #[test]
    fn stop_without_play_is_a_no_op() {
        let player = LocalStreamPlayer::new();
        player.stop();
        player.stop();
        assert!(!player.is_playing());
    }
}
