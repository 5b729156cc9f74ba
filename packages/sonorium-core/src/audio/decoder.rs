//! File decode and resample pipeline.
//!
//! Wraps symphonia container probing and decoding behind a pull API that
//! yields blocks of canonical PCM (mono f32 at 44.1 kHz). Multi-channel
//! sources are downmixed by arithmetic mean; off-rate sources go through a
//! sinc resampler. Decode errors on individual packets are tolerated; a
//! stream only gives up after a run of consecutive failures.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::SAMPLE_RATE;

/// Give up on a file after this many consecutive packet decode failures.
const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 50;

/// Input frames fed to the resampler per call.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Fallback duration assumed when a file cannot be probed (spec: 60 s).
const FALLBACK_DURATION_SAMPLES: u64 = SAMPLE_RATE as u64 * 60;

/// Errors from opening or decoding an audio file.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported or corrupt container {path}: {source}")]
    Probe {
        path: PathBuf,
        source: SymphoniaError,
    },

    #[error("no audio track in {0}")]
    NoAudioTrack(PathBuf),

    #[error("no decoder for {path}: {source}")]
    Codec {
        path: PathBuf,
        source: SymphoniaError,
    },

    #[error("resampler error for {path}: {message}")]
    Resample { path: PathBuf, message: String },
}

/// Streaming decoder for one audio file, producing canonical mono PCM.
pub struct FileDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    codec_params: CodecParameters,
    track_id: u32,
    source_rate: u32,
    resampler: Option<SincFixedIn<f32>>,
    /// Mono samples at source rate awaiting resampling.
    pending: VecDeque<f32>,
    /// Canonical-rate samples ready to serve.
    ready: VecDeque<f32>,
    exhausted: bool,
    flushed: bool,
    consecutive_errors: u32,
}

impl FileDecoder {
    /// Opens a file and prepares the decode pipeline.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|source| DecodeError::Probe {
                path: path.to_path_buf(),
                source,
            })?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| DecodeError::NoAudioTrack(path.to_path_buf()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let source_rate = codec_params.sample_rate.unwrap_or(SAMPLE_RATE);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|source| DecodeError::Codec {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            codec_params,
            track_id,
            source_rate,
            resampler: None,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            exhausted: false,
            flushed: false,
            consecutive_errors: 0,
        })
    }

    /// Source sample rate reported by the container.
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Returns the next block of canonical mono samples, or `None` at EOF.
    ///
    /// Block sizes vary with the source packet size; callers buffer into
    /// their own chunking.
    pub fn next_block(&mut self) -> Result<Option<Vec<f32>>, DecodeError> {
        loop {
            if !self.ready.is_empty() {
                return Ok(Some(self.ready.drain(..).collect()));
            }

            if self.exhausted {
                self.drain_tail()?;
                if self.ready.is_empty() {
                    return Ok(None);
                }
                continue;
            }

            self.decode_one_packet();
            self.push_through_resampler(false)?;
        }
    }

    /// Decodes and discards `count` canonical samples. Used for
    /// random-start offsets where container seeking is unreliable.
    pub fn skip_samples(&mut self, mut count: u64) -> Result<(), DecodeError> {
        while count > 0 {
            match self.next_block()? {
                Some(block) => {
                    let n = (block.len() as u64).min(count);
                    count -= n;
                    // Put back the part we overshot.
                    if (n as usize) < block.len() {
                        for &s in &block[n as usize..] {
                            self.ready.push_back(s);
                        }
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Decodes one packet into `pending`, downmixing to mono.
    fn decode_one_packet(&mut self) {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => {
                self.exhausted = true;
                return;
            }
            Err(err) => {
                log::debug!(
                    "[Decoder] End of stream for {}: {}",
                    self.path.display(),
                    err
                );
                self.exhausted = true;
                return;
            }
        };

        if packet.track_id() != self.track_id {
            return;
        }

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                self.consecutive_errors = 0;
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;
                let mut sample_buffer = SampleBuffer::<f32>::new(duration, spec);
                sample_buffer.copy_interleaved_ref(decoded);

                let channels = spec.channels.count().max(1);
                let interleaved = sample_buffer.samples();
                for frame in interleaved.chunks_exact(channels) {
                    let sum: f32 = frame.iter().sum();
                    // Sources decode to [-1, 1]; scale to i16 range here so
                    // downstream fades work in integer amplitude terms.
                    self.pending
                        .push_back(sum / channels as f32 * i16::MAX as f32);
                }
            }
            Err(SymphoniaError::DecodeError(message)) => {
                log::warn!(
                    "[Decoder] Decode error in {} (skipping packet): {}",
                    self.path.display(),
                    message
                );
                self.consecutive_errors += 1;
                if self.consecutive_errors > MAX_CONSECUTIVE_DECODE_ERRORS {
                    log::error!(
                        "[Decoder] Too many consecutive decode errors in {}, giving up",
                        self.path.display()
                    );
                    self.exhausted = true;
                }
            }
            Err(SymphoniaError::ResetRequired) => {
                match symphonia::default::get_codecs()
                    .make(&self.codec_params, &DecoderOptions::default())
                {
                    Ok(decoder) => {
                        self.decoder = decoder;
                        self.consecutive_errors = 0;
                    }
                    Err(err) => {
                        log::error!(
                            "[Decoder] Failed to re-create decoder for {}: {}",
                            self.path.display(),
                            err
                        );
                        self.exhausted = true;
                    }
                }
            }
            Err(err) => {
                log::error!(
                    "[Decoder] Fatal decode error in {}: {}",
                    self.path.display(),
                    err
                );
                self.exhausted = true;
            }
        }
    }

    /// Moves pending source-rate samples into `ready` canonical samples.
    fn push_through_resampler(&mut self, partial: bool) -> Result<(), DecodeError> {
        if self.source_rate == SAMPLE_RATE {
            self.ready.extend(self.pending.drain(..));
            return Ok(());
        }

        if self.resampler.is_none() {
            self.resampler = Some(self.create_resampler()?);
        }
        let resampler = self.resampler.as_mut().expect("resampler just created");

        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let input: Vec<f32> = self.pending.drain(..needed).collect();
            let output = resampler
                .process(&[input], None)
                .map_err(|err| DecodeError::Resample {
                    path: self.path.clone(),
                    message: err.to_string(),
                })?;
            self.ready.extend(output[0].iter().copied());
        }

        if partial && !self.pending.is_empty() {
            let input: Vec<f32> = self.pending.drain(..).collect();
            let output = resampler
                .process_partial(Some(&[input]), None)
                .map_err(|err| DecodeError::Resample {
                    path: self.path.clone(),
                    message: err.to_string(),
                })?;
            self.ready.extend(output[0].iter().copied());
        }

        Ok(())
    }

    /// Flushes the resampler tail once input is exhausted.
    fn drain_tail(&mut self) -> Result<(), DecodeError> {
        self.push_through_resampler(true)?;
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if let Some(resampler) = self.resampler.as_mut() {
            match resampler.process_partial::<&[f32]>(None, None) {
                Ok(output) => self.ready.extend(output[0].iter().copied()),
                Err(err) => {
                    log::warn!(
                        "[Decoder] Resampler flush failed for {}: {}",
                        self.path.display(),
                        err
                    );
                }
            }
        }
        Ok(())
    }

    fn create_resampler(&self) -> Result<SincFixedIn<f32>, DecodeError> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        SincFixedIn::<f32>::new(
            SAMPLE_RATE as f64 / self.source_rate as f64,
            2.0,
            params,
            RESAMPLE_CHUNK_FRAMES,
            1,
        )
        .map_err(|err| DecodeError::Resample {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }
}

/// Decodes an entire file into a canonical mono buffer.
pub fn decode_all(path: &Path) -> Result<Vec<f32>, DecodeError> {
    let mut decoder = FileDecoder::open(path)?;
    let mut samples = Vec::new();
    while let Some(block) = decoder.next_block()? {
        samples.extend_from_slice(&block);
    }
    Ok(samples)
}

/// Probes a file's duration in canonical samples.
///
/// Prefers the container header (`n_frames`); falls back to decoding the
/// whole file and counting. Failure is non-fatal for callers: they log and
/// assume [`FALLBACK_DURATION_SAMPLES`].
pub fn probe_duration_samples(path: &Path) -> Result<u64, DecodeError> {
    let decoder = FileDecoder::open(path)?;
    let params = &decoder.codec_params;
    if let (Some(n_frames), Some(rate)) = (params.n_frames, params.sample_rate) {
        if rate > 0 {
            let seconds = n_frames as f64 / rate as f64;
            return Ok((seconds * SAMPLE_RATE as f64) as u64);
        }
    }

    // Header duration absent: count by decoding.
    let mut decoder = decoder;
    let mut total: u64 = 0;
    while let Some(block) = decoder.next_block()? {
        total += block.len() as u64;
    }
    Ok(total)
}

/// Duration assumed when probing fails entirely.
pub fn fallback_duration_samples() -> u64 {
    FALLBACK_DURATION_SAMPLES
}
