//! Shared audio fixtures for unit tests.
//!
//! Tests synthesize small WAV files on disk so the real decode path
//! (probe, decode, downmix, resample) is exercised end to end.

use std::path::Path;

use bytes::{BufMut, BytesMut};

/// Writes a 16-bit PCM WAV file. `samples` are interleaved frames.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * channels as u32 * 2;
    let block_align = channels * 2;

    let mut out = BytesMut::with_capacity(44 + samples.len() * 2);

    // RIFF header
    out.put_slice(b"RIFF");
    out.put_u32_le(36 + data_len);
    out.put_slice(b"WAVE");

    // fmt chunk
    out.put_slice(b"fmt ");
    out.put_u32_le(16);
    out.put_u16_le(1); // PCM
    out.put_u16_le(channels);
    out.put_u32_le(sample_rate);
    out.put_u32_le(byte_rate);
    out.put_u16_le(block_align);
    out.put_u16_le(16);

    // data chunk
    out.put_slice(b"data");
    out.put_u32_le(data_len);
    for &sample in samples {
        out.put_i16_le(sample);
    }

    std::fs::write(path, &out).expect("write wav fixture");
}

/// A mono sine tone at amplitude 12000.
pub fn sine_wav(sample_rate: u32, freq_hz: u32, duration_secs: f32) -> Vec<i16> {
    let frames = (sample_rate as f32 * duration_secs) as usize;
    (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (12_000.0 * (2.0 * std::f32::consts::PI * freq_hz as f32 * t).sin()) as i16
        })
        .collect()
}

/// A mono constant-level signal, handy for exact level assertions.
pub fn constant_wav(level: i16, frames: usize) -> Vec<i16> {
    vec![level; frames]
}
