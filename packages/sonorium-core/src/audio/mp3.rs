//! MP3 encoding for broadcast channels.
//!
//! Every HTTP client owns its own encoder instance; there is no shared
//! encoder state across listeners. Output is CBR 128 kbit/s mono at the
//! canonical sample rate.
//!
//! The `mp3lame-encoder` crate writes into spare `Vec` capacity and returns
//! the byte count, which requires an unsafe `set_len`. That usage is the
//! crate's documented calling convention and is confined to this module.

use bytes::Bytes;
use mp3lame_encoder::{Bitrate, Builder, Encoder, FlushNoGap, MonoPcm, Quality};
use thiserror::Error;

use super::{Chunk, SAMPLE_RATE};

/// Broadcast bitrate (CBR).
const BITRATE: Bitrate = Bitrate::Kbps128;

/// Errors building the LAME encoder.
#[derive(Debug, Error)]
pub enum Mp3Error {
    #[error("failed to allocate LAME encoder")]
    Alloc,

    #[error("failed to configure LAME encoder: {0}")]
    Configure(String),
}

/// Stateful MP3 encoder for one listener.
pub struct Mp3Encoder {
    encoder: Encoder,
}

impl Mp3Encoder {
    /// Creates an encoder for canonical mono PCM at 128 kbit/s CBR.
    pub fn new() -> Result<Self, Mp3Error> {
        let mut builder = Builder::new().ok_or(Mp3Error::Alloc)?;
        builder
            .set_num_channels(1)
            .map_err(|e| Mp3Error::Configure(e.to_string()))?;
        builder
            .set_sample_rate(SAMPLE_RATE)
            .map_err(|e| Mp3Error::Configure(e.to_string()))?;
        builder
            .set_brate(BITRATE)
            .map_err(|e| Mp3Error::Configure(e.to_string()))?;
        builder
            .set_quality(Quality::Good)
            .map_err(|e| Mp3Error::Configure(e.to_string()))?;
        let encoder = builder
            .build()
            .map_err(|e| Mp3Error::Configure(e.to_string()))?;
        Ok(Self { encoder })
    }

    /// Encodes one PCM chunk, returning whatever packets LAME emits.
    ///
    /// LAME buffers internally, so the returned bytes may be empty for the
    /// first few chunks; that is normal.
    pub fn encode_chunk(&mut self, chunk: &Chunk) -> Bytes {
        let pcm = MonoPcm(chunk.samples());
        let mut out: Vec<u8> = Vec::new();
        out.reserve(mp3lame_encoder::max_required_buffer_size(
            chunk.samples().len(),
        ));
        match self.encoder.encode(pcm, out.spare_capacity_mut()) {
            Ok(written) => {
                // SAFETY: `encode` initialized exactly `written` bytes of the
                // spare capacity we handed it.
                unsafe { out.set_len(written) };
                Bytes::from(out)
            }
            Err(err) => {
                log::warn!("[Mp3] Encode error (dropping chunk): {}", err);
                Bytes::new()
            }
        }
    }

    /// Flushes any buffered audio out of the encoder.
    pub fn finish(mut self) -> Bytes {
        let mut out: Vec<u8> = Vec::new();
        out.reserve(mp3lame_encoder::max_required_buffer_size(0));
        match self.encoder.flush::<FlushNoGap>(out.spare_capacity_mut()) {
            Ok(written) => {
                // SAFETY: `flush` initialized exactly `written` bytes.
                unsafe { out.set_len(written) };
                Bytes::from(out)
            }
            Err(err) => {
                log::warn!("[Mp3] Flush error: {}", err);
                Bytes::new()
            }
        }
    }
}
