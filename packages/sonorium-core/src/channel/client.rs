//! Per-listener MP3 view of a channel.
//!
//! Every HTTP client owns one `ChannelClient`: a read cursor into the
//! channel's broadcast ring plus a private MP3 encoder. Clients that stall
//! simply lose chunks off the ring's tail and catch up at the current
//! sequence; they never block the generator or each other.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::audio::mp3::{Mp3Encoder, Mp3Error};
use crate::audio::Chunk;

use super::Channel;

/// Result of one poll of the ring.
pub struct PolledAudio {
    /// Encoded MP3 bytes; may be empty while the encoder primes.
    pub bytes: Bytes,
    /// True when the ring had nothing new and a silence keepalive was
    /// encoded instead; the caller should sleep briefly before polling
    /// again.
    pub caught_up: bool,
}

/// One listener's cursor + encoder over a channel.
pub struct ChannelClient {
    channel: Arc<Channel>,
    encoder: Option<Mp3Encoder>,
    last_sequence: u64,
}

impl ChannelClient {
    /// Registers a new listener, starting at the channel's current
    /// sequence.
    pub fn connect(channel: Arc<Channel>) -> Result<Self, Mp3Error> {
        let encoder = Mp3Encoder::new()?;
        let last_sequence = channel.current_sequence();
        channel.client_connected();
        Ok(Self {
            channel,
            encoder: Some(encoder),
            last_sequence,
        })
    }

    /// The channel this client reads from.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Encodes everything that arrived since the last poll.
    ///
    /// When nothing new is buffered, one silence chunk is encoded to keep
    /// the byte stream alive.
    pub fn poll(&mut self) -> PolledAudio {
        let Some(encoder) = self.encoder.as_mut() else {
            return PolledAudio {
                bytes: Bytes::new(),
                caught_up: true,
            };
        };

        let entries = self.channel.chunks_since(self.last_sequence);
        if entries.is_empty() {
            return PolledAudio {
                bytes: encoder.encode_chunk(&Chunk::silence()),
                caught_up: true,
            };
        }

        let mut out = BytesMut::new();
        for (sequence, chunk) in entries {
            self.last_sequence = sequence;
            out.extend_from_slice(&encoder.encode_chunk(&chunk));
        }
        PolledAudio {
            bytes: out.freeze(),
            caught_up: false,
        }
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        // Both must happen on every exit path: the listener count feeds the
        // channel status, and the encoder flush frees LAME state.
        self.channel.client_disconnected();
        if let Some(encoder) = self.encoder.take() {
            let _ = encoder.finish();
        }
    }
}
