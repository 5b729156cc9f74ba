//! The fixed channel pool.
//!
//! Channels are created once at startup, numbered 1..N, and never
//! destroyed. Assignment bookkeeping (which session uses which channel)
//! lives in the session manager; this type only owns the channels.

use std::sync::Arc;

use super::{Channel, ChannelState, ChannelStatus};

/// Owner of the fixed pool of broadcast channels.
pub struct ChannelManager {
    channels: Vec<Arc<Channel>>,
}

impl ChannelManager {
    /// Creates `count` channels numbered 1..=count.
    pub fn new(count: u32, ring_capacity: usize, output_gain: f32) -> Self {
        let channels = (1..=count)
            .map(|id| Arc::new(Channel::new(id, ring_capacity, output_gain)))
            .collect();
        log::info!("[Channels] Initialized pool of {count} channel(s)");
        Self { channels }
    }

    /// Looks up a channel by id.
    pub fn get_channel(&self, channel_id: u32) -> Option<Arc<Channel>> {
        self.channels
            .iter()
            .find(|c| c.id() == channel_id)
            .cloned()
    }

    /// All channels in id order.
    pub fn all(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    /// The lowest-numbered idle channel, or `None` when all are busy.
    pub fn get_available_channel(&self) -> Option<Arc<Channel>> {
        self.channels
            .iter()
            .find(|c| c.state() == ChannelState::Idle)
            .cloned()
    }

    /// Number of channels currently playing.
    pub fn active_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.state() == ChannelState::Playing)
            .count()
    }

    /// Serialized status of every channel, for the API.
    pub fn status(&self) -> Vec<ChannelStatus> {
        self.channels.iter().map(|c| c.status()).collect()
    }

    /// Stops every generator thread. Called on process shutdown.
    pub fn shutdown_all(&self) {
        for channel in &self.channels {
            channel.shutdown();
        }
    }
}
