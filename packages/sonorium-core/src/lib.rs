//! Sonorium Core - ambient soundscape engine.
//!
//! Continuously mixes the audio tracks of a theme (forest, tavern,
//! rainstorm) into a single stream delivered to the local sound card and,
//! via persistent HTTP MP3 broadcast channels, to network speakers.
//!
//! # Architecture
//!
//! - [`audio`]: canonical PCM format, decoding, MP3 encoding
//! - [`theme`]: folder-backed themes, per-track settings, presets
//! - [`engine`]: per-track streams, exclusive arbitration, the theme mixer
//! - [`channel`]: broadcast channels, per-listener clients, the pool
//! - [`session`]: session CRUD, playback orchestration, theme rotation
//! - [`speakers`]: capability traits for network speaker control
//! - [`player`]: local playback of a channel stream
//! - [`api`]: the Axum HTTP layer (streaming + REST control surface)
//! - [`state`]: configuration and the persistent state file
//! - [`error`]: centralized error types
//!
//! Device protocols (Chromecast, Sonos, UPnP/DLNA, AirPlay), discovery,
//! and UI shells are external: they implement the traits in [`speakers`]
//! and call the operations exposed here.

#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod channel;
pub mod context;
pub mod engine;
pub mod error;
pub mod player;
pub mod session;
pub mod speakers;
pub mod state;
pub mod theme;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, ServerError};
pub use audio::{Chunk, CHUNK_SAMPLES, SAMPLE_RATE};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use channel::manager::ChannelManager;
pub use channel::{Channel, ChannelState};
pub use context::{IpDetector, NetworkContext, NetworkError, SystemIpDetector};
pub use engine::{ExclusionCoordinator, ThemeStream, TrackStreamKind};
pub use error::{SonoriumError, SonoriumResult};
pub use player::LocalStreamPlayer;
pub use session::cycle::CycleManager;
pub use session::manager::{CreateSessionRequest, SessionManager, SessionUpdate};
pub use session::{CycleConfig, Session, SpeakerGroup, SpeakerSelection};
pub use speakers::{MediaControl, NullMediaControl, SpeakerTopology, StaticTopology};
pub use state::{Config, StateStore};
pub use theme::library::ThemeLibrary;
pub use theme::{Preset, Theme, ThemeMetadata};
