//! Service construction and wiring.
//!
//! Everything is built explicitly at process start and injected; there are
//! no process-wide singletons. The desktop shell and the headless server
//! both consume [`bootstrap_services`] and differ only in which media
//! control and topology implementations they pass in.

use std::sync::Arc;

use crate::api::AppState;
use crate::channel::manager::ChannelManager;
use crate::context::NetworkContext;
use crate::error::{SonoriumError, SonoriumResult};
use crate::player::LocalStreamPlayer;
use crate::session::cycle::{spawn_cycle_ticker, CycleManager};
use crate::session::manager::SessionManager;
use crate::speakers::{MediaControl, SpeakerTopology};
use crate::state::{Config, StateStore};
use crate::theme::library::ThemeLibrary;

/// Container for all core services.
pub struct BootstrappedServices {
    pub config: Arc<Config>,
    pub store: Arc<StateStore>,
    pub library: Arc<ThemeLibrary>,
    pub channels: Arc<ChannelManager>,
    pub cycle: Arc<CycleManager>,
    pub player: Arc<LocalStreamPlayer>,
    pub sessions: Arc<SessionManager>,
    pub network: NetworkContext,
}

/// Builds and wires all core services.
pub fn bootstrap_services(
    config: Config,
    network: NetworkContext,
    media: Arc<dyn MediaControl>,
    topology: Arc<dyn SpeakerTopology>,
) -> SonoriumResult<BootstrappedServices> {
    config
        .validate()
        .map_err(|message| SonoriumError::InvalidRequest(format!("configuration: {message}")))?;

    let store = Arc::new(match &config.state_file {
        Some(path) => StateStore::load(path),
        None => StateStore::ephemeral(),
    });
    let library = Arc::new(ThemeLibrary::new(config.themes_dir.clone()));
    let channels = Arc::new(ChannelManager::new(
        config.channel_count,
        config.ring_capacity,
        config.output_gain,
    ));
    let cycle = Arc::new(CycleManager::new());
    let player = Arc::new(LocalStreamPlayer::new());
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&store),
        topology,
        media,
        Arc::clone(&channels),
        Arc::clone(&library),
        Arc::clone(&player),
        network.clone(),
        Arc::clone(&cycle),
        config.max_sessions,
    ));

    Ok(BootstrappedServices {
        config: Arc::new(config),
        store,
        library,
        channels,
        cycle,
        player,
        sessions,
        network,
    })
}

impl BootstrappedServices {
    /// Spawns long-running background tasks (the theme rotation ticker).
    pub fn start_background_tasks(&self) -> tokio::task::JoinHandle<()> {
        spawn_cycle_ticker(Arc::clone(&self.sessions), Arc::clone(&self.cycle))
    }

    /// Builds the HTTP layer's shared state.
    pub fn app_state(&self) -> AppState {
        AppState {
            library: Arc::clone(&self.library),
            sessions: Arc::clone(&self.sessions),
            channels: Arc::clone(&self.channels),
            player: Arc::clone(&self.player),
            network: self.network.clone(),
            config: Arc::clone(&self.config),
        }
    }

    /// Winds everything down: generators joined, local playback stopped.
    pub fn shutdown(&self) {
        self.player.stop();
        self.channels.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speakers::{NullMediaControl, StaticTopology};

    #[test]
    fn bootstrap_builds_the_channel_pool() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            themes_dir: dir.path().to_path_buf(),
            channel_count: 4,
            ..Default::default()
        };
        let services = bootstrap_services(
            config,
            NetworkContext::loopback(),
            Arc::new(NullMediaControl),
            Arc::new(StaticTopology::new()),
        )
        .unwrap();
        assert_eq!(services.channels.all().len(), 4);
        assert!(services.library.list().is_empty());
        services.shutdown();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            channel_count: 0,
            ..Default::default()
        };
        let result = bootstrap_services(
            config,
            NetworkContext::loopback(),
            Arc::new(NullMediaControl),
            Arc::new(StaticTopology::new()),
        );
        assert!(matches!(result, Err(SonoriumError::InvalidRequest(_))));
    }
}
