//! Server configuration.
//!
//! Three layers, most specific wins: CLI flags (with their env fallbacks,
//! both handled by clap), then the optional YAML file, then built-in
//! defaults. The file schema is all-optional, so a partial file only pins
//! the settings it names.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::Args;

/// Overrides as they may appear in the YAML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    bind_port: Option<u16>,
    advertise_ip: Option<IpAddr>,
    themes_dir: Option<PathBuf>,
    state_file: Option<PathBuf>,
    channel_count: Option<u32>,
    max_sessions: Option<usize>,
    output_gain: Option<f32>,
    default_volume: Option<u8>,
}

impl FileConfig {
    fn read(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// The fully resolved server configuration.
#[derive(Debug)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    pub bind_port: u16,
    /// IP advertised to network speakers; `None` means auto-detect.
    pub advertise_ip: Option<IpAddr>,
    /// Directory scanned for theme folders.
    pub themes_dir: PathBuf,
    /// Persistent state file; `None` keeps state in memory only.
    pub state_file: Option<PathBuf>,
    /// Number of broadcast channels in the pool.
    pub channel_count: u32,
    /// Maximum number of sessions.
    pub max_sessions: usize,
    /// Gain applied after mixing, before clamping.
    pub output_gain: f32,
    /// Default volume for new sessions (0-100).
    pub default_volume: u8,
}

impl ServerConfig {
    /// Merges CLI/env arguments over the YAML file over the defaults.
    pub fn resolve(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };

        Ok(Self {
            bind_port: args.port.or(file.bind_port).unwrap_or(8008),
            advertise_ip: args.advertise_ip.or(file.advertise_ip),
            themes_dir: args
                .themes_dir
                .clone()
                .or(file.themes_dir)
                .unwrap_or_else(|| PathBuf::from("themes")),
            state_file: args.state_file.clone().or(file.state_file),
            channel_count: file.channel_count.unwrap_or(6),
            max_sessions: file.max_sessions.unwrap_or(20),
            output_gain: file.output_gain.unwrap_or(6.0),
            default_volume: file.default_volume.unwrap_or(50),
        })
    }

    /// The core engine's view of this configuration.
    pub fn core(&self) -> sonorium_core::Config {
        sonorium_core::Config {
            themes_dir: self.themes_dir.clone(),
            state_file: self.state_file.clone(),
            channel_count: self.channel_count,
            max_sessions: self.max_sessions,
            output_gain: self.output_gain,
            default_volume: self.default_volume,
            ..Default::default()
        }
    }
}
