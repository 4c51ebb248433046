//! Configuration for the DJ Link protocol runtime.
//!
//! This crate holds the tunables the rest of the workspace treats as
//! constants — ports, timeouts, batch sizes — in one place: compiled
//! defaults, optionally overridden by a single TOML file.
//!
//! # Example
//!
//! ```rust,no_run
//! use link_config::LinkConfig;
//!
//! let config = LinkConfig::load().expect("failed to load config");
//! println!("beat port: {}", config.beat_port);
//! ```

pub mod loader;

pub use loader::ConfigSources;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse {
        path: std::path::PathBuf,
        message: String,
    },
}

/// Which waveform rendering style to prefer when a player offers more than
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformStyle {
    Blue,
    Rgb,
    ThreeBand,
}

impl Default for WaveformStyle {
    fn default() -> Self {
        WaveformStyle::ThreeBand
    }
}

/// Runtime configuration for the link protocol stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// UDP port devices announce their presence on.
    pub announcement_port: u16,
    /// UDP port beat/tempo packets are broadcast on.
    pub beat_port: u16,
    /// Base TCP port the DbServer protocol is reachable on.
    pub dbserver_port: u16,

    /// How often the device-presence reaper wakes, in milliseconds.
    pub reaper_interval_ms: u64,
    /// How long a device may go unseen before it's considered lost, in
    /// milliseconds.
    pub expiry_interval_ms: u64,

    /// Deadline for an ordinary DbServer request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline for acquiring the re-entrant menu lock, in milliseconds.
    pub menu_timeout_ms: u64,
    /// Number of menu items requested per `RENDER_MENU_REQ` round trip.
    pub menu_batch_size: u32,

    /// Capacity of the waveform/metadata fetch intake queue.
    pub fetch_queue_capacity: usize,
    /// How long an `UNANALYZED` track is retried before giving up, in
    /// milliseconds.
    pub maximum_analysis_wait_ms: u64,
    /// Delay between `UNANALYZED` retry attempts, in milliseconds.
    pub analysis_update_interval_ms: u64,

    /// Preferred waveform rendering style.
    pub waveform_style: WaveformStyle,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            announcement_port: 50000,
            beat_port: 50001,
            dbserver_port: 1051,

            reaper_interval_ms: 1000,
            expiry_interval_ms: 10_000,

            request_timeout_ms: 10_000,
            menu_timeout_ms: 20_000,
            menu_batch_size: 64,

            fetch_queue_capacity: 100,
            maximum_analysis_wait_ms: 20_000,
            analysis_update_interval_ms: 2_000,

            waveform_style: WaveformStyle::default(),
        }
    }
}

impl LinkConfig {
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn menu_timeout(&self) -> Duration {
        Duration::from_millis(self.menu_timeout_ms)
    }

    pub fn maximum_analysis_wait(&self) -> Duration {
        Duration::from_millis(self.maximum_analysis_wait_ms)
    }

    pub fn analysis_update_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_update_interval_ms)
    }

    /// Load configuration: compiled defaults, optionally overridden by a
    /// TOML file discovered via [`loader::discover_config_file`].
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path instead of the
    /// discovered default location.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where it came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = LinkConfig::default();

        if let Some(path) = loader::discover_config_file(config_path) {
            config = loader::load_from_file(&path)?;
            sources.file = Some(path);
        }

        Ok((config, sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_nominal_values() {
        let config = LinkConfig::default();
        assert_eq!(config.announcement_port, 50000);
        assert_eq!(config.beat_port, 50001);
        assert_eq!(config.dbserver_port, 1051);
        assert_eq!(config.expiry_interval_ms, 10_000);
        assert_eq!(config.menu_batch_size, 64);
        assert_eq!(config.fetch_queue_capacity, 100);
        assert_eq!(config.maximum_analysis_wait_ms, 20_000);
        assert_eq!(config.analysis_update_interval_ms, 2_000);
    }

    #[test]
    fn load_without_a_file_returns_defaults() {
        let config = LinkConfig::load().unwrap();
        assert_eq!(config, LinkConfig::default());
    }
}
