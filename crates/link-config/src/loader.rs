//! Config file discovery and TOML loading.

use crate::{ConfigError, LinkConfig};
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// The config file that was loaded, if any.
    pub file: Option<PathBuf>,
}

/// Discover the config file to load: a CLI-supplied path if given and
/// present, otherwise `link.toml` under the project's config directory
/// (via `directories::ProjectDirs`) if it exists.
pub fn discover_config_file(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    let project_dirs = directories::ProjectDirs::from("org", "beatlink", "beatlink")?;
    let candidate = project_dirs.config_dir().join("link.toml");
    candidate.exists().then_some(candidate)
}

/// Load and parse a `LinkConfig` from a TOML file.
pub fn load_from_file(path: &Path) -> Result<LinkConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_without_cli_path_or_project_dir_file_returns_none() {
        // No link.toml exists under this test environment's config dir.
        assert!(discover_config_file(None).is_none());
    }

    #[test]
    fn load_from_file_parses_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link.toml");
        std::fs::write(&path, "beat_port = 60001\nmenu_batch_size = 16\n").unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.beat_port, 60001);
        assert_eq!(config.menu_batch_size, 16);
        assert_eq!(config.announcement_port, LinkConfig::default().announcement_port);
    }
}
