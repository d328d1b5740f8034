//! Configuration discovery and resolution

use super::types::{SecretBackend, WrapperConfig};
use crate::paths::RootPaths;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("TOML parsing error in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Explicit config file; must exist and parse
    pub config_path: Option<PathBuf>,
    /// Override the agent executable
    pub agent_command: Option<String>,
    /// Disable credential synchronization
    pub no_credential_sync: bool,
}

/// Resolve wrapper configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables
/// 3. Config file (`--config`, else `<root>/config/wrapper.toml`)
/// 4. Defaults
pub fn resolve_config(
    overrides: &ConfigOverrides,
    root: &RootPaths,
) -> Result<WrapperConfig, ConfigError> {
    let mut config = match overrides.config_path {
        Some(ref explicit) => load_config_file(explicit)?,
        None => {
            let default_path = root.wrapper_config_file();
            if default_path.exists() {
                match load_config_file(&default_path) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("Ignoring unreadable wrapper config: {e}");
                        WrapperConfig::default()
                    }
                }
            } else {
                WrapperConfig::default()
            }
        }
    };

    apply_env_overrides(&mut config);
    apply_cli_overrides(&mut config, overrides);

    Ok(config)
}

/// Load config from a TOML file
fn load_config_file(path: &Path) -> Result<WrapperConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut WrapperConfig) {
    if let Ok(command) = std::env::var("MISSION_AGENT_COMMAND") {
        if !command.trim().is_empty() {
            config.agent.command = command.trim().to_string();
        }
    }

    if let Ok(backend) = std::env::var("MISSION_SECRET_BACKEND") {
        match SecretBackend::parse(&backend) {
            Some(parsed) => config.credentials.backend = parsed,
            None => warn!("Ignoring unknown MISSION_SECRET_BACKEND value {backend:?}"),
        }
    }

    if let Ok(sync) = std::env::var("MISSION_CREDENTIAL_SYNC") {
        match sync.trim().to_ascii_lowercase().as_str() {
            "0" | "false" | "off" | "no" => config.credentials.enabled = false,
            "1" | "true" | "on" | "yes" => config.credentials.enabled = true,
            _ => warn!("Ignoring unknown MISSION_CREDENTIAL_SYNC value {sync:?}"),
        }
    }
}

/// Apply command-line overrides
fn apply_cli_overrides(config: &mut WrapperConfig, overrides: &ConfigOverrides) {
    if let Some(ref command) = overrides.agent_command {
        config.agent.command = command.clone();
    }

    if overrides.no_credential_sync {
        config.credentials.enabled = false;
    }
}
