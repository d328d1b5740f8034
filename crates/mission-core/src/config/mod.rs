//! Configuration resolution
//!
//! Resolves wrapper configuration from multiple sources with priority:
//! 1. Command-line flags (passed as parameters)
//! 2. Environment variables
//! 3. Config file (`--config`, else `<root>/config/wrapper.toml`)
//! 4. Defaults

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, resolve_config};
pub use types::{AgentConfig, CredentialsConfig, SecretBackend, TimingConfig, WrapperConfig};
