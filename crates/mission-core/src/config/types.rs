//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete wrapper configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WrapperConfig {
    /// How to launch the agent
    #[serde(default)]
    pub agent: AgentConfig,
    /// Poll intervals, debounces and deadlines
    #[serde(default)]
    pub timing: TimingConfig,
    /// Credential synchronization
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Agent launch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable
    pub command: String,
    /// Arguments passed on every launch
    pub args: Vec<String>,
    /// Extra arguments for a resumed launch (continue the last session)
    pub resume_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            resume_args: vec!["--continue".to_string()],
        }
    }
}

/// Timing knobs. All values are whole seconds or milliseconds as named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub template_poll_secs: u64,
    pub global_config_debounce_ms: u64,
    pub remote_ref_debounce_secs: u64,
    pub idle_debounce_ms: u64,
    pub credential_upward_secs: u64,
    pub credential_downward_debounce_ms: u64,
    pub token_check_secs: u64,
    pub token_warning_secs: u64,
    pub socket_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            template_poll_secs: 10,
            global_config_debounce_ms: 500,
            remote_ref_debounce_secs: 5,
            idle_debounce_ms: 50,
            credential_upward_secs: 60,
            credential_downward_debounce_ms: 1000,
            token_check_secs: 60,
            token_warning_secs: 3600,
            socket_timeout_ms: 5000,
        }
    }
}

impl TimingConfig {
    pub fn template_poll(&self) -> Duration {
        Duration::from_secs(self.template_poll_secs.max(1))
    }

    pub fn global_config_debounce(&self) -> Duration {
        Duration::from_millis(self.global_config_debounce_ms)
    }

    pub fn remote_ref_debounce(&self) -> Duration {
        Duration::from_secs(self.remote_ref_debounce_secs)
    }

    pub fn idle_debounce(&self) -> Duration {
        Duration::from_millis(self.idle_debounce_ms)
    }

    pub fn credential_upward(&self) -> Duration {
        Duration::from_secs(self.credential_upward_secs.max(1))
    }

    pub fn credential_downward_debounce(&self) -> Duration {
        Duration::from_millis(self.credential_downward_debounce_ms)
    }

    pub fn token_check(&self) -> Duration {
        Duration::from_secs(self.token_check_secs.max(1))
    }

    pub fn token_warning(&self) -> Duration {
        Duration::from_secs(self.token_warning_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms.max(1))
    }
}

/// Where credential blobs live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretBackend {
    /// Owner-only files under `<root>/secrets`
    File,
    /// OS credential manager (requires the `keyring` feature)
    Keyring,
}

impl SecretBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "keyring" => Some(Self::Keyring),
            _ => None,
        }
    }
}

/// Credential synchronization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Run the upward/downward sync tasks
    pub enabled: bool,
    pub backend: SecretBackend,
    /// Shared key; the per-mission key is `<service>-<mission id>`
    pub service: String,
    /// Restart the agent (gracefully) after pulling newer credentials
    pub restart_on_pull: bool,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: SecretBackend::File,
            service: "Claude Code-credentials".to_string(),
            restart_on_pull: false,
        }
    }
}

impl CredentialsConfig {
    pub fn shared_key(&self) -> String {
        self.service.clone()
    }

    pub fn local_key(&self, mission_id: &str) -> String {
        format!("{}-{mission_id}", self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WrapperConfig::default();
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.agent.resume_args, vec!["--continue"]);
        assert_eq!(config.timing.template_poll(), Duration::from_secs(10));
        assert_eq!(config.timing.token_warning(), Duration::from_secs(3600));
        assert!(config.credentials.enabled);
        assert!(!config.credentials.restart_on_pull);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: WrapperConfig = toml::from_str(
            r#"
[agent]
command = "/opt/bin/claude"

[timing]
credential_upward_secs = 30
"#,
        )
        .unwrap();

        assert_eq!(config.agent.command, "/opt/bin/claude");
        assert_eq!(config.agent.resume_args, vec!["--continue"]);
        assert_eq!(config.timing.credential_upward_secs, 30);
        assert_eq!(config.timing.template_poll_secs, 10);
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let timing = TimingConfig {
            template_poll_secs: 0,
            token_check_secs: 0,
            ..Default::default()
        };
        assert_eq!(timing.template_poll(), Duration::from_secs(1));
        assert_eq!(timing.token_check(), Duration::from_secs(1));
    }

    #[test]
    fn test_credential_keys() {
        let creds = CredentialsConfig::default();
        assert_eq!(creds.shared_key(), "Claude Code-credentials");
        assert_eq!(creds.local_key("m1"), "Claude Code-credentials-m1");
    }

    #[test]
    fn test_secret_backend_parse() {
        assert_eq!(SecretBackend::parse("File"), Some(SecretBackend::File));
        assert_eq!(SecretBackend::parse(" keyring "), Some(SecretBackend::Keyring));
        assert_eq!(SecretBackend::parse("vault"), None);
    }
}
