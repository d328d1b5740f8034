//! On-disk layout of the agent-mission root.
//!
//! ```text
//! <root>/
//!   config/wrapper.toml            wrapper configuration
//!   claude-config/                 global agent config (watched)
//!     settings.json
//!     CLAUDE.md
//!   repos/<name>/                  shared repository library
//!   cache/credentials-broadcast    upward-sync marker (epoch ms)
//!   secrets/                       file-backed secret store
//!   missions/<id>/
//!     mission.json
//!     wrapper.sock
//!     wrapper.pid
//!     claude-state                 idle/busy sentinel written by hooks
//!     statusline-message           warning text for the status display
//!     claude-config/               per-mission config tree
//!     agent/                       agent working directory
//! ```

use std::path::{Path, PathBuf};

/// Filenames inside the global config directory that trigger a rebuild.
pub const GLOBAL_CONFIG_FILES: [&str; 2] = ["settings.json", "CLAUDE.md"];

/// Paths that are shared by every mission under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPaths {
    root: PathBuf,
}

impl RootPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root from `MISSION_HOME` / the platform home directory.
    pub fn resolve() -> anyhow::Result<Self> {
        Ok(Self::new(crate::home::get_root_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn wrapper_config_file(&self) -> PathBuf {
        self.root.join("config/wrapper.toml")
    }

    pub fn global_config_dir(&self) -> PathBuf {
        self.root.join("claude-config")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    /// Directory of a repository in the shared library.
    ///
    /// Names such as `github.com/owner/repo` map onto nested directories.
    pub fn repo_dir(&self, name: &str) -> PathBuf {
        self.repos_dir().join(name.trim_matches('/'))
    }

    pub fn credentials_broadcast_file(&self) -> PathBuf {
        self.root.join("cache/credentials-broadcast")
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.root.join("secrets")
    }

    pub fn missions_dir(&self) -> PathBuf {
        self.root.join("missions")
    }

    pub fn mission(&self, mission_id: &str) -> MissionPaths {
        MissionPaths {
            dir: self.missions_dir().join(mission_id),
        }
    }
}

/// Paths scoped to one mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionPaths {
    dir: PathBuf,
}

impl MissionPaths {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mission_file(&self) -> PathBuf {
        self.dir.join("mission.json")
    }

    pub fn socket_file(&self) -> PathBuf {
        self.dir.join("wrapper.sock")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.join("wrapper.pid")
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join("claude-state")
    }

    pub fn statusline_message_file(&self) -> PathBuf {
        self.dir.join("statusline-message")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.dir.join("claude-config")
    }

    pub fn agent_dir(&self) -> PathBuf {
        self.dir.join("agent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mission_paths_layout() {
        let root = RootPaths::new("/tmp/am");
        let mission = root.mission("m-123");

        assert_eq!(mission.dir(), Path::new("/tmp/am/missions/m-123"));
        assert_eq!(
            mission.socket_file(),
            PathBuf::from("/tmp/am/missions/m-123/wrapper.sock")
        );
        assert_eq!(
            mission.state_file(),
            PathBuf::from("/tmp/am/missions/m-123/claude-state")
        );
        assert_eq!(
            mission.agent_dir(),
            PathBuf::from("/tmp/am/missions/m-123/agent")
        );
    }

    #[test]
    fn test_repo_dir_nested_name() {
        let root = RootPaths::new("/tmp/am");
        assert_eq!(
            root.repo_dir("github.com/acme/widgets"),
            PathBuf::from("/tmp/am/repos/github.com/acme/widgets")
        );
        assert_eq!(
            root.repo_dir("/acme/"),
            PathBuf::from("/tmp/am/repos/acme")
        );
    }

    #[test]
    fn test_shared_paths() {
        let root = RootPaths::new("/tmp/am");
        assert_eq!(
            root.credentials_broadcast_file(),
            PathBuf::from("/tmp/am/cache/credentials-broadcast")
        );
        assert_eq!(
            root.wrapper_config_file(),
            PathBuf::from("/tmp/am/config/wrapper.toml")
        );
    }
}
