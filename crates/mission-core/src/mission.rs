//! Mission identity handed to the wrapper.
//!
//! Missions are created and destroyed elsewhere; the wrapper only reads
//! `mission.json` to learn which template and upstream remote it follows.

use crate::paths::MissionPaths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// On-disk `mission.json` contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MissionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    git_remote: Option<String>,
}

/// One unit of supervised work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mission {
    pub id: String,
    /// Working directory of the agent process.
    pub agent_dir: PathBuf,
    /// Template repository name in the shared repo library.
    pub template: Option<String>,
    /// Upstream git remote reference (e.g. `github.com/acme/widgets`).
    pub git_remote: Option<String>,
}

impl Mission {
    /// Load the mission from its directory.
    ///
    /// A missing `mission.json` yields a mission with no template and no
    /// remote; a malformed one is an error.
    pub fn load(id: &str, paths: &MissionPaths) -> anyhow::Result<Self> {
        let record_path = paths.mission_file();
        let record = match std::fs::read_to_string(&record_path) {
            Ok(contents) => serde_json::from_str::<MissionRecord>(&contents).map_err(|e| {
                anyhow::anyhow!("Invalid mission record {}: {e}", record_path.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No mission record at {}", record_path.display());
                MissionRecord::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read mission record {}: {e}",
                    record_path.display()
                ));
            }
        };

        Ok(Self {
            id: id.to_string(),
            agent_dir: paths.agent_dir(),
            template: record.template.filter(|t| !t.trim().is_empty()),
            git_remote: record.git_remote.filter(|r| !r.trim().is_empty()),
        })
    }

    /// First eight characters of the id, used in log lines and keys.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}
