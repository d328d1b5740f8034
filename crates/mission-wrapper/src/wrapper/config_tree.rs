//! Per-mission agent config tree
//!
//! The agent reads its settings from the mission's own `claude-config/`
//! directory (`CLAUDE_CONFIG_DIR`). How that tree is assembled is up to the
//! [`ConfigTree`] implementation; the wrapper only needs a content hash to
//! tell real changes from no-op rewrites.

use agent_mission_core::io::{atomic_write, compute_hash, remove_if_exists};
use agent_mission_core::paths::GLOBAL_CONFIG_FILES;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Builds the mission's config tree.
pub trait ConfigTree: Send + Sync {
    /// Rebuild the tree and return a hash of its contents.
    fn rebuild(&self) -> Result<String>;
}

/// Copies the global config files into the mission tree verbatim.
#[derive(Debug, Clone)]
pub struct CopyConfigTree {
    global_dir: PathBuf,
    mission_dir: PathBuf,
}

impl CopyConfigTree {
    pub fn new(global_dir: impl Into<PathBuf>, mission_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_dir: global_dir.into(),
            mission_dir: mission_dir.into(),
        }
    }

    pub fn mission_dir(&self) -> &Path {
        &self.mission_dir
    }
}

impl ConfigTree for CopyConfigTree {
    fn rebuild(&self) -> Result<String> {
        std::fs::create_dir_all(&self.mission_dir)
            .with_context(|| format!("Failed to create {}", self.mission_dir.display()))?;

        let mut digest_input = Vec::new();
        for name in GLOBAL_CONFIG_FILES {
            let source = self.global_dir.join(name);
            let target = self.mission_dir.join(name);
            match std::fs::read(&source) {
                Ok(contents) => {
                    atomic_write(&target, &contents)
                        .with_context(|| format!("Failed to write {}", target.display()))?;
                    digest_input.extend_from_slice(name.as_bytes());
                    digest_input.push(0);
                    digest_input.extend_from_slice(&contents);
                    digest_input.push(0);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    remove_if_exists(&target)
                        .with_context(|| format!("Failed to remove {}", target.display()))?;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read {}", source.display()));
                }
            }
        }
        Ok(compute_hash(&digest_input))
    }
}
