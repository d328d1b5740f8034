//! Global agent-config watcher
//!
//! Watches `<root>/claude-config/` for writes to the files that feed every
//! mission's config tree. The event loop decides whether a settled change is
//! real by rebuilding the tree and comparing hashes.

use super::{Notifier, watch_directory};
use agent_mission_core::paths::GLOBAL_CONFIG_FILES;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Start watching `global_dir`, creating it when absent.
pub fn spawn_global_config_watcher(
    global_dir: &Path,
    debounce: Duration,
    notifier: Notifier<()>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    std::fs::create_dir_all(global_dir)
        .with_context(|| format!("Failed to create {}", global_dir.display()))?;

    watch_directory(
        global_dir,
        is_global_config_file,
        debounce,
        notifier,
        cancel,
    )
}

fn is_global_config_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| GLOBAL_CONFIG_FILES.contains(&n))
}
