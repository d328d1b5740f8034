//! Agent idle-signal watcher
//!
//! Hooks inside the agent write `idle` to the mission's `claude-state` file
//! when a turn ends. This is a second idle source next to `claude_update`
//! `Stop` events on the control socket.

use super::{Notifier, file_named, notifier, watch_directory};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Content of the state file that means "idle".
pub const IDLE_MARKER: &str = "idle";

/// Whether the state file currently reports idle.
pub fn read_idle_signal(state_file: &Path) -> bool {
    std::fs::read_to_string(state_file)
        .map(|contents| contents.trim() == IDLE_MARKER)
        .unwrap_or(false)
}

/// Start watching `state_file`; `notifier` fires after each settled write
/// that leaves the file reading `idle`.
pub fn spawn_idle_watcher(
    state_file: PathBuf,
    debounce: Duration,
    out: Notifier<()>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let dir = state_file
        .parent()
        .context("State file has no parent directory")?
        .to_path_buf();
    let name = state_file
        .file_name()
        .context("State file has no file name")?
        .to_string_lossy()
        .into_owned();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let (tx, mut rx) = notifier("claude-state");
    watch_directory(&dir, file_named(name), debounce, tx, cancel.clone())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    if event.is_none() {
                        break;
                    }
                    if read_idle_signal(&state_file) {
                        out.notify(());
                    } else {
                        debug!("Agent state file changed but not idle");
                    }
                }
            }
        }
    }))
}
