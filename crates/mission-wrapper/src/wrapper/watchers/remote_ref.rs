//! Workspace remote-ref watcher
//!
//! When the agent fetches in its workspace, git rewrites
//! `.git/refs/remotes/origin/<default branch>`. After that settles, the shared
//! repo-library copy of the same remote is refreshed so new missions clone
//! from current history.

use super::{file_named, notifier, watch_directory};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_BRANCH: &str = "main";

/// Maintains the shared library clone of a remote.
#[async_trait]
pub trait RepoCache: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// `git fetch --force origin` in the library clone.
#[derive(Debug, Clone)]
pub struct GitRepoCache {
    repo_dir: PathBuf,
}

impl GitRepoCache {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

#[async_trait]
impl RepoCache for GitRepoCache {
    async fn refresh(&self) -> Result<()> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&self.repo_dir)
            .args(["fetch", "--force", "origin"])
            .output()
            .await
            .context("Failed to run git fetch")?;
        if !output.status.success() {
            bail!(
                "git fetch failed in {}: {}",
                self.repo_dir.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Default branch of `origin` in the workspace, from `origin/HEAD`.
pub fn default_branch(agent_dir: &Path) -> String {
    let head = agent_dir.join(".git/refs/remotes/origin/HEAD");
    std::fs::read_to_string(&head)
        .ok()
        .and_then(|contents| {
            contents
                .trim()
                .strip_prefix("ref: refs/remotes/origin/")
                .map(str::to_string)
        })
        .filter(|branch| !branch.is_empty())
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
}

/// Start the watcher. Returns `None` when the workspace has no remote refs
/// to watch.
pub fn spawn_remote_ref_watcher(
    agent_dir: &Path,
    cache: Arc<dyn RepoCache>,
    debounce: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let branch = default_branch(agent_dir);
    let ref_file = agent_dir.join(".git/refs/remotes/origin").join(&branch);
    let (Some(watch_dir), Some(file_name)) = (ref_file.parent(), ref_file.file_name()) else {
        return None;
    };
    if !watch_dir.is_dir() {
        warn!(
            "No remote refs at {}; remote-ref watcher disabled",
            watch_dir.display()
        );
        return None;
    }

    let (tx, mut rx) = notifier("remote ref");
    let watch = watch_directory(
        watch_dir,
        file_named(file_name.to_string_lossy()),
        debounce,
        tx,
        cancel.clone(),
    );
    if let Err(e) = watch {
        warn!("Remote-ref watcher disabled: {e:#}");
        return None;
    }

    debug!("Watching origin/{branch} in {}", agent_dir.display());
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    if event.is_none() {
                        break;
                    }
                    refresh(cache.as_ref()).await;
                }
            }
        }
    }))
}

async fn refresh(cache: &dyn RepoCache) {
    match cache.refresh().await {
        Ok(()) => info!("Refreshed repo library after workspace fetch"),
        Err(e) => warn!("Repo library refresh failed: {e:#}"),
    }
}
