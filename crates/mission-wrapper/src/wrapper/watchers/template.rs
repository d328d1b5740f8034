//! Template-change poller
//!
//! Polls the head commit of the mission's template repository and reports
//! when it moves.

use super::Notifier;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of the template's current commit.
#[async_trait]
pub trait CommitSource: Send + Sync {
    async fn current_commit(&self) -> Result<String>;
}

/// `git rev-parse HEAD` in a local checkout.
#[derive(Debug, Clone)]
pub struct GitCommitSource {
    repo_dir: PathBuf,
}

impl GitCommitSource {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

#[async_trait]
impl CommitSource for GitCommitSource {
    async fn current_commit(&self) -> Result<String> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&self.repo_dir)
            .args(["rev-parse", "HEAD"])
            .output()
            .await
            .context("Failed to run git rev-parse")?;
        if !output.status.success() {
            bail!(
                "git rev-parse HEAD failed in {}: {}",
                self.repo_dir.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Remembers the last observed commit.
#[derive(Debug, Default)]
pub struct CommitTracker {
    last: Option<String>,
}

impl CommitTracker {
    /// Record an observation; returns the commit when it differs from the
    /// previous one. The first observation only seeds the tracker.
    pub fn observe(&mut self, commit: &str) -> Option<String> {
        match self.last.as_deref() {
            None => {
                debug!("Template baseline commit {commit}");
                self.last = Some(commit.to_string());
                None
            }
            Some(prev) if prev == commit => None,
            Some(_) => {
                self.last = Some(commit.to_string());
                Some(commit.to_string())
            }
        }
    }
}

/// Poll `source` every `interval` until cancelled.
pub async fn poll_template(
    source: Arc<dyn CommitSource>,
    interval: Duration,
    notifier: Notifier<String>,
    cancel: CancellationToken,
) {
    let mut tracker = CommitTracker::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match source.current_commit().await {
            Ok(commit) => {
                if let Some(changed) = tracker.observe(&commit) {
                    info!("Template moved to {changed}");
                    notifier.notify(changed);
                }
            }
            Err(e) => warn!("Template poll failed: {e:#}"),
        }
    }
    debug!("Template poller stopped");
}
