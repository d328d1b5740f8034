//! Change watchers
//!
//! Every watcher is a pure producer: it reports "something changed" through a
//! [`Notifier`] and never touches lifecycle state. Notifiers have capacity 1
//! and drop sends when full, so a burst of changes collapses into a single
//! pending notification for the event loop.

pub mod global_config;
pub mod idle;
pub mod remote_ref;
pub mod template;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Sending half of a collapsing, capacity-1 notification channel.
#[derive(Debug)]
pub struct Notifier<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> Notifier<T> {
    /// Queue a notification. Returns `false` when one is already pending or
    /// the receiver is gone.
    pub fn notify(&self, value: T) -> bool {
        match self.tx.try_send(value) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("{} notification already pending", self.name);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("{} notification receiver closed", self.name);
                false
            }
        }
    }
}

/// Create a notification channel for the named source.
pub fn notifier<T>(name: &'static str) -> (Notifier<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (Notifier { name, tx }, rx)
}

/// Watch `dir` (non-recursively) and notify once per quiet period after any
/// create or modify event on a file accepted by `filter`.
///
/// The debounce is trailing: the notification fires once no matching event
/// has arrived for `debounce`. Watching the directory rather than the file
/// keeps working when files are replaced by rename.
pub fn watch_directory<F>(
    dir: &Path,
    filter: F,
    debounce: Duration,
    out: Notifier<()>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>>
where
    F: Fn(&Path) -> bool + Send + 'static,
{
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<()>();

    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, &filter) {
                    let _ = raw_tx.send(());
                }
            }
            Err(e) => error!("File system watcher error: {e}"),
        })
        .context("Failed to create file system watcher")?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;

    let dir: PathBuf = dir.to_path_buf();
    info!("Watching {} for changes", dir.display());

    Ok(tokio::spawn(async move {
        // Owned here so the OS watch lives exactly as long as this task.
        let _watcher = watcher;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = raw_rx.recv() => {
                    if event.is_none() {
                        break;
                    }
                }
            }

            // Quiet period: restart the timer on every further event.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(debounce) => break,
                    event = raw_rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                    }
                }
            }

            debug!("Change settled in {}", dir.display());
            out.notify(());
        }
        debug!("Watcher for {} stopped", dir.display());
    }))
}

fn is_relevant<F>(event: &Event, filter: &F) -> bool
where
    F: Fn(&Path) -> bool,
{
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|path| filter(path))
}

/// Filter accepting paths whose file name is `name`.
pub(crate) fn file_named(name: impl Into<String>) -> impl Fn(&Path) -> bool + Send + 'static {
    let name = name.into();
    move |path: &Path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == name)
    }
}
