//! Credential synchronization between a mission and the shared record.
//!
//! Each mission keeps its own credential blob (`<service>-<mission id>`) next
//! to one shared blob (`<service>`). Two background halves keep them
//! eventually consistent:
//!
//! - **Upward** (periodic): when the local blob's hash moves, merge it into
//!   the shared blob and bump the broadcast marker so other wrappers pull.
//! - **Downward** (reactive): when the marker moves past the last value this
//!   wrapper processed, merge the shared blob into the local one.
//!
//! Both halves only act while the wrapper is `Running`. Concurrent writers can
//! lose updates; the per-server merge rule keeps the newest token whenever
//! both sides are seen.

use super::state::SupervisorState;
use super::token_expiry::TokenExpiry;
use super::watchers::{Notifier, file_named, notifier, watch_directory};
use agent_mission_core::credentials::{SecretStore, merge_credentials, token_expiry_millis};
use agent_mission_core::io::{atomic_write, compute_hash};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hash of the local credential blob as last seen or written by this wrapper.
///
/// Written by both sync halves.
#[derive(Debug, Default)]
pub struct CredentialHash {
    inner: Mutex<Option<String>>,
}

impl CredentialHash {
    pub fn get(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn set(&self, hash: String) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some(hash);
        }
    }
}

/// Result of one upward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// No local credential exists yet.
    NoLocal,
    /// Local blob unchanged since the last pass.
    Unchanged,
    /// Local blob changed but the shared record already covered it.
    AlreadyShared,
    /// Shared record updated and the marker bumped.
    Pushed,
}

/// Result of one downward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Marker not newer than the last one processed.
    Stale,
    /// No shared credential exists yet.
    NoShared,
    /// Shared record held nothing new.
    Unchanged,
    /// Local blob rewritten with the merged record.
    Updated,
}

/// Both sync halves for one mission.
pub struct CredentialSync {
    store: Arc<dyn SecretStore>,
    local_key: String,
    shared_key: String,
    marker_path: PathBuf,
    hash: CredentialHash,
    expiry: Arc<TokenExpiry>,
    last_marker: AtomicI64,
}

impl std::fmt::Debug for CredentialSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSync")
            .field("local_key", &self.local_key)
            .field("shared_key", &self.shared_key)
            .field("marker_path", &self.marker_path)
            .finish_non_exhaustive()
    }
}

impl CredentialSync {
    pub fn new(
        store: Arc<dyn SecretStore>,
        local_key: impl Into<String>,
        shared_key: impl Into<String>,
        marker_path: impl Into<PathBuf>,
        expiry: Arc<TokenExpiry>,
    ) -> Self {
        Self {
            store,
            local_key: local_key.into(),
            shared_key: shared_key.into(),
            marker_path: marker_path.into(),
            hash: CredentialHash::default(),
            expiry,
            last_marker: AtomicI64::new(0),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    pub fn cached_hash(&self) -> Option<String> {
        self.hash.get()
    }

    /// Seed the token expiry cache from the local blob.
    pub fn load_expiry(&self) -> Result<()> {
        let local = self
            .store
            .read(&self.local_key)
            .context("Failed to read local credential")?;
        self.expiry
            .set(local.as_deref().and_then(token_expiry_millis));
        Ok(())
    }

    /// One upward pass: local → shared.
    pub fn push_local(&self) -> Result<PushOutcome> {
        let Some(local) = self
            .store
            .read(&self.local_key)
            .context("Failed to read local credential")?
        else {
            return Ok(PushOutcome::NoLocal);
        };

        let local_hash = compute_hash(local.as_bytes());
        if self.hash.get().as_deref() == Some(local_hash.as_str()) {
            return Ok(PushOutcome::Unchanged);
        }

        let shared = self
            .store
            .read(&self.shared_key)
            .context("Failed to read shared credential")?
            .unwrap_or_else(|| "{}".to_string());
        let outcome = merge_credentials(&shared, &local)?;

        let pushed = if outcome.changed {
            self.store
                .write(&self.shared_key, &outcome.merged)
                .context("Failed to write shared credential")?;
            let marker = self.bump_marker()?;
            self.last_marker.fetch_max(marker, Ordering::SeqCst);
            info!("Pushed credentials to shared record (marker {marker})");
            true
        } else {
            debug!("Shared credential already current");
            false
        };

        // The shared side may hold newer per-server tokens than ours.
        let final_local = if same_record(&outcome.merged, &local) {
            local
        } else {
            self.store
                .write(&self.local_key, &outcome.merged)
                .context("Failed to write local credential")?;
            debug!("Folded newer shared tokens into local credential");
            outcome.merged
        };

        self.hash.set(compute_hash(final_local.as_bytes()));
        self.expiry.set(token_expiry_millis(&final_local));

        Ok(if pushed {
            PushOutcome::Pushed
        } else {
            PushOutcome::AlreadyShared
        })
    }

    /// One downward pass if the marker moved past the last one processed.
    pub fn pull_if_newer(&self) -> Result<PullOutcome> {
        let Some(marker) = self.read_marker() else {
            return Ok(PullOutcome::Stale);
        };
        if marker <= self.last_marker.load(Ordering::SeqCst) {
            return Ok(PullOutcome::Stale);
        }
        let outcome = self.pull_shared()?;
        self.last_marker.fetch_max(marker, Ordering::SeqCst);
        Ok(outcome)
    }

    /// One downward pass regardless of the marker: shared → local.
    pub fn pull_shared(&self) -> Result<PullOutcome> {
        if let Some(marker) = self.read_marker() {
            self.last_marker.fetch_max(marker, Ordering::SeqCst);
        }

        let Some(shared) = self
            .store
            .read(&self.shared_key)
            .context("Failed to read shared credential")?
        else {
            return Ok(PullOutcome::NoShared);
        };
        let local = self
            .store
            .read(&self.local_key)
            .context("Failed to read local credential")?
            .unwrap_or_else(|| "{}".to_string());

        let outcome = merge_credentials(&local, &shared)?;
        if !outcome.changed {
            return Ok(PullOutcome::Unchanged);
        }

        self.store
            .write(&self.local_key, &outcome.merged)
            .context("Failed to write local credential")?;
        self.hash.set(compute_hash(outcome.merged.as_bytes()));
        self.expiry.set(token_expiry_millis(&outcome.merged));
        info!("Pulled newer credentials from shared record");
        Ok(PullOutcome::Updated)
    }

    /// Current broadcast marker value, if any.
    pub fn read_marker(&self) -> Option<i64> {
        std::fs::read_to_string(&self.marker_path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Write a marker strictly greater than the current one.
    fn bump_marker(&self) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self.read_marker().unwrap_or(0);
        let next = now.max(previous + 1);
        if let Some(parent) = self.marker_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        atomic_write(&self.marker_path, next.to_string().as_bytes())
            .with_context(|| format!("Failed to write {}", self.marker_path.display()))?;
        Ok(next)
    }
}

fn same_record(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<serde_json::Value>(a),
        serde_json::from_str::<serde_json::Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn is_running(state: &watch::Receiver<SupervisorState>) -> bool {
    *state.borrow() == SupervisorState::Running
}

/// Periodic upward sync until cancelled.
pub async fn run_upward(
    sync: Arc<CredentialSync>,
    interval: Duration,
    state: watch::Receiver<SupervisorState>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !is_running(&state) {
            debug!("Skipping upward credential sync while restarting");
            continue;
        }

        let task_sync = Arc::clone(&sync);
        match tokio::task::spawn_blocking(move || task_sync.push_local()).await {
            Ok(Ok(outcome)) => debug!("Upward credential sync: {outcome:?}"),
            Ok(Err(e)) => warn!("Upward credential sync failed: {e:#}"),
            Err(e) => warn!("Upward credential sync task failed: {e}"),
        }
    }
    debug!("Upward credential sync stopped");
}

/// What the downward half does after pulling new credentials.
#[derive(Debug, Clone)]
pub struct PullPolicy {
    /// Ask for a graceful restart after a changed pull.
    pub restart: Option<Notifier<()>>,
    /// Where the restart notice is shown.
    pub status_file: PathBuf,
}

/// Reactive downward sync until cancelled.
///
/// Pulls once as soon as the wrapper is running, then after every settled
/// marker change. A marker change seen while not `Running` is processed once
/// the wrapper is running again.
pub async fn run_downward(
    sync: Arc<CredentialSync>,
    debounce: Duration,
    mut state: watch::Receiver<SupervisorState>,
    policy: PullPolicy,
    cancel: CancellationToken,
) {
    let (tx, mut marker_rx) = notifier("credential marker");
    // Held so the receiver stays open even when the watch cannot start.
    let _keep_open = tx.clone();
    if let Err(e) = watch_marker(sync.marker_path(), debounce, tx, cancel.clone()) {
        warn!("Downward credential sync will only run at startup: {e:#}");
    }

    let mut initial_done = false;
    loop {
        if is_running(&state) {
            pull(&sync, !initial_done, &policy).await;
            initial_done = true;
        } else {
            debug!("Deferring downward credential sync while restarting");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = marker_rx.recv() => {}
        }
    }
    debug!("Downward credential sync stopped");
}

fn watch_marker(
    marker_path: &Path,
    debounce: Duration,
    tx: Notifier<()>,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let dir = marker_path
        .parent()
        .context("Marker path has no parent directory")?;
    let name = marker_path
        .file_name()
        .context("Marker path has no file name")?
        .to_string_lossy()
        .into_owned();
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    watch_directory(dir, file_named(name), debounce, tx, cancel)
}

async fn pull(sync: &Arc<CredentialSync>, initial: bool, policy: &PullPolicy) {
    let task_sync = Arc::clone(sync);
    let result = tokio::task::spawn_blocking(move || {
        if initial {
            task_sync.pull_shared()
        } else {
            task_sync.pull_if_newer()
        }
    })
    .await;

    match result {
        Ok(Ok(PullOutcome::Updated)) if !initial => {
            if let Some(restart) = &policy.restart {
                let notice = "Credentials updated; agent restarts when idle";
                if let Err(e) = atomic_write(&policy.status_file, notice.as_bytes()) {
                    warn!("Failed to write status message: {e}");
                }
                restart.notify(());
            }
        }
        Ok(Ok(outcome)) => debug!("Downward credential sync: {outcome:?}"),
        Ok(Err(e)) => warn!("Downward credential sync failed: {e:#}"),
        Err(e) => warn!("Downward credential sync task failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_mission_core::credentials::MemorySecretStore;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    const SERVICE: &str = "Claude Code-credentials";

    fn instance(store: &Arc<MemorySecretStore>, temp: &TempDir, id: &str) -> CredentialSync {
        CredentialSync::new(
            store.clone(),
            format!("{SERVICE}-{id}"),
            SERVICE,
            temp.path().join("cache/credentials-broadcast"),
            Arc::new(TokenExpiry::default()),
        )
    }

    fn blob(server: &str, token: &str, expires: i64) -> String {
        json!({
            "mcpOAuth": { server: { "accessToken": token, "expiresAt": expires } }
        })
        .to_string()
    }

    fn server_token(store: &MemorySecretStore, key: &str, server: &str) -> Option<String> {
        let raw = store.read(key).unwrap()?;
        let value: Value = serde_json::from_str(&raw).unwrap();
        value["mcpOAuth"][server]["accessToken"]
            .as_str()
            .map(str::to_string)
    }

    #[test]
    fn test_push_without_local_is_noop() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemorySecretStore::new());
        let sync = instance(&store, &temp, "m1");

        assert_eq!(sync.push_local().unwrap(), PushOutcome::NoLocal);
        assert!(store.read(SERVICE).unwrap().is_none());
        assert!(sync.read_marker().is_none());
    }

    #[test]
    fn test_push_writes_shared_and_strictly_increasing_marker() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemorySecretStore::new());
        let sync = instance(&store, &temp, "m1");

        // A marker from the future must still be exceeded.
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        std::fs::create_dir_all(temp.path().join("cache")).unwrap();
        std::fs::write(sync.marker_path(), future.to_string()).unwrap();

        store.write(&format!("{SERVICE}-m1"), &blob("srv", "A", 1000)).unwrap();
        assert_eq!(sync.push_local().unwrap(), PushOutcome::Pushed);
        assert_eq!(server_token(&store, SERVICE, "srv").as_deref(), Some("A"));
        assert_eq!(sync.read_marker(), Some(future + 1));

        // Unchanged local blob: nothing to do.
        assert_eq!(sync.push_local().unwrap(), PushOutcome::Unchanged);
    }

    #[test]
    fn test_push_does_not_trigger_own_pull() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemorySecretStore::new());
        let sync = instance(&store, &temp, "m1");

        store.write(&format!("{SERVICE}-m1"), &blob("srv", "A", 1000)).unwrap();
        sync.push_local().unwrap();
        assert_eq!(sync.pull_if_newer().unwrap(), PullOutcome::Stale);
    }

    #[test]
    fn test_two_instances_converge_on_newest_token() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemorySecretStore::new());
        let one = instance(&store, &temp, "m1");
        let two = instance(&store, &temp, "m2");
        let local_one = format!("{SERVICE}-m1");
        let local_two = format!("{SERVICE}-m2");

        store.write(&local_one, &blob("srv", "A", 1000)).unwrap();
        assert_eq!(one.push_local().unwrap(), PushOutcome::Pushed);
        assert_eq!(two.pull_if_newer().unwrap(), PullOutcome::Updated);
        assert_eq!(server_token(&store, &local_two, "srv").as_deref(), Some("A"));

        // Instance two refreshes the token.
        store.write(&local_two, &blob("srv", "B", 2000)).unwrap();
        assert_eq!(two.push_local().unwrap(), PushOutcome::Pushed);
        assert_eq!(server_token(&store, SERVICE, "srv").as_deref(), Some("B"));

        assert_eq!(one.pull_if_newer().unwrap(), PullOutcome::Updated);
        assert_eq!(server_token(&store, &local_one, "srv").as_deref(), Some("B"));

        // Instance one's next push carries nothing stale upward.
        assert_eq!(one.push_local().unwrap(), PushOutcome::Unchanged);
        assert_eq!(server_token(&store, SERVICE, "srv").as_deref(), Some("B"));
    }

    #[test]
    fn test_stale_local_push_adopts_newer_shared_token() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemorySecretStore::new());
        let one = instance(&store, &temp, "m1");
        let local_one = format!("{SERVICE}-m1");

        store.write(SERVICE, &blob("srv", "B", 2000)).unwrap();
        store.write(&local_one, &blob("srv", "A", 1000)).unwrap();

        assert_eq!(one.push_local().unwrap(), PushOutcome::AlreadyShared);
        assert_eq!(server_token(&store, SERVICE, "srv").as_deref(), Some("B"));
        assert_eq!(server_token(&store, &local_one, "srv").as_deref(), Some("B"));
    }

    #[test]
    fn test_pull_updates_expiry_cache() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemorySecretStore::new());
        let sync = instance(&store, &temp, "m1");

        store
            .write(
                SERVICE,
                &json!({"claudeAiOauth": {"expiresAt": 1_700_000_000_000_i64}}).to_string(),
            )
            .unwrap();
        assert_eq!(sync.pull_shared().unwrap(), PullOutcome::Updated);
        assert_eq!(sync.expiry.get(), Some(1_700_000_000_000));
        assert!(sync.cached_hash().is_some());
        assert_eq!(sync.pull_shared().unwrap(), PullOutcome::Unchanged);
    }

    #[test]
    fn test_malformed_shared_aborts_without_writes() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemorySecretStore::new());
        let sync = instance(&store, &temp, "m1");
        let local = blob("srv", "A", 1000);

        store.write(SERVICE, "[1,2,3]").unwrap();
        store.write(&format!("{SERVICE}-m1"), &local).unwrap();

        assert!(sync.pull_shared().is_err());
        assert!(sync.push_local().is_err());
        assert_eq!(store.read(SERVICE).unwrap().as_deref(), Some("[1,2,3]"));
        assert_eq!(
            store.read(&format!("{SERVICE}-m1")).unwrap().as_deref(),
            Some(local.as_str())
        );
    }

    #[tokio::test]
    async fn test_downward_task_gated_on_running() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemorySecretStore::new());
        let writer = instance(&store, &temp, "m1");
        let reader = Arc::new(instance(&store, &temp, "m2"));
        let (state_tx, state_rx) = watch::channel(SupervisorState::Running);
        let (restart_tx, mut restart_rx) = notifier("credential restart");
        let cancel = CancellationToken::new();
        let local_two = format!("{SERVICE}-m2");

        let task = tokio::spawn(run_downward(
            reader,
            Duration::from_millis(20),
            state_rx,
            PullPolicy {
                restart: Some(restart_tx),
                status_file: temp.path().join("statusline-message"),
            },
            cancel.clone(),
        ));

        // Let the startup pull (nothing shared yet) run, then start a restart.
        tokio::time::sleep(Duration::from_millis(100)).await;
        state_tx.send(SupervisorState::Restarting).unwrap();

        store.write(&format!("{SERVICE}-m1"), &blob("srv", "A", 1000)).unwrap();
        writer.push_local().unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.read(&local_two).unwrap().is_none());

        state_tx.send(SupervisorState::Running).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), restart_rx.recv())
            .await
            .expect("restart request after pull");
        assert_eq!(got, Some(()));
        assert_eq!(server_token(&store, &local_two, "srv").as_deref(), Some("A"));
        assert!(temp.path().join("statusline-message").exists());

        cancel.cancel();
        task.await.unwrap();
    }
}
