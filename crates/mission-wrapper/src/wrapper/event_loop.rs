//! Wrapper event loop
//!
//! The single coordinator for one mission. It owns the [`Lifecycle`], is the
//! only place that signals the agent, and consumes every other component's
//! output over channels:
//!
//! - control socket commands (answered synchronously)
//! - template, global-config and idle-signal notifications
//! - restart requests from credential sync
//! - agent exits from the waiter task
//! - termination signals forwarded by `main`
//!
//! Background tasks share a cancellation token that is cancelled when the
//! loop returns. The loop itself only returns once the agent has exited (or
//! could not be relaunched).

use super::child::{AgentLauncher, AgentProcess, ChildExit, Signal};
use super::config_tree::{ConfigTree, CopyConfigTree};
use super::credential_sync::{CredentialSync, PullPolicy, run_downward, run_upward};
use super::socket::{CommandRequest, start_socket_server};
use super::state::{Directive, ExitDisposition, LaunchMode, Lifecycle, SupervisorState};
use super::token_expiry::{TokenExpiry, TokenMonitor};
use super::watchers::Notifier;
use super::watchers::global_config::spawn_global_config_watcher;
use super::watchers::idle::spawn_idle_watcher;
use super::watchers::notifier;
use super::watchers::remote_ref::{GitRepoCache, RepoCache, spawn_remote_ref_watcher};
use super::watchers::template::{CommitSource, GitCommitSource, poll_template};
use agent_mission_core::config::{CredentialsConfig, SecretBackend, WrapperConfig};
use agent_mission_core::control::{AgentEvent, Command, ControlRequest, Response, RestartMode};
use agent_mission_core::credentials::{FileSecretStore, SecretStore};
use agent_mission_core::mission::Mission;
use agent_mission_core::paths::{MissionPaths, RootPaths};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pending control commands the event loop will queue before senders wait.
const COMMAND_CHANNEL_CAPACITY: usize = 4;

/// One mission's supervisor.
pub struct Wrapper {
    mission: Mission,
    root: RootPaths,
    paths: MissionPaths,
    config: WrapperConfig,
    prompt: Option<String>,
    resume: bool,
    config_tree: Arc<dyn ConfigTree>,
    commit_source: Option<Arc<dyn CommitSource>>,
    repo_cache: Option<Arc<dyn RepoCache>>,
    secret_store: Option<Arc<dyn SecretStore>>,
    state_tx: watch::Sender<SupervisorState>,
}

impl Wrapper {
    /// Build a wrapper with the default collaborators for `mission`.
    pub fn new(mission: Mission, root: RootPaths, config: WrapperConfig) -> Self {
        let paths = root.mission(&mission.id);
        let config_tree: Arc<dyn ConfigTree> = Arc::new(CopyConfigTree::new(
            root.global_config_dir(),
            paths.config_dir(),
        ));
        let commit_source = mission.template.as_deref().map(|template| {
            Arc::new(GitCommitSource::new(root.repo_dir(template))) as Arc<dyn CommitSource>
        });
        let repo_cache = mission.git_remote.as_deref().map(|remote| {
            Arc::new(GitRepoCache::new(root.repo_dir(remote))) as Arc<dyn RepoCache>
        });
        let secret_store = config
            .credentials
            .enabled
            .then(|| default_secret_store(&config.credentials, &root));
        let (state_tx, _) = watch::channel(SupervisorState::Running);

        Self {
            mission,
            root,
            paths,
            config,
            prompt: None,
            resume: false,
            config_tree,
            commit_source,
            repo_cache,
            secret_store,
            state_tx,
        }
    }

    /// Initial prompt for a fresh first launch.
    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Resume the previous conversation on the first launch.
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_commit_source(mut self, source: Option<Arc<dyn CommitSource>>) -> Self {
        self.commit_source = source;
        self
    }

    pub fn with_repo_cache(mut self, cache: Option<Arc<dyn RepoCache>>) -> Self {
        self.repo_cache = cache;
        self
    }

    /// Replace the credential store; `None` disables credential sync.
    pub fn with_secret_store(mut self, store: Option<Arc<dyn SecretStore>>) -> Self {
        self.secret_store = store;
        self
    }

    /// Read-only view of the lifecycle state.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Supervise the agent until it exits for good.
    ///
    /// Returns the agent's final exit code. `signals` carries termination
    /// signals received by the wrapper; each one is forwarded to the agent.
    /// Cancelling `cancel` behaves like a forwarded `SIGTERM`.
    pub async fn run(
        self,
        mut signals: mpsc::Receiver<Signal>,
        cancel: CancellationToken,
    ) -> Result<i32> {
        let tasks = cancel.child_token();
        let result = self.supervise(&mut signals, &cancel, &tasks).await;
        tasks.cancel();
        result
    }

    async fn supervise(
        self,
        signals: &mut mpsc::Receiver<Signal>,
        cancel: &CancellationToken,
        tasks: &CancellationToken,
    ) -> Result<i32> {
        info!(
            "Supervising mission {} in {}",
            self.mission.short_id(),
            self.mission.agent_dir.display()
        );

        let mut config_hash = self
            .config_tree
            .rebuild()
            .context("Failed to build mission config tree")?;

        let (command_tx, mut command_rx) = mpsc::channel::<CommandRequest>(COMMAND_CHANNEL_CAPACITY);
        let _socket = start_socket_server(
            &self.paths,
            command_tx,
            self.config.timing.socket_timeout(),
            tasks.clone(),
        )
        .await
        .context("Failed to start control socket")?;

        let (template_tx, mut template_rx) = notifier::<String>("template");
        let (global_tx, mut global_rx) = notifier::<()>("global config");
        let (idle_tx, mut idle_rx) = notifier::<()>("idle signal");
        let (credential_tx, mut credential_rx) = notifier::<()>("credential restart");
        self.spawn_watchers(template_tx, global_tx, idle_tx, tasks);
        self.spawn_credential_tasks(credential_tx, tasks);

        let launcher = AgentLauncher::new(&self.config.agent, &self.mission, &self.paths);
        let (exit_tx, mut exit_rx) = mpsc::channel::<ChildExit>(4);
        let initial_mode = if self.resume {
            LaunchMode::Resume
        } else {
            LaunchMode::Fresh
        };
        let mut generation = 1;
        let mut child = launcher
            .spawn(initial_mode, self.prompt.as_deref(), generation, exit_tx.clone())
            .context("Failed to launch agent")?;
        let mut lifecycle = Lifecycle::new(true);
        lifecycle.launched(initial_mode, self.prompt.is_some());

        let exit_code = loop {
            let directive = tokio::select! {
                Some(request) = command_rx.recv() => {
                    let (response, directive) = handle_command(&mut lifecycle, &request.command);
                    // Apply before answering so the caller observes the new state.
                    apply(directive, &child);
                    self.publish(&lifecycle);
                    let _ = request.response_tx.send(response);
                    Directive::None
                }
                Some(commit) = template_rx.recv() => {
                    let short = commit.get(..8).unwrap_or(commit.as_str());
                    self.refresh_config_tree(&mut config_hash);
                    lifecycle.change_detected(&format!("template moved to {short}"))
                }
                Some(()) = global_rx.recv() => {
                    if self.refresh_config_tree(&mut config_hash) {
                        lifecycle.change_detected("global config changed")
                    } else {
                        debug!("Global config rewritten without content change");
                        Directive::None
                    }
                }
                Some(()) = idle_rx.recv() => {
                    debug!("Idle signal from state file");
                    lifecycle.agent_became_idle()
                }
                Some(()) = credential_rx.recv() => {
                    lifecycle.restart_requested(RestartMode::Graceful, "credentials updated")
                }
                Some(signal) = signals.recv() => {
                    info!("Forwarding {signal:?} to agent and shutting down");
                    lifecycle.begin_shutdown();
                    child.signal(signal);
                    Directive::None
                }
                _ = cancel.cancelled(), if !lifecycle.is_shutting_down() => {
                    info!("Shutdown requested; stopping agent");
                    lifecycle.begin_shutdown();
                    child.signal(Signal::Terminate);
                    Directive::None
                }
                Some(exit) = exit_rx.recv() => {
                    if exit.generation != child.generation() {
                        debug!("Ignoring exit of replaced agent generation {}", exit.generation);
                        continue;
                    }
                    match lifecycle.child_exited() {
                        ExitDisposition::Terminate => {
                            info!("Agent exited with code {}", exit.code);
                            break exit.code;
                        }
                        ExitDisposition::Relaunch(mode) => {
                            self.refresh_config_tree(&mut config_hash);
                            generation += 1;
                            child = launcher
                                .spawn(mode, None, generation, exit_tx.clone())
                                .context("Failed to relaunch agent")?;
                            lifecycle.launched(mode, false);
                            Directive::None
                        }
                    }
                }
            };
            apply(directive, &child);
            self.publish(&lifecycle);
        };

        Ok(exit_code)
    }

    fn publish(&self, lifecycle: &Lifecycle) {
        let next = lifecycle.state();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Rebuild the config tree; returns `true` when its content changed.
    fn refresh_config_tree(&self, config_hash: &mut String) -> bool {
        match self.config_tree.rebuild() {
            Ok(hash) if hash != *config_hash => {
                *config_hash = hash;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to rebuild mission config tree: {e:#}");
                false
            }
        }
    }

    fn spawn_watchers(
        &self,
        template_tx: Notifier<String>,
        global_tx: Notifier<()>,
        idle_tx: Notifier<()>,
        tasks: &CancellationToken,
    ) {
        let timing = &self.config.timing;

        if let Some(source) = &self.commit_source {
            tokio::spawn(poll_template(
                Arc::clone(source),
                timing.template_poll(),
                template_tx,
                tasks.clone(),
            ));
        }

        if let Err(e) = spawn_global_config_watcher(
            &self.root.global_config_dir(),
            timing.global_config_debounce(),
            global_tx,
            tasks.clone(),
        ) {
            warn!("Global config watcher disabled: {e:#}");
        }

        if let Some(cache) = &self.repo_cache {
            spawn_remote_ref_watcher(
                &self.mission.agent_dir,
                Arc::clone(cache),
                timing.remote_ref_debounce(),
                tasks.clone(),
            );
        }

        if let Err(e) = spawn_idle_watcher(
            self.paths.state_file(),
            timing.idle_debounce(),
            idle_tx,
            tasks.clone(),
        ) {
            warn!("Idle-signal watcher disabled: {e:#}");
        }
    }

    fn spawn_credential_tasks(&self, restart_tx: Notifier<()>, tasks: &CancellationToken) {
        let Some(store) = self.secret_store.clone() else {
            info!("Credential sync disabled");
            return;
        };
        let credentials = &self.config.credentials;
        let timing = &self.config.timing;
        let expiry = Arc::new(TokenExpiry::default());
        let sync = Arc::new(CredentialSync::new(
            store,
            credentials.local_key(&self.mission.id),
            credentials.shared_key(),
            self.root.credentials_broadcast_file(),
            Arc::clone(&expiry),
        ));
        if let Err(e) = sync.load_expiry() {
            warn!("Token expiry unknown at startup: {e:#}");
        }

        let state = self.subscribe();
        tokio::spawn(run_upward(
            Arc::clone(&sync),
            timing.credential_upward(),
            state.clone(),
            tasks.clone(),
        ));
        tokio::spawn(run_downward(
            sync,
            timing.credential_downward_debounce(),
            state,
            PullPolicy {
                restart: credentials.restart_on_pull.then_some(restart_tx),
                status_file: self.paths.statusline_message_file(),
            },
            tasks.clone(),
        ));

        let monitor = TokenMonitor::new(
            expiry,
            self.paths.statusline_message_file(),
            timing.token_warning(),
        );
        tokio::spawn(monitor.run(timing.token_check(), tasks.clone()));
    }
}

/// Answer one control command and compute its effect on the agent.
fn handle_command(lifecycle: &mut Lifecycle, command: &Command) -> (Response, Directive) {
    match command.interpret() {
        Err(e) => {
            debug!("Rejected control command {:?}: {e}", command.command);
            (Response::from(e), Directive::None)
        }
        Ok(ControlRequest::Restart { mode, reason }) => {
            let reason = reason.unwrap_or_else(|| "operator request".to_string());
            info!("Restart requested ({mode}): {reason}");
            (Response::ok(), lifecycle.restart_requested(mode, &reason))
        }
        Ok(ControlRequest::ClaudeUpdate {
            event,
            notification_type,
        }) => {
            if event == AgentEvent::Notification {
                info!(
                    "Agent notification: {}",
                    notification_type.as_deref().unwrap_or("unspecified")
                );
            } else {
                debug!("Agent event: {event}");
            }
            (Response::ok(), lifecycle.agent_event(&event))
        }
    }
}

fn apply(directive: Directive, child: &AgentProcess) {
    let signal = match directive {
        Directive::None => return,
        Directive::Interrupt => Signal::Interrupt,
        Directive::Kill => Signal::Kill,
    };
    info!("Sending {signal:?} to agent pid {}", child.pid());
    child.signal(signal);
}

fn default_secret_store(config: &CredentialsConfig, root: &RootPaths) -> Arc<dyn SecretStore> {
    match config.backend {
        SecretBackend::File => Arc::new(FileSecretStore::new(root.secrets_dir())),
        SecretBackend::Keyring => keyring_store(root),
    }
}

#[cfg(feature = "keyring")]
fn keyring_store(_root: &RootPaths) -> Arc<dyn SecretStore> {
    use agent_mission_core::credentials::KeyringSecretStore;
    let account = std::env::var("USER").unwrap_or_else(|_| "agent-mission".to_string());
    Arc::new(KeyringSecretStore::new(account))
}

#[cfg(not(feature = "keyring"))]
fn keyring_store(root: &RootPaths) -> Arc<dyn SecretStore> {
    warn!("Keyring backend not compiled in; using file secret store");
    Arc::new(FileSecretStore::new(root.secrets_dir()))
}
