//! Agent child process
//!
//! The event loop owns at most one [`AgentProcess`] at a time. Each spawn
//! gets a generation number; a waiter task owns the `tokio::process::Child`
//! and reports its exit tagged with that generation, so exits of replaced
//! processes can be told apart from the current one. Signals go through the
//! waiter too, which never signals a pid it has already reaped.

use super::state::LaunchMode;
use agent_mission_core::config::AgentConfig;
use agent_mission_core::mission::Mission;
use agent_mission_core::paths::MissionPaths;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Exit report from a waiter task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub generation: u64,
    /// Exit code; `128 + signal` when the child was killed by a signal.
    pub code: i32,
}

/// Signals the wrapper sends to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Everything needed to start the agent in a mission workspace.
#[derive(Debug, Clone)]
pub struct AgentLauncher {
    program: String,
    args: Vec<String>,
    resume_args: Vec<String>,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl AgentLauncher {
    pub fn new(config: &AgentConfig, mission: &Mission, paths: &MissionPaths) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            resume_args: config.resume_args.clone(),
            working_dir: mission.agent_dir.clone(),
            env: vec![
                ("MISSION_ID".to_string(), mission.id.clone()),
                (
                    "MISSION_SOCKET".to_string(),
                    paths.socket_file().to_string_lossy().into_owned(),
                ),
                (
                    "CLAUDE_CONFIG_DIR".to_string(),
                    paths.config_dir().to_string_lossy().into_owned(),
                ),
            ],
        }
    }

    /// Arguments for a launch in `mode`. The prompt only applies to fresh
    /// launches and always goes last.
    pub fn arguments(&self, mode: LaunchMode, prompt: Option<&str>) -> Vec<String> {
        let mut args = self.args.clone();
        match mode {
            LaunchMode::Fresh => {
                if let Some(prompt) = prompt {
                    args.push(prompt.to_string());
                }
            }
            LaunchMode::Resume => args.extend(self.resume_args.iter().cloned()),
        }
        args
    }

    /// Spawn the agent and its waiter task.
    pub fn spawn(
        &self,
        mode: LaunchMode,
        prompt: Option<&str>,
        generation: u64,
        exit_tx: mpsc::Sender<ChildExit>,
    ) -> Result<AgentProcess> {
        std::fs::create_dir_all(&self.working_dir).with_context(|| {
            format!(
                "Failed to create agent directory {}",
                self.working_dir.display()
            )
        })?;

        let args = self.arguments(mode, prompt);
        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .current_dir(&self.working_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to launch agent {:?}", self.program))?;

        let pid = child
            .id()
            .context("Agent exited before its PID could be read")?;
        info!(
            "Launched agent pid {pid} ({mode}, generation {generation}): {} {}",
            self.program,
            args.join(" ")
        );

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<Signal>();
        tokio::spawn(async move {
            // Signals are delivered here so they can never reach a reaped pid.
            let status = loop {
                let signal = tokio::select! {
                    status = child.wait() => break status,
                    Some(signal) = signal_rx.recv() => signal,
                };
                deliver(&child, signal);
            };
            let code = match status {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!("Failed to wait for agent pid {pid}: {e}");
                    1
                }
            };
            debug!("Agent pid {pid} exited with {code}");
            let _ = exit_tx.send(ChildExit { generation, code }).await;
        });

        Ok(AgentProcess {
            pid,
            generation,
            signal_tx,
        })
    }
}

/// Handle to a running agent.
#[derive(Debug, Clone)]
pub struct AgentProcess {
    pid: u32,
    generation: u64,
    signal_tx: mpsc::UnboundedSender<Signal>,
}

impl AgentProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ask the waiter to deliver `signal`.
    ///
    /// Returns `false` once the agent has been reaped; nothing is sent then.
    pub fn signal(&self, signal: Signal) -> bool {
        if self.signal_tx.send(signal).is_ok() {
            true
        } else {
            debug!("Agent pid {} already exited; dropping {signal:?}", self.pid);
            false
        }
    }
}

fn deliver(child: &tokio::process::Child, signal: Signal) {
    let Some(pid) = child.id() else {
        debug!("Agent already reaped; dropping {signal:?}");
        return;
    };
    debug!("Sending {signal:?} to agent pid {pid}");
    if let Err(e) = send_signal(pid, signal) {
        warn!("Failed to send {signal:?} to agent pid {pid}: {e}");
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal.raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process signals require a Unix platform",
    ))
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_mission_core::paths::RootPaths;
    use std::time::Duration;
    use tempfile::TempDir;

    fn launcher(temp: &TempDir, command: &str, args: &[&str]) -> AgentLauncher {
        let root = RootPaths::new(temp.path());
        let paths = root.mission("m-1");
        let mission = Mission::load("m-1", &paths).unwrap();
        let config = AgentConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..AgentConfig::default()
        };
        AgentLauncher::new(&config, &mission, &paths)
    }

    #[test]
    fn test_arguments_per_mode() {
        let temp = TempDir::new().unwrap();
        let launcher = launcher(&temp, "claude", &["--model", "opus"]);

        assert_eq!(
            launcher.arguments(LaunchMode::Fresh, Some("fix the build")),
            vec!["--model", "opus", "fix the build"]
        );
        assert_eq!(
            launcher.arguments(LaunchMode::Fresh, None),
            vec!["--model", "opus"]
        );
        assert_eq!(
            launcher.arguments(LaunchMode::Resume, Some("ignored")),
            vec!["--model", "opus", "--continue"]
        );
    }

    #[tokio::test]
    async fn test_spawn_reports_exit_code_and_environment() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("env.txt");
        let script = format!("echo \"$MISSION_ID\" > {}; exit 7", out.display());
        let launcher = launcher(&temp, "sh", &["-c", &script]);
        let (tx, mut rx) = mpsc::channel(1);

        let process = launcher.spawn(LaunchMode::Fresh, None, 3, tx).unwrap();
        assert_eq!(process.generation(), 3);

        let exit = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ChildExit { generation: 3, code: 7 });
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "m-1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_reports_signal_exit() {
        let temp = TempDir::new().unwrap();
        let launcher = launcher(&temp, "sh", &["-c", "sleep 30"]);
        let (tx, mut rx) = mpsc::channel(1);

        let process = launcher.spawn(LaunchMode::Fresh, None, 1, tx).unwrap();
        assert!(process.signal(Signal::Kill));

        let exit = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.code, 128 + libc::SIGKILL);
    }

    #[tokio::test]
    async fn test_signal_after_exit_is_dropped() {
        let temp = TempDir::new().unwrap();
        let launcher = launcher(&temp, "sh", &["-c", "exit 0"]);
        let (tx, mut rx) = mpsc::channel(1);

        let process = launcher.spawn(LaunchMode::Fresh, None, 1, tx).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.code, 0);

        // The waiter has reaped the pid; a late kill must not go out.
        assert!(!process.signal(Signal::Kill));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let temp = TempDir::new().unwrap();
        let launcher = launcher(&temp, "/nonexistent/agent-binary", &[]);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let result = rt.block_on(async { launcher.spawn(LaunchMode::Fresh, None, 1, tx) });
        assert!(result.is_err());
    }
}
