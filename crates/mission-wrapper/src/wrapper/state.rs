//! Wrapper lifecycle state machine
//!
//! Pure bookkeeping: every input returns what the event loop must do to the
//! child process, and the event loop is the only caller.
//!
//! ```text
//!              change / graceful restart
//!        ┌──────────── (agent busy) ─────────────┐
//!        │                                       ▼
//!   ┌─────────┐                          ┌────────────────┐
//!   │ Running │                          │ RestartPending │
//!   └─────────┘                          └────────────────┘
//!     ▲    │ change / graceful restart           │ idle signal
//!     │    │ (agent idle) → SIGINT               │ → SIGINT
//!     │    ▼                                     │
//!     │  ┌────────────┐◀───────────────────────────┘
//!     └──│ Restarting │◀── hard restart from any state → SIGKILL
//!        └────────────┘
//!   child exit (relaunch)
//! ```
//!
//! A child exit while not `Restarting`, or any exit after shutdown began, is
//! terminal.

use agent_mission_core::control::{AgentEvent, RestartMode};
use std::fmt;
use tracing::debug;

/// Lifecycle state of the wrapper.
///
/// | State | Meaning |
/// |-------|---------|
/// | `Running` | Agent alive, no restart owed |
/// | `RestartPending` | A restart is owed but the agent is busy |
/// | `Restarting` | Signal sent; waiting for the child to exit to relaunch |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    RestartPending,
    Restarting,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::RestartPending => write!(f, "restart_pending"),
            Self::Restarting => write!(f, "restarting"),
        }
    }
}

/// How the next agent process is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// New conversation.
    Fresh,
    /// Continue the most recent conversation.
    Resume,
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Resume => write!(f, "resume"),
        }
    }
}

/// Signal the event loop must deliver to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    /// Ask the child to stop (SIGINT) so it can checkpoint.
    Interrupt,
    /// Stop the child now (SIGKILL).
    Kill,
}

/// What to do after the child process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    Relaunch(LaunchMode),
    Terminate,
}

/// Wrapper lifecycle bookkeeping, owned by the event loop.
#[derive(Debug)]
pub struct Lifecycle {
    state: SupervisorState,
    agent_idle: bool,
    next_launch: LaunchMode,
    pending_reason: Option<String>,
    shutting_down: bool,
}

impl Lifecycle {
    /// Start in `Running` with the given initial idleness.
    pub fn new(agent_idle: bool) -> Self {
        Self {
            state: SupervisorState::Running,
            agent_idle,
            next_launch: LaunchMode::Resume,
            pending_reason: None,
            shutting_down: false,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn is_agent_idle(&self) -> bool {
        self.agent_idle
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Reason recorded by the restart currently owed or in flight.
    pub fn pending_reason(&self) -> Option<&str> {
        self.pending_reason.as_deref()
    }

    /// A configuration or template change was detected.
    pub fn change_detected(&mut self, reason: &str) -> Directive {
        if self.shutting_down {
            debug!("Ignoring change during shutdown: {reason}");
            return Directive::None;
        }
        match self.state {
            SupervisorState::Running => {
                self.pending_reason = Some(reason.to_string());
                if self.agent_idle {
                    self.transition(SupervisorState::Restarting);
                    self.next_launch = LaunchMode::Resume;
                    Directive::Interrupt
                } else {
                    self.transition(SupervisorState::RestartPending);
                    Directive::None
                }
            }
            SupervisorState::RestartPending | SupervisorState::Restarting => {
                debug!("Restart already owed ({}); folding in: {reason}", self.state);
                Directive::None
            }
        }
    }

    /// An operator asked for a restart.
    pub fn restart_requested(&mut self, mode: RestartMode, reason: &str) -> Directive {
        match mode {
            RestartMode::Graceful => self.change_detected(reason),
            RestartMode::Hard => {
                if self.shutting_down {
                    return Directive::None;
                }
                self.pending_reason = Some(reason.to_string());
                self.next_launch = LaunchMode::Fresh;
                self.transition(SupervisorState::Restarting);
                Directive::Kill
            }
        }
    }

    /// A hook event arrived through `claude_update`.
    pub fn agent_event(&mut self, event: &AgentEvent) -> Directive {
        match event {
            AgentEvent::Stop => self.agent_became_idle(),
            AgentEvent::UserPromptSubmit => {
                self.agent_idle = false;
                Directive::None
            }
            AgentEvent::Notification | AgentEvent::Other(_) => Directive::None,
        }
    }

    /// The agent signalled that it is idle.
    pub fn agent_became_idle(&mut self) -> Directive {
        self.agent_idle = true;
        if self.state == SupervisorState::RestartPending && !self.shutting_down {
            self.next_launch = LaunchMode::Resume;
            self.transition(SupervisorState::Restarting);
            Directive::Interrupt
        } else {
            Directive::None
        }
    }

    /// The wrapper itself received a termination signal.
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
    }

    /// The child process exited.
    pub fn child_exited(&mut self) -> ExitDisposition {
        if self.shutting_down || self.state != SupervisorState::Restarting {
            return ExitDisposition::Terminate;
        }
        let mode = self.next_launch;
        self.next_launch = LaunchMode::Resume;
        self.pending_reason = None;
        self.transition(SupervisorState::Running);
        ExitDisposition::Relaunch(mode)
    }

    /// Record a successful launch. A fresh session started with an initial
    /// prompt is busy; anything else starts idle.
    pub fn launched(&mut self, mode: LaunchMode, has_prompt: bool) {
        self.agent_idle = !(mode == LaunchMode::Fresh && has_prompt);
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state != next {
            debug!("Wrapper state: {} → {next}", self.state);
            self.state = next;
        }
    }
}
