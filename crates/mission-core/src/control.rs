//! Control socket protocol shared by the wrapper and its clients.
//!
//! One JSON object per line in each direction, one exchange per connection:
//!
//! ```json
//! // Request
//! {"command":"restart","mode":"graceful","reason":"template updated"}
//! {"command":"claude_update","event":"Notification","notificationType":"idle_prompt"}
//! // Response
//! {"status":"ok"}
//! {"status":"error","error":"unknown command"}
//! ```
//!
//! The wire [`Command`] keeps every field as a plain string so that an
//! unrecognized command still decodes; [`Command::interpret`] turns it into a
//! typed [`ControlRequest`] inside the wrapper's event loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error text for a request line that is not a JSON command object.
pub const ERR_INVALID_JSON: &str = "invalid JSON";

/// `command` value requesting a restart.
pub const CMD_RESTART: &str = "restart";

/// `command` value carrying an agent hook event.
pub const CMD_CLAUDE_UPDATE: &str = "claude_update";

/// Inbound control message as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
}

impl Command {
    /// Build a `restart` command.
    pub fn restart(mode: RestartMode, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            command: CMD_RESTART.to_string(),
            mode: Some(mode.to_string()),
            reason: (!reason.is_empty()).then_some(reason),
            ..Default::default()
        }
    }

    /// Build a `claude_update` command for a hook event.
    pub fn claude_update(event: &AgentEvent, notification_type: Option<&str>) -> Self {
        Self {
            command: CMD_CLAUDE_UPDATE.to_string(),
            event: Some(event.as_str().to_string()),
            notification_type: notification_type.map(str::to_string),
            ..Default::default()
        }
    }

    /// Validate the command and turn it into a typed request.
    pub fn interpret(&self) -> Result<ControlRequest, ProtocolError> {
        match self.command.as_str() {
            CMD_RESTART => {
                let mode = self
                    .mode
                    .as_deref()
                    .and_then(RestartMode::parse)
                    .ok_or(ProtocolError::InvalidRestartMode)?;
                Ok(ControlRequest::Restart {
                    mode,
                    reason: self.reason.clone().filter(|r| !r.is_empty()),
                })
            }
            CMD_CLAUDE_UPDATE => {
                let event = match self.event.as_deref().map(str::trim) {
                    Some(name) if !name.is_empty() => AgentEvent::parse(name),
                    _ => return Err(ProtocolError::MissingEvent),
                };
                Ok(ControlRequest::ClaudeUpdate {
                    event,
                    notification_type: self.notification_type.clone(),
                })
            }
            _ => Err(ProtocolError::UnknownCommand),
        }
    }
}

/// Typed, validated control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Restart {
        mode: RestartMode,
        reason: Option<String>,
    },
    ClaudeUpdate {
        event: AgentEvent,
        notification_type: Option<String>,
    },
}

/// Protocol-level rejection of a command. The `Display` text is what the
/// client sees in `Response.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown command")]
    UnknownCommand,
    #[error("invalid restart mode")]
    InvalidRestartMode,
    #[error("missing event")]
    MissingEvent,
}

/// How a restart treats the running agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// Wait for the agent to be idle, then interrupt and resume the session.
    Graceful,
    /// Kill immediately and start a fresh session.
    Hard,
}

impl RestartMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "graceful" => Some(Self::Graceful),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => write!(f, "graceful"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

/// Hook event reported by the agent through `claude_update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The agent finished responding; it is idle.
    Stop,
    /// The user submitted a prompt; the agent is busy.
    UserPromptSubmit,
    /// The agent raised a notification (permission prompt, idle prompt, ...).
    Notification,
    /// Any other hook event name. Accepted and ignored.
    Other(String),
}

impl AgentEvent {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Stop" => Self::Stop,
            "UserPromptSubmit" => Self::UserPromptSubmit,
            "Notification" => Self::Notification,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "Stop",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Notification => "Notification",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound reply; exactly one per command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// `"ok"` or `"error"`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(message.into()),
        }
    }

    /// Returns `true` if the response indicates success.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::error(err.to_string())
    }
}
