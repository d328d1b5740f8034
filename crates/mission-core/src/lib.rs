//! Core types for agent-mission
//!
//! This crate provides the pieces shared between the per-mission wrapper and
//! the short-lived clients (hooks, CLI) that talk to it:
//!
//! - the control socket protocol ([`control`]) and its client
//!   ([`control_client`])
//! - the credential merge rule and secret store adapters ([`credentials`])
//! - home directory and on-disk layout resolution ([`home`], [`paths`])
//! - wrapper configuration ([`config`]) and mission identity ([`mission`])

pub mod config;
pub mod control;
pub mod control_client;
pub mod credentials;
pub mod home;
pub mod io;
pub mod logging;
pub mod mission;
pub mod paths;

pub use control::{AgentEvent, Command, Response, RestartMode};
pub use mission::Mission;
pub use paths::{MissionPaths, RootPaths};
