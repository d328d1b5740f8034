//! Canonical home directory resolution
//!
//! Every path the wrapper reads or writes hangs off one home directory so that
//! tests and custom deployments can relocate the whole tree with a single
//! environment variable.
//!
//! # Precedence
//!
//! 1. `MISSION_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default
//!
//! # Testing
//!
//! Integration tests MUST use `MISSION_HOME` (or construct [`RootPaths`]
//! directly) instead of touching the real home directory:
//!
//! ```ignore
//! let temp_dir = tempfile::TempDir::new().unwrap();
//! let root = RootPaths::new(temp_dir.path());
//! ```
//!
//! [`RootPaths`]: crate::paths::RootPaths

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Name of the directory created under the home directory.
pub const ROOT_DIR_NAME: &str = ".agent-missions";

/// Get the home directory for agent-mission operations.
///
/// # Errors
///
/// Returns an error if `MISSION_HOME` is unset and the platform home
/// directory cannot be determined.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("MISSION_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

/// Get the agent-mission root directory (`<home>/.agent-missions`).
pub fn get_root_dir() -> Result<PathBuf> {
    Ok(get_home_dir()?.join(ROOT_DIR_NAME))
}
