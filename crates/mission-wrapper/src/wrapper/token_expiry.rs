//! Token expiry monitor
//!
//! Surfaces a status-line warning when the agent's OAuth token is about to
//! expire and retracts it once a fresh token is synced in.

use agent_mission_core::io::{atomic_write, remove_if_exists};
use chrono::{DateTime, Local, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const UNKNOWN: i64 = i64::MIN;

/// Prefix of every expiry message. Only files starting with it are retracted.
const MESSAGE_PREFIX: &str = "Agent login";

/// Cached token expiry in epoch milliseconds, shared with credential sync.
#[derive(Debug)]
pub struct TokenExpiry(AtomicI64);

impl Default for TokenExpiry {
    fn default() -> Self {
        Self(AtomicI64::new(UNKNOWN))
    }
}

impl TokenExpiry {
    pub fn get(&self) -> Option<i64> {
        match self.0.load(Ordering::SeqCst) {
            UNKNOWN => None,
            millis => Some(millis),
        }
    }

    pub fn set(&self, millis: Option<i64>) {
        self.0.store(millis.unwrap_or(UNKNOWN), Ordering::SeqCst);
    }
}

/// Outcome of one expiry check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Unknown,
    Valid,
    ExpiringSoon { minutes_left: i64 },
    Expired,
}

/// Classify `expires_at` relative to `now` (both epoch milliseconds).
pub fn classify(expires_at: Option<i64>, now: i64, warning: Duration) -> TokenStatus {
    let Some(expires_at) = expires_at else {
        return TokenStatus::Unknown;
    };
    let remaining = expires_at - now;
    if remaining <= 0 {
        TokenStatus::Expired
    } else if remaining <= i64::try_from(warning.as_millis()).unwrap_or(i64::MAX) {
        TokenStatus::ExpiringSoon {
            minutes_left: (remaining + 59_999) / 60_000,
        }
    } else {
        TokenStatus::Valid
    }
}

/// Watches the cached expiry and maintains the status-line message file.
#[derive(Debug)]
pub struct TokenMonitor {
    expiry: Arc<TokenExpiry>,
    message_file: PathBuf,
    warning: Duration,
}

impl TokenMonitor {
    pub fn new(expiry: Arc<TokenExpiry>, message_file: PathBuf, warning: Duration) -> Self {
        Self {
            expiry,
            message_file,
            warning,
        }
    }

    /// Check once at `now` and write or remove the message accordingly.
    pub fn check(&self, now: DateTime<Utc>) -> std::io::Result<TokenStatus> {
        let expires_at = self.expiry.get();
        let status = classify(expires_at, now.timestamp_millis(), self.warning);
        match (&status, expires_at) {
            (TokenStatus::Expired, Some(at)) => {
                atomic_write(
                    &self.message_file,
                    format!("{MESSAGE_PREFIX} expired at {}; sign in again", local_time(at))
                        .as_bytes(),
                )?;
            }
            (TokenStatus::ExpiringSoon { minutes_left }, Some(at)) => {
                atomic_write(
                    &self.message_file,
                    format!(
                        "{MESSAGE_PREFIX} expires in {minutes_left} min ({})",
                        local_time(at)
                    )
                    .as_bytes(),
                )?;
            }
            _ => self.retract()?,
        }
        Ok(status)
    }

    /// Remove the status message only if it is an expiry warning.
    fn retract(&self) -> std::io::Result<()> {
        match std::fs::read_to_string(&self.message_file) {
            Ok(text) if text.starts_with(MESSAGE_PREFIX) => {
                if remove_if_exists(&self.message_file)? {
                    info!("Token expiry warning cleared");
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Check at startup and then every `interval` until cancelled.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.check(Utc::now()) {
                Ok(status) => {
                    if last.as_ref() != Some(&status) {
                        debug!("Token status: {status:?}");
                        last = Some(status);
                    }
                }
                Err(e) => warn!("Token expiry check failed: {e}"),
            }
        }
    }
}

fn local_time(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|at| at.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "unknown time".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_classify_windows() {
        let now = 1_000_000_000;
        assert_eq!(classify(None, now, HOUR), TokenStatus::Unknown);
        assert_eq!(classify(Some(now - 1), now, HOUR), TokenStatus::Expired);
        assert_eq!(classify(Some(now), now, HOUR), TokenStatus::Expired);
        assert_eq!(
            classify(Some(now + 90_000), now, HOUR),
            TokenStatus::ExpiringSoon { minutes_left: 2 }
        );
        assert_eq!(
            classify(Some(now + 3_600_000), now, HOUR),
            TokenStatus::ExpiringSoon { minutes_left: 60 }
        );
        assert_eq!(classify(Some(now + 3_600_001), now, HOUR), TokenStatus::Valid);
    }

    #[test]
    fn test_expiry_cache_roundtrip() {
        let expiry = TokenExpiry::default();
        assert_eq!(expiry.get(), None);
        expiry.set(Some(42));
        assert_eq!(expiry.get(), Some(42));
        expiry.set(None);
        assert_eq!(expiry.get(), None);
    }

    #[test]
    fn test_message_written_then_retracted() {
        let temp = TempDir::new().unwrap();
        let message = temp.path().join("statusline-message");
        let expiry = Arc::new(TokenExpiry::default());
        let monitor = TokenMonitor::new(expiry.clone(), message.clone(), HOUR);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        expiry.set(Some(now.timestamp_millis() + 10 * 60_000));
        assert_eq!(
            monitor.check(now).unwrap(),
            TokenStatus::ExpiringSoon { minutes_left: 10 }
        );
        let text = std::fs::read_to_string(&message).unwrap();
        assert!(text.contains("10 min"), "{text}");

        expiry.set(Some(now.timestamp_millis() - 1));
        assert_eq!(monitor.check(now).unwrap(), TokenStatus::Expired);
        assert!(std::fs::read_to_string(&message).unwrap().contains("expired"));

        // A fresh token from sync clears the warning.
        expiry.set(Some(now.timestamp_millis() + 8 * 3_600_000));
        assert_eq!(monitor.check(now).unwrap(), TokenStatus::Valid);
        assert!(!message.exists());

        expiry.set(None);
        assert_eq!(monitor.check(now).unwrap(), TokenStatus::Unknown);
        assert!(!message.exists());
    }

    #[test]
    fn test_valid_token_keeps_other_status_messages() {
        let temp = TempDir::new().unwrap();
        let message = temp.path().join("statusline-message");
        let expiry = Arc::new(TokenExpiry::default());
        let monitor = TokenMonitor::new(expiry.clone(), message.clone(), HOUR);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let notice = "Credentials updated; agent restarts when idle";
        std::fs::write(&message, notice).unwrap();

        expiry.set(Some(now.timestamp_millis() + 8 * 3_600_000));
        assert_eq!(monitor.check(now).unwrap(), TokenStatus::Valid);
        expiry.set(None);
        assert_eq!(monitor.check(now).unwrap(), TokenStatus::Unknown);
        assert_eq!(std::fs::read_to_string(&message).unwrap(), notice);
    }
}
