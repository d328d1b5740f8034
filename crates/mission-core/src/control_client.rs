//! Client for the per-mission wrapper control socket.
//!
//! Provides a thin, synchronous interface for hooks and CLI commands. The
//! wrapper listens on `<root>/missions/<id>/wrapper.sock`; see
//! [`crate::control`] for the protocol.
//!
//! # Not running
//!
//! When the socket file is absent or the connection is refused the caller
//! gets [`ClientError::NotRunning`], distinct from I/O and protocol failures.
//! Hooks invoked synchronously by the agent tool should treat it as
//! non-fatal; [`notify_agent_event`] does exactly that.

use crate::control::{AgentEvent, Command, Response};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Read/write timeout applied to the client side of the socket.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by [`send_command`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// No wrapper is listening for this mission.
    #[error("wrapper is not running (socket {socket})")]
    NotRunning { socket: PathBuf },

    /// I/O failure after the connection was established.
    #[error("I/O error talking to wrapper: {0}")]
    Io(#[from] std::io::Error),

    /// The wrapper sent something that is not a response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Control sockets need Unix domain sockets.
    #[error("control sockets are not supported on this platform")]
    Unsupported,
}

impl ClientError {
    /// Returns `true` for the distinguished "not running" condition.
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning { .. })
    }
}

/// Send one command and wait for its response.
#[allow(unused_variables)]
pub fn send_command(socket_path: &Path, command: &Command) -> Result<Response, ClientError> {
    #[cfg(unix)]
    {
        send_command_unix(socket_path, command)
    }

    #[cfg(not(unix))]
    {
        Err(ClientError::Unsupported)
    }
}

/// Report a hook event to the wrapper.
///
/// A wrapper that is not running is not an error here: the hook must never
/// block or fail the agent tool that invoked it. An error response from the
/// wrapper is surfaced as [`ClientError::Protocol`].
pub fn notify_agent_event(
    socket_path: &Path,
    event: &AgentEvent,
    notification_type: Option<&str>,
) -> Result<(), ClientError> {
    let command = Command::claude_update(event, notification_type);
    match send_command(socket_path, &command) {
        Ok(response) if response.is_ok() => Ok(()),
        Ok(response) => Err(ClientError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown wrapper error".to_string()),
        )),
        Err(e) if e.is_not_running() => {
            tracing::debug!("Wrapper not running; dropping {event} event");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn send_command_unix(socket_path: &Path, command: &Command) -> Result<Response, ClientError> {
    use std::io::{BufRead, BufReader, ErrorKind, Write};
    use std::os::unix::net::UnixStream;

    let stream = match UnixStream::connect(socket_path) {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Err(ClientError::NotRunning {
                socket: socket_path.to_path_buf(),
            });
        }
        Err(e) => return Err(ClientError::Io(e)),
    };

    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;

    let request_line =
        serde_json::to_string(command).map_err(|e| ClientError::Protocol(e.to_string()))?;

    {
        let mut writer = std::io::BufWriter::new(&stream);
        writer.write_all(request_line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    if reader.read_line(&mut response_line)? == 0 {
        return Err(ClientError::Protocol(
            "wrapper closed the connection without responding".to_string(),
        ));
    }

    serde_json::from_str(response_line.trim())
        .map_err(|e| ClientError::Protocol(format!("malformed response: {e}")))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::control::RestartMode;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    /// Serve exactly one connection with a canned reply line.
    fn serve_once(listener: UnixListener, reply: &'static str) -> std::thread::JoinHandle<String> {
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(&stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut writer = &stream;
            writer.write_all(reply.as_bytes()).unwrap();
            line
        })
    }

    #[test]
    fn test_missing_socket_is_not_running() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("wrapper.sock");

        let err = send_command(&socket, &Command::restart(RestartMode::Graceful, "")).unwrap_err();
        assert!(err.is_not_running(), "expected NotRunning, got {err:?}");
    }

    #[test]
    fn test_stale_socket_file_is_not_running() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("wrapper.sock");
        // Bind then drop: the file stays behind but nobody listens.
        drop(UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        let err = send_command(&socket, &Command::restart(RestartMode::Hard, "")).unwrap_err();
        assert!(err.is_not_running(), "expected NotRunning, got {err:?}");
    }

    #[test]
    fn test_notify_agent_event_tolerates_missing_wrapper() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("wrapper.sock");
        assert!(notify_agent_event(&socket, &AgentEvent::Stop, None).is_ok());
    }

    #[test]
    fn test_send_command_round_trip() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("wrapper.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = serve_once(listener, "{\"status\":\"ok\"}\n");

        let response =
            send_command(&socket, &Command::claude_update(&AgentEvent::Stop, None)).unwrap();
        assert!(response.is_ok());

        let request_line = server.join().unwrap();
        let sent: Command = serde_json::from_str(request_line.trim()).unwrap();
        assert_eq!(sent.command, "claude_update");
        assert_eq!(sent.event.as_deref(), Some("Stop"));
    }

    #[test]
    fn test_error_response_surfaces_from_notify() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("wrapper.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = serve_once(listener, "{\"status\":\"error\",\"error\":\"missing event\"}\n");

        let err = notify_agent_event(&socket, &AgentEvent::Stop, None).unwrap_err();
        match err {
            ClientError::Protocol(msg) => assert_eq!(msg, "missing event"),
            other => panic!("expected protocol error, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_garbage_response_is_protocol_error() {
        let temp = TempDir::new().unwrap();
        let socket = temp.path().join("wrapper.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = serve_once(listener, "hello\n");

        let err = send_command(&socket, &Command::restart(RestartMode::Graceful, "")).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        server.join().unwrap();
    }
}
