//! Control socket server.
//!
//! The wrapper listens on a Unix domain socket in its mission directory:
//!
//! ```text
//! ${MISSION_HOME}/.agent-missions/missions/<id>/wrapper.sock
//! ```
//!
//! Each client connection follows a simple request/response protocol:
//!
//! 1. Client connects
//! 2. Client writes one JSON line (a [`Command`])
//! 3. Server writes one JSON line (a [`Response`])
//! 4. Server closes the connection
//!
//! Decoding happens here; everything else is answered by the event loop,
//! which receives a [`CommandRequest`] and replies on its one-shot channel.
//! One deadline bounds the whole exchange.
//!
//! See [`agent_mission_core::control_client`] for the client side.

use agent_mission_core::control::{Command, ERR_INVALID_JSON, Response};
use agent_mission_core::paths::MissionPaths;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reply when the event loop does not take the command before the deadline.
pub const ERR_WRAPPER_BUSY: &str = "wrapper busy";

/// Reply when the event loop has stopped before answering.
pub const ERR_SHUTTING_DOWN: &str = "wrapper shutting down";

/// Longest command line the server reads before giving up on a client.
const MAX_COMMAND_BYTES: u64 = 64 * 1024;

/// A decoded command waiting for the event loop.
#[derive(Debug)]
pub struct CommandRequest {
    pub command: Command,
    /// One-shot channel for the event loop's answer.
    pub response_tx: oneshot::Sender<Response>,
}

/// A handle to the running socket server.
///
/// Dropping this handle removes the socket and PID files from disk.
#[derive(Debug)]
pub struct SocketServerHandle {
    socket_path: PathBuf,
    pid_path: PathBuf,
}

impl SocketServerHandle {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for SocketServerHandle {
    fn drop(&mut self) {
        cleanup_socket_files(&self.socket_path, &self.pid_path);
    }
}

fn cleanup_socket_files(socket_path: &Path, pid_path: &Path) {
    for path in [socket_path, pid_path] {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", path.display()),
        }
    }
}

/// Bind the mission's control socket and start accepting connections.
///
/// A socket file left behind by a previous wrapper is removed first. The
/// socket is restricted to the owner and the wrapper's PID is written next to
/// it.
pub async fn start_socket_server(
    paths: &MissionPaths,
    command_tx: mpsc::Sender<CommandRequest>,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<SocketServerHandle> {
    #[cfg(unix)]
    {
        start_unix_socket_server(paths, command_tx, timeout, cancel).await
    }

    #[cfg(not(unix))]
    {
        let _ = (paths, command_tx, timeout, cancel);
        anyhow::bail!("the control socket requires a Unix platform")
    }
}

#[cfg(unix)]
async fn start_unix_socket_server(
    paths: &MissionPaths,
    command_tx: mpsc::Sender<CommandRequest>,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<SocketServerHandle> {
    use anyhow::Context;
    use std::os::unix::fs::PermissionsExt;
    use tokio::net::UnixListener;

    let socket_path = paths.socket_file();
    let pid_path = paths.pid_file();

    std::fs::create_dir_all(paths.dir())
        .with_context(|| format!("Failed to create {}", paths.dir().display()))?;

    if socket_path.exists() {
        warn!("Removing stale socket file: {}", socket_path.display());
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("Failed to remove {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict {}", socket_path.display()))?;

    let pid = std::process::id();
    std::fs::write(&pid_path, pid.to_string())
        .with_context(|| format!("Failed to write {}", pid_path.display()))?;

    tracing::info!(
        "Control socket listening on {} (pid {pid})",
        socket_path.display()
    );

    tokio::spawn(run_accept_loop(listener, command_tx, timeout, cancel));

    Ok(SocketServerHandle {
        socket_path,
        pid_path,
    })
}

#[cfg(unix)]
async fn run_accept_loop(
    listener: tokio::net::UnixListener,
    command_tx: mpsc::Sender<CommandRequest>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Control socket accept loop stopped");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let tx = command_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, tx, timeout).await {
                                debug!("Control connection ended early: {e:#}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Control socket accept error: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
async fn handle_connection(
    stream: tokio::net::UnixStream,
    command_tx: mpsc::Sender<CommandRequest>,
    timeout: Duration,
) -> Result<()> {
    use anyhow::Context;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::time::{Instant, timeout_at};

    let deadline = Instant::now() + timeout;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_COMMAND_BYTES));
    let mut line = String::new();

    let read = timeout_at(deadline, reader.read_line(&mut line))
        .await
        .context("Timed out reading command")?
        .context("Failed to read command")?;

    let response = if read as u64 >= MAX_COMMAND_BYTES && !line.ends_with('\n') {
        debug!("Rejecting command longer than {MAX_COMMAND_BYTES} bytes");
        Response::error(ERR_INVALID_JSON)
    } else {
        match serde_json::from_str::<Command>(line.trim()) {
            Ok(command) => dispatch(command, &command_tx, deadline).await,
            Err(e) => {
                debug!("Rejecting undecodable command: {e}");
                Response::error(ERR_INVALID_JSON)
            }
        }
    };

    let mut payload = serde_json::to_string(&response)?;
    payload.push('\n');
    tokio::time::timeout(timeout, async {
        writer.write_all(payload.as_bytes()).await?;
        writer.shutdown().await
    })
    .await
    .context("Timed out writing response")?
    .context("Failed to write response")?;
    Ok(())
}

async fn dispatch(
    command: Command,
    command_tx: &mpsc::Sender<CommandRequest>,
    deadline: tokio::time::Instant,
) -> Response {
    use tokio::time::timeout_at;

    debug!("Control command: {}", command.command);
    let (response_tx, response_rx) = oneshot::channel();
    let request = CommandRequest {
        command,
        response_tx,
    };

    match timeout_at(deadline, command_tx.send(request)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => return Response::error(ERR_SHUTTING_DOWN),
        Err(_) => return Response::error(ERR_WRAPPER_BUSY),
    }

    match timeout_at(deadline, response_rx).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => Response::error(ERR_SHUTTING_DOWN),
        Err(_) => Response::error(ERR_WRAPPER_BUSY),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use agent_mission_core::control::RestartMode;
    use agent_mission_core::control_client::send_command;
    use agent_mission_core::paths::RootPaths;
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};
    use tempfile::TempDir;

    async fn start(
        temp: &TempDir,
        capacity: usize,
    ) -> (
        SocketServerHandle,
        mpsc::Receiver<CommandRequest>,
        CancellationToken,
        MissionPaths,
    ) {
        let paths = RootPaths::new(temp.path()).mission("m-sock");
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let handle = start_socket_server(&paths, tx, Duration::from_millis(500), cancel.clone())
            .await
            .unwrap();
        (handle, rx, cancel, paths)
    }

    async fn send(path: PathBuf, command: Command) -> Response {
        tokio::task::spawn_blocking(move || send_command(&path, &command).unwrap())
            .await
            .unwrap()
    }

    async fn send_raw(path: &Path, line: &str) -> String {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        let mut stream = tokio::net::UnixStream::connect(path).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut out = String::new();
        reader.read_line(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_socket_and_pid_files_lifecycle() {
        let temp = TempDir::new().unwrap();
        let (handle, _rx, cancel, paths) = start(&temp, 1).await;

        let mode = std::fs::metadata(paths.socket_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        let pid = std::fs::read_to_string(paths.pid_file()).unwrap();
        assert_eq!(pid, std::process::id().to_string());

        cancel.cancel();
        drop(handle);
        assert!(!paths.socket_file().exists());
        assert!(!paths.pid_file().exists());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let temp = TempDir::new().unwrap();
        let paths = RootPaths::new(temp.path()).mission("m-sock");
        std::fs::create_dir_all(paths.dir()).unwrap();
        std::fs::write(paths.socket_file(), "stale").unwrap();

        let (_handle, _rx, cancel, _) = start(&temp, 1).await;
        let file_type = std::fs::metadata(paths.socket_file()).unwrap().file_type();
        assert!(file_type.is_socket());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_command_relayed_to_event_loop() {
        let temp = TempDir::new().unwrap();
        let (_handle, mut rx, cancel, paths) = start(&temp, 1).await;

        let responder = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.command.command, "restart");
            assert_eq!(request.command.mode.as_deref(), Some("graceful"));
            request.response_tx.send(Response::ok()).unwrap();
        });

        let response = send(
            paths.socket_file(),
            Command::restart(RestartMode::Graceful, "test"),
        )
        .await;
        assert!(response.is_ok());
        responder.await.unwrap();
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_invalid_json_never_reaches_event_loop() {
        let temp = TempDir::new().unwrap();
        let (_handle, mut rx, cancel, paths) = start(&temp, 1).await;

        let reply = send_raw(&paths.socket_file(), "{not json\n").await;
        let response: Response = serde_json::from_str(reply.trim()).unwrap();
        assert_eq!(response.error.as_deref(), Some(ERR_INVALID_JSON));
        assert!(rx.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_oversized_command_is_rejected_before_deadline() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let temp = TempDir::new().unwrap();
        let (_handle, mut rx, cancel, paths) = start(&temp, 1).await;

        let stream = tokio::net::UnixStream::connect(paths.socket_file())
            .await
            .unwrap();
        let (reader, mut writer) = stream.into_split();
        // Keep streaming without a newline and hold the write side open.
        let flood = tokio::spawn(async move {
            let chunk = vec![b'a'; 8 * 1024];
            for _ in 0..16 {
                if writer.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(writer);
        });

        let mut reply = String::new();
        tokio::time::timeout(
            Duration::from_millis(450),
            BufReader::new(reader).read_line(&mut reply),
        )
        .await
        .expect("no reply before the connection deadline")
        .unwrap();
        let response: Response = serde_json::from_str(reply.trim()).unwrap();
        assert_eq!(response.error.as_deref(), Some(ERR_INVALID_JSON));
        assert!(rx.try_recv().is_err());

        flood.abort();
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_busy_event_loop_answers_wrapper_busy() {
        let temp = TempDir::new().unwrap();
        // Capacity 1 and nobody receiving: the first request fills the queue.
        let (_handle, _rx, cancel, paths) = start(&temp, 1).await;

        let first = tokio::spawn(send(
            paths.socket_file(),
            Command::restart(RestartMode::Graceful, "one"),
        ));
        let second = send(
            paths.socket_file(),
            Command::restart(RestartMode::Graceful, "two"),
        )
        .await;
        let first = first.await.unwrap();

        for response in [first, second] {
            assert_eq!(response.error.as_deref(), Some(ERR_WRAPPER_BUSY));
        }
        cancel.cancel();
    }
}
