//! Unix socket server for the daemon process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::Engine;
use rfbpilot_core::encode::{EncodedImage, JpegSettings};
use rfbpilot_core::error::{ApiError, DesktopError};
use rfbpilot_core::input::parse_key_input;
use rfbpilot_core::protocol::{Command, ImagePayload, MouseButton, Request, Response, ResponseData};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::daemon::session::ConnectionManager;
use crate::daemon::{capture, paths, synth};

/// Maximum number of concurrent client connections to prevent resource exhaustion.
const MAX_CONNECTIONS: usize = 100;

/// How long the daemon waits with no client connections before auto-shutdown.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for in-flight connections to complete during shutdown.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted pre-capture delay (5 minutes).
pub const MAX_SCREENSHOT_DELAY_MS: u64 = 300_000;

/// The daemon server that listens for client connections.
pub struct DaemonServer {
    listener: UnixListener,
    socket_path: PathBuf,
    pid_path: PathBuf,
    desktop: Arc<ConnectionManager>,
    connection_semaphore: Arc<Semaphore>,
    /// Wakes the accept loop so `run` returns and Drop cleans up files.
    shutdown: Arc<Notify>,
}

impl DaemonServer {
    /// Bind to the default socket path for the current instance.
    pub async fn bind(desktop: ConnectionManager) -> Result<Self> {
        let socket_path = paths::socket_path(None);
        let pid_path = paths::pid_path(None);
        Self::bind_to(socket_path, pid_path, desktop).await
    }

    /// Bind to a specific socket path.
    ///
    /// Binds first and only then looks at an existing socket:
    /// 1. Try to bind directly
    /// 2. If the socket is in use, check the PID file to see if its daemon is alive
    /// 3. If that daemon is dead, remove the stale socket and retry
    /// 4. If it is alive, return an error
    pub async fn bind_to(
        socket_path: PathBuf,
        pid_path: PathBuf,
        desktop: ConnectionManager,
    ) -> Result<Self> {
        paths::ensure_socket_dir().context("Failed to create socket directory")?;

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory for {:?}", socket_path)
            })?;
        }

        // The PID file is written right after bind so a second daemon never
        // sees our socket without a PID to check
        let write_pid = |pid_path: &PathBuf| -> Result<()> {
            std::fs::write(pid_path, std::process::id().to_string())
                .with_context(|| format!("Failed to write PID file: {:?}", pid_path))
        };

        let listener = match UnixListener::bind(&socket_path) {
            Ok(l) => {
                write_pid(&pid_path)?;
                l
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if is_daemon_alive(&pid_path) {
                    anyhow::bail!(
                        "Daemon already running (socket {:?} in use, PID file valid)",
                        socket_path
                    );
                }

                // Never follow a symlink when deleting
                let metadata = std::fs::symlink_metadata(&socket_path)
                    .with_context(|| format!("Failed to stat socket path: {:?}", socket_path))?;

                if metadata.file_type().is_symlink() {
                    anyhow::bail!(
                        "Socket path {:?} is a symlink, refusing to delete it",
                        socket_path
                    );
                }

                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if !metadata.file_type().is_socket() {
                        anyhow::bail!(
                            "Path {:?} exists but is not a socket file (type: {:?})",
                            socket_path,
                            metadata.file_type()
                        );
                    }
                }

                info!("Removing stale socket from dead daemon");
                std::fs::remove_file(&socket_path)
                    .with_context(|| format!("Failed to remove stale socket: {:?}", socket_path))?;

                let l = UnixListener::bind(&socket_path)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path))?;
                write_pid(&pid_path)?;
                l
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path));
            }
        };

        info!(
            "Daemon listening on {:?}, driving VNC server at {}",
            socket_path,
            desktop.config().address()
        );

        Ok(Self {
            listener,
            socket_path,
            pid_path,
            desktop: Arc::new(desktop),
            connection_semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Handle to the shutdown signal, for wiring up OS signals.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is signalled.
    ///
    /// Each connection runs in its own task and holds a semaphore permit.
    /// On shutdown, in-flight connections get `GRACEFUL_SHUTDOWN_TIMEOUT` to
    /// finish before they are aborted.
    pub async fn run(&self) -> Result<()> {
        self.spawn_idle_shutdown_task();

        let mut connection_tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        "Connection limit ({}) reached, rejecting new connection",
                                        MAX_CONNECTIONS
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            debug!("Accepted new connection");
                            let desktop = self.desktop.clone();
                            let shutdown = self.shutdown.clone();
                            connection_tasks.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, desktop, shutdown).await {
                                    error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(joined) = connection_tasks.join_next(), if !connection_tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Connection handler panicked: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received, waiting for in-flight connections");
                    break;
                }
            }
        }

        if !connection_tasks.is_empty() {
            info!(
                "Waiting for {} in-flight connection(s) to complete",
                connection_tasks.len()
            );

            let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
                while connection_tasks.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Graceful shutdown timed out after {:?}, aborting {} connection(s)",
                    GRACEFUL_SHUTDOWN_TIMEOUT,
                    connection_tasks.len()
                );
                connection_tasks.abort_all();
            }
        }

        Ok(())
    }

    /// Shut down after `IDLE_TIMEOUT` without any client connection.
    ///
    /// VNC sessions only live inside a request, so open client connections
    /// are the only activity to watch.
    fn spawn_idle_shutdown_task(&self) {
        let shutdown = self.shutdown.clone();
        let semaphore = self.connection_semaphore.clone();

        tokio::spawn(async move {
            let mut idle_since: Option<Instant> = None;

            loop {
                tokio::time::sleep(IDLE_CHECK_INTERVAL).await;

                if semaphore.available_permits() < MAX_CONNECTIONS {
                    if idle_since.take().is_some() {
                        debug!("Active connection detected, resetting idle timer");
                    }
                    continue;
                }

                let idle_start = *idle_since.get_or_insert_with(Instant::now);
                if idle_start.elapsed() >= IDLE_TIMEOUT {
                    info!(
                        "No activity for {} seconds, shutting down",
                        IDLE_TIMEOUT.as_secs()
                    );
                    shutdown.notify_waiters();
                    break;
                }

                debug!(
                    "Idle for {} seconds (shutdown in {} seconds)",
                    idle_start.elapsed().as_secs(),
                    IDLE_TIMEOUT.saturating_sub(idle_start.elapsed()).as_secs()
                );
            }
        });
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() && std::fs::remove_file(&self.socket_path).is_err() {
            warn!("Failed to remove socket on shutdown");
        }
        if self.pid_path.exists() && std::fs::remove_file(&self.pid_path).is_err() {
            warn!("Failed to remove PID file on shutdown");
        }
    }
}

/// Whether the PID file names a process that is still running.
fn is_daemon_alive(pid_path: &Path) -> bool {
    let pid: i32 = match std::fs::read_to_string(pid_path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
    {
        Some(pid) => pid,
        None => return false,
    };

    // SAFETY: signal 0 delivers nothing; kill only reports whether the
    // process exists and may be signalled by us.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Maximum request size in bytes.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Read one line of at most `max_size` bytes.
///
/// Returns the number of bytes read (0 means EOF). Fails once the line
/// exceeds `max_size` without a newline.
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut String,
    max_size: usize,
) -> Result<usize> {
    use tokio::io::AsyncBufReadExt;

    let mut total = 0;
    let mut bytes = Vec::new();

    loop {
        let available = reader
            .fill_buf()
            .await
            .context("Failed to read from client")?;

        if available.is_empty() {
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let bytes_to_consume = newline_pos.map(|p| p + 1).unwrap_or(available.len());

        if total + bytes_to_consume > max_size {
            anyhow::bail!("Request too large: exceeded {} byte limit", max_size);
        }

        // UTF-8 is validated once at the end; chunks may split characters
        bytes.extend_from_slice(&available[..bytes_to_consume]);
        total += bytes_to_consume;
        reader.consume(bytes_to_consume);

        if newline_pos.is_some() {
            break;
        }
    }

    let line = std::str::from_utf8(&bytes).context("Invalid UTF-8 in request")?;
    buf.push_str(line);
    Ok(total)
}

/// Serve JSON-line requests on one client connection.
async fn handle_connection(
    stream: UnixStream,
    desktop: Arc<ConnectionManager>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        let bytes_read = read_line_bounded(&mut reader, &mut line, MAX_REQUEST_SIZE).await?;
        if bytes_read == 0 {
            debug!("Client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!("Received: {} bytes", trimmed.len());

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(request, &desktop, &shutdown).await,
            Err(e) => Response::error(
                "unknown",
                ApiError::invalid_input_with_suggestion(
                    format!("Invalid JSON request: {}", e),
                    "Ensure the request is valid JSON with 'id' and 'command' fields. Example: {\"id\":\"1\",\"command\":{\"action\":\"screenshot\"}}",
                ),
            ),
        };

        let response_json =
            serde_json::to_string(&response).context("Failed to serialize response")?;
        // Screenshot payloads are large; log the size only
        debug!(
            "Sending response {} ({} bytes, success={})",
            response.id,
            response_json.len(),
            response.success
        );

        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        writer.flush().await.context("Failed to flush")?;
    }

    Ok(())
}

async fn handle_request(
    request: Request,
    desktop: &ConnectionManager,
    shutdown: &Arc<Notify>,
) -> Response {
    debug!("Handling command: {:?}", request.command);
    let id = request.id.as_str();

    let result = match request.command {
        Command::Click {
            x,
            y,
            button,
            double,
        } => handle_click(desktop, x, y, button, double).await,
        Command::Move { x, y } => handle_move(desktop, x, y).await,
        Command::KeyPress { key } => handle_key(desktop, key).await,
        Command::TypeText { text, enter } => handle_type(desktop, text, enter).await,
        Command::TypeMultiline { lines } => handle_type_multiline(desktop, lines).await,
        Command::Screenshot { delay_ms } => handle_screenshot(desktop, delay_ms).await,
        Command::Shutdown => Ok(handle_shutdown(shutdown.clone())),
    };

    match result {
        Ok(data) => Response::success(id, data),
        Err(e) => {
            warn!("Request {} failed: {}", id, e);
            Response::error(id, e)
        }
    }
}

fn ok(message: String) -> ResponseData {
    ResponseData::Ok { message }
}

async fn handle_click(
    desktop: &ConnectionManager,
    x: i64,
    y: i64,
    button: MouseButton,
    double: bool,
) -> Result<ResponseData, ApiError> {
    let point = desktop
        .with_session(|session| async move { synth::click(&session, x, y, button, double).await })
        .await?;

    let verb = if double { "Double-clicked" } else { "Clicked" };
    Ok(ok(format!(
        "{} {} button at ({}, {})",
        verb,
        button.as_str(),
        point.x,
        point.y
    )))
}

async fn handle_move(desktop: &ConnectionManager, x: i64, y: i64) -> Result<ResponseData, ApiError> {
    let point = desktop
        .with_session(|session| async move { synth::move_pointer(&session, x, y).await })
        .await?;
    Ok(ok(format!("Moved pointer to ({}, {})", point.x, point.y)))
}

async fn handle_key(desktop: &ConnectionManager, key: String) -> Result<ResponseData, ApiError> {
    if key.trim().is_empty() {
        return Err(ApiError::invalid_input_with_suggestion(
            "Key must not be empty",
            "Pass a key name such as Enter or a combo such as Ctrl+C",
        ));
    }

    // Resolve before connecting so a typo costs no VNC round trip
    let keys = parse_key_input(&key)
        .resolve()
        .map_err(|unknown| ApiError::unknown_key(&unknown))?;

    desktop
        .with_session(|session| {
            let keys = &keys;
            async move { synth::press_keys(&session, keys).await }
        })
        .await?;
    Ok(ok(format!("Pressed key: {}", key)))
}

async fn handle_type(
    desktop: &ConnectionManager,
    text: String,
    enter: bool,
) -> Result<ResponseData, ApiError> {
    desktop
        .with_session(|session| {
            let text = &text;
            async move { synth::type_text(&session, text, enter).await }
        })
        .await?;

    let count = text.chars().count();
    let suffix = if enter { " and pressed Enter" } else { "" };
    Ok(ok(format!("Typed {} characters{}", count, suffix)))
}

async fn handle_type_multiline(
    desktop: &ConnectionManager,
    lines: Vec<String>,
) -> Result<ResponseData, ApiError> {
    desktop
        .with_session(|session| {
            let lines = &lines;
            async move { synth::type_lines(&session, lines).await }
        })
        .await?;
    Ok(ok(format!("Typed {} lines", lines.len())))
}

async fn handle_screenshot(
    desktop: &ConnectionManager,
    delay_ms: u64,
) -> Result<ResponseData, ApiError> {
    if delay_ms > MAX_SCREENSHOT_DELAY_MS {
        return Err(DesktopError::InvalidArgument(format!(
            "delay_ms must be between 0 and {}, got {}",
            MAX_SCREENSHOT_DELAY_MS, delay_ms
        ))
        .into());
    }

    // The delay runs before connecting so the capture sees the settled screen
    if delay_ms > 0 {
        debug!("Waiting {}ms before capture", delay_ms);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let image = desktop
        .with_session(|session| async move {
            capture::screenshot(&session, JpegSettings::default()).await
        })
        .await?;

    Ok(screenshot_response(image, delay_ms))
}

fn screenshot_response(image: EncodedImage, delay_ms: u64) -> ResponseData {
    let mut message = format!(
        "Screenshot captured ({}x{}, {} bytes)",
        image.width,
        image.height,
        image.data.len()
    );
    if image.resized {
        message.push_str(", downscaled to fit the size limit");
    }
    if delay_ms > 0 {
        message.push_str(&format!(" after {}ms delay", delay_ms));
    }

    ResponseData::Screenshot {
        message,
        image: ImagePayload {
            data: base64::engine::general_purpose::STANDARD.encode(&image.data),
            mime_type: image.mime_type.to_string(),
            width: image.width,
            height: image.height,
            resized: image.resized,
        },
    }
}

fn handle_shutdown(shutdown: Arc<Notify>) -> ResponseData {
    info!("Received shutdown command, stopping daemon");

    tokio::spawn(async move {
        // Let the response flush before the accept loop exits
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_waiters();
    });

    ok("Daemon shutting down".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::testing::{ClientEvent, FakeOptions, FakeVncServer};
    use rfbpilot_core::error::ErrorCode;
    use rfbpilot_core::keysym;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;
    use tokio::time::timeout;
    use uuid::Uuid;

    /// A daemon on a temporary socket, driving a fake VNC server.
    struct TestDaemon {
        socket_path: PathBuf,
        vnc: FakeVncServer,
        handle: tokio::task::JoinHandle<()>,
    }

    impl TestDaemon {
        async fn start() -> Self {
            Self::with_options(FakeOptions::default()).await
        }

        async fn with_options(options: FakeOptions) -> Self {
            let short_id = Uuid::new_v4().simple().to_string();
            let socket_path = PathBuf::from("/tmp").join(format!("rfbpilot-{}.sock", &short_id[..8]));
            let pid_path = socket_path.with_extension("pid");

            let vnc = FakeVncServer::start(options).await;
            let manager = ConnectionManager::new(vnc.endpoint(None));
            let server = DaemonServer::bind_to(socket_path.clone(), pid_path, manager)
                .await
                .expect("Failed to bind server");

            let handle = tokio::spawn(async move {
                let _ = timeout(Duration::from_secs(20), server.run()).await;
            });

            Self {
                socket_path,
                vnc,
                handle,
            }
        }

        async fn send(&self, command: Command) -> Response {
            let json = serde_json::to_string(&Request {
                id: "t".to_string(),
                command,
            })
            .unwrap();
            self.send_raw(&json).await
        }

        async fn send_raw(&self, line: &str) -> Response {
            let stream = UnixStream::connect(&self.socket_path)
                .await
                .expect("Failed to connect");
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);

            writer.write_all(line.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            writer.flush().await.unwrap();

            let mut response_line = String::new();
            timeout(Duration::from_secs(10), reader.read_line(&mut response_line))
                .await
                .expect("Timeout reading response")
                .expect("Failed to read");
            serde_json::from_str(&response_line).expect("Failed to parse response")
        }
    }

    impl Drop for TestDaemon {
        fn drop(&mut self) {
            self.handle.abort();
            let _ = std::fs::remove_file(&self.socket_path);
            let _ = std::fs::remove_file(self.socket_path.with_extension("pid"));
        }
    }

    fn message(response: &Response) -> &str {
        response.data.as_ref().map(|d| d.message()).unwrap_or("")
    }

    #[tokio::test]
    async fn test_click_reaches_vnc_server() {
        let daemon = TestDaemon::start().await;

        let response = daemon
            .send(Command::Click {
                x: 10,
                y: 20,
                button: MouseButton::Right,
                double: false,
            })
            .await;
        assert!(response.success, "{:?}", response.error);
        assert_eq!(message(&response), "Clicked right button at (10, 20)");

        assert_eq!(
            daemon.vnc.wait_for_input(2).await,
            vec![
                ClientEvent::Pointer { x: 10, y: 20, mask: 4 },
                ClientEvent::Pointer { x: 10, y: 20, mask: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_double_click_sends_two_presses() {
        let daemon = TestDaemon::start().await;

        let response = daemon
            .send(Command::Click {
                x: 1,
                y: 2,
                button: MouseButton::Left,
                double: true,
            })
            .await;
        assert!(response.success);

        let masks: Vec<u8> = daemon
            .vnc
            .wait_for_input(4)
            .await
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Pointer { mask, .. } => Some(mask),
                _ => None,
            })
            .collect();
        assert_eq!(masks, vec![1, 0, 1, 0]);
    }

    #[tokio::test]
    async fn test_click_out_of_bounds_is_rejected() {
        let daemon = TestDaemon::start().await;

        // Fake screen is 64x48
        let response = daemon
            .send(Command::Click {
                x: 64,
                y: 0,
                button: MouseButton::Left,
                double: false,
            })
            .await;
        assert!(!response.success);
        let err = response.error.unwrap();
        assert_eq!(err.code, ErrorCode::OutOfBounds);
        assert!(err.message.contains("(63, 47)"));
        assert!(daemon.vnc.input_events().await.is_empty());
    }

    #[tokio::test]
    async fn test_move_sends_buttonless_pointer() {
        let daemon = TestDaemon::start().await;

        let response = daemon.send(Command::Move { x: 5, y: 6 }).await;
        assert!(response.success);
        assert_eq!(message(&response), "Moved pointer to (5, 6)");
        assert_eq!(
            daemon.vnc.wait_for_input(1).await,
            vec![ClientEvent::Pointer { x: 5, y: 6, mask: 0 }]
        );
    }

    #[tokio::test]
    async fn test_key_combo() {
        let daemon = TestDaemon::start().await;

        let response = daemon
            .send(Command::KeyPress {
                key: "Ctrl+c".to_string(),
            })
            .await;
        assert!(response.success, "{:?}", response.error);

        let events = daemon.vnc.wait_for_input(4).await;
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[1],
            ClientEvent::Key {
                keysym: 'c' as u32,
                down: true
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_key_never_connects() {
        let daemon = TestDaemon::start().await;

        let response = daemon
            .send(Command::KeyPress {
                key: "Hyperdrive".to_string(),
            })
            .await;
        assert!(!response.success);
        let err = response.error.unwrap();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("Hyperdrive"));
        assert_eq!(daemon.vnc.connections(), 0);
    }

    #[tokio::test]
    async fn test_empty_key_is_invalid() {
        let daemon = TestDaemon::start().await;
        let response = daemon
            .send(Command::KeyPress {
                key: "  ".to_string(),
            })
            .await;
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_type_text_with_enter() {
        let daemon = TestDaemon::start().await;

        let response = daemon
            .send(Command::TypeText {
                text: "hi".to_string(),
                enter: true,
            })
            .await;
        assert!(response.success);
        assert_eq!(message(&response), "Typed 2 characters and pressed Enter");

        let downs: Vec<u32> = daemon
            .vnc
            .wait_for_input(6)
            .await
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Key { keysym, down: true } => Some(keysym),
                _ => None,
            })
            .collect();
        assert_eq!(downs, vec!['h' as u32, 'i' as u32, keysym::RETURN]);
    }

    #[tokio::test]
    async fn test_type_multiline_uses_one_connection() {
        let daemon = TestDaemon::start().await;

        let response = daemon
            .send(Command::TypeMultiline {
                lines: vec!["a".to_string(), "b".to_string()],
            })
            .await;
        assert!(response.success);
        assert_eq!(message(&response), "Typed 2 lines");
        assert_eq!(daemon.vnc.connections(), 1);

        let returns = daemon
            .vnc
            .wait_for_input(8)
            .await
            .into_iter()
            .filter(|e| {
                *e == ClientEvent::Key {
                    keysym: keysym::RETURN,
                    down: true,
                }
            })
            .count();
        assert_eq!(returns, 2);
    }

    #[tokio::test]
    async fn test_screenshot_returns_base64_jpeg() {
        let daemon = TestDaemon::start().await;

        let response = daemon.send(Command::Screenshot { delay_ms: 0 }).await;
        assert!(response.success, "{:?}", response.error);

        match response.data.unwrap() {
            ResponseData::Screenshot { message, image } => {
                assert!(message.starts_with("Screenshot captured (64x48"));
                assert!(!message.contains("delay"));
                assert_eq!(image.mime_type, "image/jpeg");
                assert_eq!((image.width, image.height), (64, 48));
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(&image.data)
                    .unwrap();
                assert_eq!(&bytes[..2], &[0xff, 0xd8]);
            }
            other => panic!("expected screenshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_screenshot_delay_is_honoured_and_reported() {
        let daemon = TestDaemon::start().await;

        let started = std::time::Instant::now();
        let response = daemon.send(Command::Screenshot { delay_ms: 2000 }).await;
        assert!(started.elapsed() >= Duration::from_millis(1900));
        assert!(response.success);
        assert!(message(&response).contains("after 2000ms delay"));
    }

    #[tokio::test]
    async fn test_screenshot_delay_out_of_range() {
        let daemon = TestDaemon::start().await;

        let response = daemon
            .send(Command::Screenshot {
                delay_ms: MAX_SCREENSHOT_DELAY_MS + 1,
            })
            .await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);
        assert_eq!(daemon.vnc.connections(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_vnc_server_is_connection_error() {
        let short_id = Uuid::new_v4().simple().to_string();
        let socket_path = PathBuf::from("/tmp").join(format!("rfbpilot-{}.sock", &short_id[..8]));
        let pid_path = socket_path.with_extension("pid");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let manager = ConnectionManager::new(crate::config::EndpointConfig::new(
            "127.0.0.1",
            port,
            None,
        ));
        let server = DaemonServer::bind_to(socket_path.clone(), pid_path.clone(), manager)
            .await
            .unwrap();
        let handle = tokio::spawn(async move {
            let _ = timeout(Duration::from_secs(5), server.run()).await;
        });

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        stream
            .write_all(b"{\"id\":\"x\",\"command\":{\"action\":\"move\",\"x\":1,\"y\":1}}\n")
            .await
            .unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();

        assert!(!response.success);
        let err = response.error.unwrap();
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
        assert!(err.suggestion.is_some());

        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
        let _ = std::fs::remove_file(&pid_path);
    }

    #[tokio::test]
    async fn test_invalid_json_gets_error_response() {
        let daemon = TestDaemon::start().await;

        let response = daemon.send_raw("{not json").await;
        assert!(!response.success);
        assert_eq!(response.id, "unknown");
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_shutdown_stops_run_and_removes_socket() {
        let short_id = Uuid::new_v4().simple().to_string();
        let socket_path = PathBuf::from("/tmp").join(format!("rfbpilot-{}.sock", &short_id[..8]));
        let pid_path = socket_path.with_extension("pid");
        let vnc = FakeVncServer::start(FakeOptions::default()).await;

        let server = DaemonServer::bind_to(
            socket_path.clone(),
            pid_path.clone(),
            ConnectionManager::new(vnc.endpoint(None)),
        )
        .await
        .unwrap();
        assert!(pid_path.exists());

        let handle = tokio::spawn(async move {
            server.run().await.unwrap();
        });

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        stream
            .write_all(b"{\"id\":\"s\",\"command\":{\"action\":\"shutdown\"}}\n")
            .await
            .unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let response: Response = serde_json::from_str(&line).unwrap();
        assert!(response.success);
        drop(reader);

        timeout(Duration::from_secs(10), handle)
            .await
            .expect("daemon did not stop")
            .unwrap();
        assert!(!socket_path.exists());
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn test_read_line_bounded_handles_utf8_chunks() {
        let data = "hello 你好\n".as_bytes().to_vec();
        let cursor = std::io::Cursor::new(data);
        let mut reader = BufReader::with_capacity(1, cursor);
        let mut buf = String::new();

        let bytes = read_line_bounded(&mut reader, &mut buf, 1024)
            .await
            .expect("read line");

        assert!(bytes > 0);
        assert_eq!(buf, "hello 你好\n");
    }

    #[tokio::test]
    async fn test_read_line_bounded_rejects_oversized() {
        let data = vec![b'a'; 64];
        let mut reader = BufReader::new(std::io::Cursor::new(data));
        let mut buf = String::new();

        let err = read_line_bounded(&mut reader, &mut buf, 16).await.unwrap_err();
        assert!(err.to_string().contains("16 byte limit"));
    }

    #[tokio::test]
    async fn test_bind_to_creates_socket_parent_dir() {
        let short_id = Uuid::new_v4().simple().to_string();
        let base_dir = PathBuf::from("/tmp").join(format!("rfbpilot-custom-{}", &short_id[..8]));
        let socket_dir = base_dir.join("nested");
        let socket_path = socket_dir.join("rfbpilot.sock");
        let pid_path = socket_path.with_extension("pid");

        let manager = ConnectionManager::new(crate::config::EndpointConfig::default());
        let server = DaemonServer::bind_to(socket_path.clone(), pid_path.clone(), manager)
            .await
            .expect("Failed to bind server");
        assert!(socket_dir.exists());

        drop(server);
        assert!(!socket_path.exists());
        let _ = std::fs::remove_dir_all(&base_dir);
    }

    #[test]
    fn test_is_daemon_alive() {
        let short_id = Uuid::new_v4().simple().to_string();
        let pid_path = PathBuf::from("/tmp").join(format!("rfbpilot-{}.pid", &short_id[..8]));

        assert!(!is_daemon_alive(&pid_path));

        std::fs::write(&pid_path, std::process::id().to_string()).unwrap();
        assert!(is_daemon_alive(&pid_path));

        std::fs::write(&pid_path, "not a pid").unwrap();
        assert!(!is_daemon_alive(&pid_path));

        let _ = std::fs::remove_file(&pid_path);
    }
}
