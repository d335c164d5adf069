//! Client side of the daemon socket.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rfbpilot_core::protocol::{Command, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::daemon::paths;

/// Maximum time to wait for daemon to start up.
const DAEMON_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between socket connection attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Response timeout for operations that do not wait on purpose.
///
/// Covers the VNC connect deadline, a frame update wait and the slowest
/// typing of a long text.
const BASE_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long to wait for the response to `command`.
pub fn request_timeout(command: &Command) -> Duration {
    match command {
        Command::Screenshot { delay_ms } => BASE_REQUEST_TIMEOUT + Duration::from_millis(*delay_ms),
        // Slow pace is 175ms per char plus shift steps; leave room for both
        Command::TypeText { text, .. } => {
            BASE_REQUEST_TIMEOUT + Duration::from_millis(200 * text.chars().count() as u64)
        }
        Command::TypeMultiline { lines } => {
            let chars: usize = lines.iter().map(|l| l.chars().count() + 1).sum();
            BASE_REQUEST_TIMEOUT + Duration::from_millis(200 * chars as u64 + 100 * lines.len() as u64)
        }
        _ => BASE_REQUEST_TIMEOUT,
    }
}

pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Connect to the daemon, starting it if necessary.
    ///
    /// A freshly started daemon reads its endpoint from the inherited
    /// `RFBPILOT_VNC_*` environment. A running daemon keeps its own.
    pub async fn connect() -> Result<Self> {
        let socket_path = paths::socket_path(None);

        if let Ok(stream) = UnixStream::connect(&socket_path).await {
            debug!("Connected to existing daemon");
            return Ok(Self { stream });
        }

        info!("Daemon not running, starting...");
        let child = Self::start_daemon()?;
        let stream = Self::wait_for_daemon(&socket_path, child).await?;
        Ok(Self { stream })
    }

    /// Connect to a running daemon without starting one.
    pub async fn connect_existing() -> Result<Option<Self>> {
        match UnixStream::connect(paths::socket_path(None)).await {
            Ok(stream) => Ok(Some(Self { stream })),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to connect to daemon"),
        }
    }

    /// Start the daemon as a detached background process.
    fn start_daemon() -> Result<std::process::Child> {
        use std::os::unix::process::CommandExt;

        let exe = std::env::current_exe().context("Failed to get current executable path")?;

        // A new process group keeps the daemon alive when the terminal closes
        let child = std::process::Command::new(exe)
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .context("Failed to spawn daemon process")?;

        Ok(child)
    }

    /// Wait for the daemon socket, failing early if the daemon exits.
    async fn wait_for_daemon(socket_path: &Path, mut child: std::process::Child) -> Result<UnixStream> {
        let start = std::time::Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    bail!(
                        "Daemon exited immediately with status: {} (run 'rfbpilot daemon' directly to diagnose)",
                        status
                    );
                }
                Ok(None) => {}
                Err(e) => debug!("Error checking daemon status: {}", e),
            }

            match UnixStream::connect(socket_path).await {
                Ok(stream) => {
                    info!("Connected to daemon after {:?}", start.elapsed());
                    return Ok(stream);
                }
                Err(_) => {
                    if start.elapsed() > DAEMON_STARTUP_TIMEOUT {
                        bail!("Daemon failed to start within {:?}", DAEMON_STARTUP_TIMEOUT);
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, request: Request) -> Result<Response> {
        let wait = request_timeout(&request.command);
        self.request_with_timeout(request, wait).await
    }

    pub async fn request_with_timeout(
        &mut self,
        request: Request,
        timeout_duration: Duration,
    ) -> Result<Response> {
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize request")?;
        debug!("Sending: {}", request_json);

        self.stream
            .write_all(request_json.as_bytes())
            .await
            .context("Failed to write request")?;
        self.stream
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        self.stream.flush().await.context("Failed to flush")?;

        let (reader, _writer) = self.stream.split();
        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();

        let bytes_read = timeout(timeout_duration, reader.read_line(&mut response_line))
            .await
            .with_context(|| format!("Request timed out after {:?}", timeout_duration))?
            .context("Failed to read response")?;

        if bytes_read == 0 {
            bail!("Daemon closed connection unexpectedly");
        }

        debug!("Received {} bytes", response_line.len());

        let response: Response =
            serde_json::from_str(&response_line).context("Failed to parse response")?;
        Ok(response)
    }
}
