//! Per-operation VNC sessions.
//!
//! Every operation gets a fresh connection: connect, authenticate, wait for
//! the first full frame, run the operation, disconnect. Nothing is pooled, so
//! no operation can observe a stale framebuffer left by another.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use rfbpilot_core::error::DesktopError;

use crate::config::{EndpointConfig, READY_TIMEOUT};
use crate::daemon::rfb::{RemoteDesktop, Session};

/// Opens and closes sessions against one configured endpoint.
pub struct ConnectionManager {
    config: EndpointConfig,
    ready_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            ready_timeout: READY_TIMEOUT,
        }
    }

    /// Override how long handshake plus first frame may take.
    #[cfg(test)]
    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Connect and wait until the first full frame has arrived.
    ///
    /// Setup races a deadline. If the deadline wins the setup future is
    /// dropped along with any half-open session, which stops its reader.
    async fn open(&self) -> Result<Session, DesktopError> {
        let setup = async {
            let session = Session::connect(&self.config).await?;
            let seen = session.frame_count();
            session.request_update(false).await?;
            session.wait_for_frame(seen).await?;
            Ok::<_, DesktopError>(session)
        };

        match timeout(self.ready_timeout, setup).await {
            Ok(result) => result,
            Err(_) => Err(DesktopError::Connection(format!(
                "no frame from {} within {}ms",
                self.config.address(),
                self.ready_timeout.as_millis()
            ))),
        }
    }

    /// Run `op` against a fresh session and close it afterwards.
    ///
    /// The session is closed whether `op` succeeds or fails.
    pub async fn with_session<F, Fut, T>(&self, op: F) -> Result<T, DesktopError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, DesktopError>>,
    {
        let session = self.open().await?;
        info!("VNC session ready ({})", session.address());

        let result = op(session.clone()).await;

        session.close().await;
        debug!("VNC session closed");
        result
    }
}
