//! Remote endpoint configuration.

use std::fmt;
use std::time::Duration;

/// Default RFB port (display :0).
pub const DEFAULT_PORT: u16 = 5900;

/// Time allowed for handshake plus first frame.
pub const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the VNC server lives and how to log in.
///
/// Built once when the daemon starts and shared read-only afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            // An empty password means "no password"
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT, None)
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
