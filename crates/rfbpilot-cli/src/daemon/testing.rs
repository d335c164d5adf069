//! Test doubles: an in-process VNC server and a recording desktop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use rfbpilot_core::error::DesktopError;
use rfbpilot_core::pixel::PixelFormat;
use rfbpilot_core::snapshot::{Point, ScreenSize};

use crate::config::EndpointConfig;
use crate::daemon::rfb::{RawFrame, RemoteDesktop};

/// The response a client must send to a VNC Authentication challenge.
///
/// The password (truncated or zero-padded to 8 bytes) is the DES key with
/// the bits of every byte reversed. Both 8-byte halves of the challenge are
/// encrypted with it.
pub fn vnc_auth_response(challenge: &[u8; 16], password: &str) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot = byte.reverse_bits();
    }
    let cipher = Des::new_from_slice(&key).unwrap();

    let mut response = *challenge;
    for block in response.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    response
}

/// Something the client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    SetPixelFormat(PixelFormat),
    Pointer { x: u16, y: u16, mask: u8 },
    Key { keysym: u32, down: bool },
    UpdateRequest { incremental: bool },
    SetEncodings(Vec<i32>),
}

/// How the fake server behaves.
#[derive(Debug, Clone)]
pub struct FakeOptions {
    pub size: ScreenSize,
    /// Format announced in ServerInit.
    pub format: PixelFormat,
    /// Bytes of one pixel in the format the client asked for; every update
    /// is the whole screen in this colour.
    pub fill: Vec<u8>,
    pub password: Option<String>,
    /// Answer update requests. When false the client never gets a frame.
    pub answer_updates: bool,
    /// Hang up right after ServerInit.
    pub close_after_init: bool,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            size: ScreenSize::new(64, 48),
            format: PixelFormat::bgra32(),
            // rgb(0x20, 0x40, 0x80) as BGRA
            fill: vec![0x80, 0x40, 0x20, 0x00],
            password: None,
            answer_updates: true,
            close_after_init: false,
        }
    }
}

/// A VNC server on localhost that records what clients send.
pub struct FakeVncServer {
    addr: SocketAddr,
    events: Arc<Mutex<Vec<ClientEvent>>>,
    connections: Arc<AtomicUsize>,
    accept: JoinHandle<()>,
}

impl FakeVncServer {
    pub async fn start(options: FakeOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept = {
            let events = Arc::clone(&events);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let events = Arc::clone(&events);
                    let options = options.clone();
                    tokio::spawn(async move {
                        // Client hang-ups end the connection with an error; ignore it
                        let _ = serve(stream, options, events).await;
                    });
                }
            })
        };

        Self {
            addr,
            events,
            connections,
            accept,
        }
    }

    pub fn endpoint(&self, password: Option<&str>) -> EndpointConfig {
        EndpointConfig::new(
            self.addr.ip().to_string(),
            self.addr.port(),
            password.map(String::from),
        )
    }

    pub async fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().await.clone()
    }

    /// Input events only, in order.
    pub async fn input_events(&self) -> Vec<ClientEvent> {
        self.events()
            .await
            .into_iter()
            .filter(|e| matches!(e, ClientEvent::Pointer { .. } | ClientEvent::Key { .. }))
            .collect()
    }

    /// Input events once `count` have arrived, or whatever arrived within 2s.
    ///
    /// The client can finish an operation before this server has read the
    /// last bytes it sent.
    pub async fn wait_for_input(&self, count: usize) -> Vec<ClientEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let events = self.input_events().await;
            if events.len() >= count || Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeVncServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    options: FakeOptions,
    events: Arc<Mutex<Vec<ClientEvent>>>,
) -> std::io::Result<()> {
    stream.write_all(b"RFB 003.008\n").await?;
    let mut version = [0u8; 12];
    stream.read_exact(&mut version).await?;

    match &options.password {
        Some(password) => {
            stream.write_all(&[1, 2]).await?;
            stream.read_u8().await?;
            let challenge: [u8; 16] = std::array::from_fn(|i| i as u8 * 13);
            stream.write_all(&challenge).await?;
            let mut response = [0u8; 16];
            stream.read_exact(&mut response).await?;
            if vnc_auth_response(&challenge, password) != response {
                let reason = b"Authentication failed";
                stream.write_u32(1).await?;
                stream.write_u32(reason.len() as u32).await?;
                stream.write_all(reason).await?;
                return Ok(());
            }
        }
        None => {
            stream.write_all(&[1, 1]).await?;
            stream.read_u8().await?;
        }
    }
    stream.write_u32(0).await?;

    // ClientInit
    stream.read_u8().await?;

    let name = b"fake desktop";
    stream.write_u16(options.size.width).await?;
    stream.write_u16(options.size.height).await?;
    stream.write_all(&options.format.to_bytes()).await?;
    stream.write_u32(name.len() as u32).await?;
    stream.write_all(name).await?;

    if options.close_after_init {
        return Ok(());
    }

    loop {
        let event = match stream.read_u8().await? {
            0 => {
                let mut padding = [0u8; 3];
                stream.read_exact(&mut padding).await?;
                let mut format = [0u8; 16];
                stream.read_exact(&mut format).await?;
                ClientEvent::SetPixelFormat(PixelFormat::from_bytes(&format))
            }
            2 => {
                stream.read_u8().await?;
                let count = stream.read_u16().await?;
                let mut encodings = Vec::new();
                for _ in 0..count {
                    encodings.push(stream.read_i32().await?);
                }
                ClientEvent::SetEncodings(encodings)
            }
            3 => {
                let incremental = stream.read_u8().await? != 0;
                let mut region = [0u8; 8];
                stream.read_exact(&mut region).await?;
                ClientEvent::UpdateRequest { incremental }
            }
            4 => {
                let down = stream.read_u8().await? != 0;
                stream.read_u16().await?;
                let keysym = stream.read_u32().await?;
                ClientEvent::Key { keysym, down }
            }
            5 => {
                let mask = stream.read_u8().await?;
                let x = stream.read_u16().await?;
                let y = stream.read_u16().await?;
                ClientEvent::Pointer { x, y, mask }
            }
            6 => {
                let mut padding = [0u8; 3];
                stream.read_exact(&mut padding).await?;
                let len = stream.read_u32().await?;
                let mut text = vec![0u8; len as usize];
                stream.read_exact(&mut text).await?;
                continue;
            }
            other => panic!("fake server got unknown message {}", other),
        };
        let answer = options.answer_updates && matches!(event, ClientEvent::UpdateRequest { .. });
        // Record before replying so the client never sees a reply first
        events.lock().await.push(event);
        if answer {
            send_full_update(&mut stream, &options).await?;
        }
    }
}

async fn send_full_update(stream: &mut TcpStream, options: &FakeOptions) -> std::io::Result<()> {
    let mut msg = vec![0, 0, 0, 1];
    msg.extend_from_slice(&[0, 0, 0, 0]);
    msg.extend_from_slice(&options.size.width.to_be_bytes());
    msg.extend_from_slice(&options.size.height.to_be_bytes());
    msg.extend_from_slice(&0i32.to_be_bytes());
    msg.extend_from_slice(&options.fill.repeat(options.size.pixel_count()));
    stream.write_all(&msg).await
}

/// A [`RemoteDesktop`] that records events with their timing.
pub struct RecordingDesktop {
    start: Instant,
    pub size: Option<ScreenSize>,
    pub frame: Option<RawFrame>,
    /// Fail the nth event sent (0-based).
    pub fail_at: Option<usize>,
    /// Whether update requests are answered.
    pub answers_updates: bool,
    events: std::sync::Mutex<Vec<(Duration, ClientEvent)>>,
    frames: AtomicUsize,
}

impl RecordingDesktop {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            size: Some(ScreenSize::new(1920, 1080)),
            frame: None,
            fail_at: None,
            answers_updates: true,
            events: std::sync::Mutex::new(Vec::new()),
            frames: AtomicUsize::new(0),
        }
    }

    pub fn with_frame(mut self, frame: RawFrame) -> Self {
        self.size = Some(frame.size);
        self.frame = Some(frame);
        self
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.timed_events().into_iter().map(|(_, e)| e).collect()
    }

    /// Events with the time since creation at which each was sent.
    pub fn timed_events(&self) -> Vec<(Duration, ClientEvent)> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: ClientEvent) -> Result<(), DesktopError> {
        let mut events = self.events.lock().unwrap();
        if self.fail_at == Some(events.len()) {
            return Err(DesktopError::Connection("connection reset".to_string()));
        }
        events.push((self.start.elapsed(), event));
        Ok(())
    }
}

impl RemoteDesktop for RecordingDesktop {
    async fn pointer_event(&self, point: Point, buttons: u8) -> Result<(), DesktopError> {
        self.record(ClientEvent::Pointer {
            x: point.x,
            y: point.y,
            mask: buttons,
        })
    }

    async fn key_event(&self, keysym: u32, down: bool) -> Result<(), DesktopError> {
        self.record(ClientEvent::Key { keysym, down })
    }

    async fn request_update(&self, incremental: bool) -> Result<(), DesktopError> {
        self.record(ClientEvent::UpdateRequest { incremental })?;
        if self.answers_updates {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::SeqCst) as u64
    }

    async fn wait_for_frame(&self, seen: u64) -> Result<(), DesktopError> {
        if self.frame_count() > seen {
            Ok(())
        } else {
            std::future::pending().await
        }
    }

    async fn screen_size(&self) -> Option<ScreenSize> {
        self.size
    }

    async fn framebuffer(&self) -> Option<RawFrame> {
        self.frame.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vnc_auth_truncates_password_to_eight_bytes() {
        let challenge = [0x42u8; 16];
        assert_eq!(
            vnc_auth_response(&challenge, "password"),
            vnc_auth_response(&challenge, "password123")
        );
        assert_ne!(vnc_auth_response(&challenge, "password"), challenge);
        assert_ne!(
            vnc_auth_response(&challenge, "secret"),
            vnc_auth_response(&challenge, "Secret")
        );
    }
}
