//! RFB (VNC) transport on top of `vnc-rs`.
//!
//! The library speaks the protocol: version negotiation, None and VNC
//! authentication, pixel format and encoding negotiation, and decoding of
//! Raw, CopyRect, Tight and ZRLE rectangles. This module turns its stream of
//! decoded rectangles into a full-screen framebuffer.
//!
//! After the handshake a background task polls the client, applies updates
//! and publishes progress on a watch channel, while callers send input
//! events through the same client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vnc::{
    ClientKeyEvent, ClientMouseEvent, VncClient, VncConnector, VncEncoding, VncEvent, X11Event,
};

use rfbpilot_core::error::DesktopError;
use rfbpilot_core::pixel::PixelFormat;
use rfbpilot_core::snapshot::{Point, ScreenSize};

use crate::config::EndpointConfig;

/// Pause between polls while the client has nothing queued.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Decode failures tolerated back to back before the connection counts as lost.
const MAX_DECODE_ERRORS_IN_A_ROW: u32 = 8;

#[derive(Debug, Error)]
pub enum RfbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("VNC error: {0}")]
    Vnc(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),
}

impl From<RfbError> for DesktopError {
    fn from(err: RfbError) -> Self {
        DesktopError::Connection(err.to_string())
    }
}

/// Pixel format requested from every server.
///
/// Matches `vnc::PixelFormat::bgra()`: 32-bit little-endian, blue in the
/// lowest byte.
pub fn session_format() -> PixelFormat {
    PixelFormat::bgra32()
}

/// True for errors from a broken compressed rectangle rather than a broken
/// connection.
///
/// Tight and ZRLE carry zlib streams (and Tight optionally JPEG). A bad
/// rectangle costs one region of one frame; the next update repaints it.
pub fn is_benign_decode_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["decompress", "inflate", "deflate", "zlib", "jpeg", "image data"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// A screen rectangle in framebuffer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One decoded event from the client, reduced to what the framebuffer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Resize(ScreenSize),
    /// Pixels in [`session_format`], row-major.
    Pixels(Rect, Vec<u8>),
    /// A Tight rectangle still in JPEG form.
    Jpeg(Rect, Vec<u8>),
    Copy { dst: Rect, src: Rect },
    /// An error the library reported as an event.
    Error(String),
    Ignored(&'static str),
}

impl From<VncEvent> for Update {
    fn from(event: VncEvent) -> Self {
        match event {
            VncEvent::SetResolution(screen) => {
                Update::Resize(ScreenSize::new(screen.width, screen.height))
            }
            VncEvent::RawImage(rect, data) => {
                Update::Pixels(Rect::new(rect.x, rect.y, rect.width, rect.height), data)
            }
            VncEvent::JpegImage(rect, data) => {
                Update::Jpeg(Rect::new(rect.x, rect.y, rect.width, rect.height), data)
            }
            VncEvent::Copy(dst, src) => Update::Copy {
                dst: Rect::new(dst.x, dst.y, dst.width, dst.height),
                src: Rect::new(src.x, src.y, src.width, src.height),
            },
            VncEvent::Error(message) => Update::Error(message),
            VncEvent::SetCursor(..) => Update::Ignored("cursor shape"),
            VncEvent::Bell => Update::Ignored("bell"),
            VncEvent::Text(_) => Update::Ignored("clipboard text"),
            _ => Update::Ignored("unhandled event"),
        }
    }
}

/// Latest remote screen contents in the session's pixel format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub size: ScreenSize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// Full-screen framebuffer kept up to date by the reader task.
#[derive(Debug)]
pub struct Framebuffer {
    size: ScreenSize,
    format: PixelFormat,
    data: Vec<u8>,
    received: bool,
}

impl Framebuffer {
    /// An empty framebuffer of unknown size.
    pub fn new(format: PixelFormat) -> Self {
        Self {
            size: ScreenSize::new(0, 0),
            format,
            data: Vec::new(),
            received: false,
        }
    }

    pub fn size(&self) -> ScreenSize {
        self.size
    }

    fn bpp(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    /// Apply one update. Returns whether screen contents changed.
    pub fn apply(&mut self, update: Update) -> bool {
        match update {
            Update::Resize(size) => {
                if size != self.size {
                    info!("Remote desktop is {}x{}", size.width, size.height);
                    self.resize(size);
                }
                false
            }
            Update::Pixels(rect, pixels) => {
                self.apply_raw(rect, &pixels);
                self.received = true;
                true
            }
            Update::Jpeg(rect, jpeg) => match decode_jpeg_rect(&jpeg) {
                Ok(pixels) => {
                    self.apply_raw(rect, &pixels);
                    self.received = true;
                    true
                }
                Err(e) => {
                    debug!("Skipping undecodable JPEG rectangle: {}", e);
                    false
                }
            },
            Update::Copy { dst, src } => {
                self.copy_rect(dst, src.x, src.y);
                self.received = true;
                true
            }
            Update::Error(_) | Update::Ignored(_) => false,
        }
    }

    /// Copy rectangle pixels in, clipping anything off screen.
    pub fn apply_raw(&mut self, rect: Rect, pixels: &[u8]) {
        let bpp = self.bpp();
        let screen_w = usize::from(self.size.width);
        let screen_h = usize::from(self.size.height);
        let (x, y) = (usize::from(rect.x), usize::from(rect.y));
        let rect_w = usize::from(rect.width);
        if x >= screen_w {
            return;
        }
        let cols = rect_w.min(screen_w - x);

        for row in 0..usize::from(rect.height) {
            let dy = y + row;
            if dy >= screen_h {
                break;
            }
            let src = row * rect_w * bpp;
            let dst = (dy * screen_w + x) * bpp;
            let len = cols * bpp;
            if src + len > pixels.len() {
                break;
            }
            self.data[dst..dst + len].copy_from_slice(&pixels[src..src + len]);
        }
    }

    /// Copy a region of the current framebuffer to `rect`.
    pub fn copy_rect(&mut self, rect: Rect, src_x: u16, src_y: u16) {
        let bpp = self.bpp();
        let screen_w = usize::from(self.size.width);
        let screen_h = usize::from(self.size.height);
        let rect_w = usize::from(rect.width);

        // Gather first so overlapping regions copy correctly
        let mut pixels = vec![0u8; rect_w * usize::from(rect.height) * bpp];
        for row in 0..usize::from(rect.height) {
            let sy = usize::from(src_y) + row;
            let sx = usize::from(src_x);
            if sy >= screen_h || sx >= screen_w {
                continue;
            }
            let cols = rect_w.min(screen_w - sx);
            let src = (sy * screen_w + sx) * bpp;
            let dst = row * rect_w * bpp;
            pixels[dst..dst + cols * bpp].copy_from_slice(&self.data[src..src + cols * bpp]);
        }
        self.apply_raw(rect, &pixels);
    }

    /// The server changed resolution; the old contents are meaningless.
    pub fn resize(&mut self, size: ScreenSize) {
        self.size = size;
        self.data = vec![0; size.pixel_count() * self.bpp()];
    }

    pub fn snapshot(&self) -> Option<RawFrame> {
        self.received.then(|| RawFrame {
            size: self.size,
            format: self.format,
            data: self.data.clone(),
        })
    }
}

/// Decode a JPEG rectangle into [`session_format`] pixels.
fn decode_jpeg_rect(jpeg: &[u8]) -> Result<Vec<u8>, image::ImageError> {
    let rgb = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?.to_rgb8();
    Ok(rgb.pixels().flat_map(|p| [p[2], p[1], p[0], 0]).collect())
}

/// Progress published by the reader task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStatus {
    /// Completed bursts of screen updates.
    pub frames: u64,
    /// Set once the connection is gone, with the reason.
    pub disconnected: Option<String>,
}

/// What the reader loop does after handling one poll.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    /// Poll again right away.
    Busy,
    /// Nothing queued; wait before polling again.
    Idle,
    Stop(String),
}

/// Reader state between polls.
///
/// The client hands out one rectangle at a time with no end-of-update
/// marker, so everything drained in one go counts as a single frame. The
/// counter moves once the queue runs dry, never in the middle of an update.
struct Reader {
    frame: Arc<Mutex<Framebuffer>>,
    status: watch::Sender<ReaderStatus>,
    dirty: bool,
    decode_errors: u32,
}

impl Reader {
    fn new(frame: Arc<Mutex<Framebuffer>>, status: watch::Sender<ReaderStatus>) -> Self {
        Self {
            frame,
            status,
            dirty: false,
            decode_errors: 0,
        }
    }

    async fn handle(&mut self, polled: Result<Option<Update>, String>) -> Step {
        match polled {
            Ok(Some(Update::Error(message))) | Err(message) => self.error(message),
            Ok(Some(update)) => {
                self.decode_errors = 0;
                if let Update::Ignored(what) = update {
                    debug!("Ignoring {}", what);
                } else if self.frame.lock().await.apply(update) {
                    self.dirty = true;
                }
                Step::Busy
            }
            Ok(None) => {
                if std::mem::take(&mut self.dirty) {
                    self.status.send_modify(|s| s.frames += 1);
                }
                Step::Idle
            }
        }
    }

    fn error(&mut self, message: String) -> Step {
        if !is_benign_decode_error(&message) {
            return Step::Stop(message);
        }
        self.decode_errors += 1;
        if self.decode_errors > MAX_DECODE_ERRORS_IN_A_ROW {
            return Step::Stop(format!("repeated decode errors, last: {}", message));
        }
        debug!("Ignoring rectangle decode error: {}", message);
        Step::Busy
    }

    fn disconnected(&self, reason: String) {
        self.status.send_modify(|s| s.disconnected = Some(reason));
    }
}

/// Poll `client` until the connection ends, returning why it ended.
async fn read_loop(client: &VncClient, reader: &mut Reader) -> String {
    loop {
        let polled = client
            .poll_event()
            .await
            .map(|event| event.map(Update::from))
            .map_err(|e| e.to_string());
        match reader.handle(polled).await {
            Step::Busy => {}
            Step::Idle => tokio::time::sleep(POLL_INTERVAL).await,
            Step::Stop(reason) => return reason,
        }
    }
}

/// Operations a remote desktop must support for input and capture.
pub(crate) trait RemoteDesktop {
    /// Move the pointer to `point` with the given button mask held.
    async fn pointer_event(&self, point: Point, buttons: u8) -> Result<(), DesktopError>;

    async fn key_event(&self, keysym: u32, down: bool) -> Result<(), DesktopError>;

    /// Ask for the whole screen.
    async fn request_update(&self, incremental: bool) -> Result<(), DesktopError>;

    /// Number of framebuffer updates received so far.
    fn frame_count(&self) -> u64;

    /// Wait until more than `seen` updates have arrived.
    async fn wait_for_frame(&self, seen: u64) -> Result<(), DesktopError>;

    /// Screen dimensions, `None` while unknown.
    async fn screen_size(&self) -> Option<ScreenSize>;

    /// Latest framebuffer, `None` before the first update.
    async fn framebuffer(&self) -> Option<RawFrame>;
}

struct SessionInner {
    address: String,
    client: Arc<VncClient>,
    frame: Arc<Mutex<Framebuffer>>,
    status: watch::Receiver<ReaderStatus>,
    closing: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        self.reader.abort();
        // Cancelled setups never reach `close`; shut the client down anyway
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let client = Arc::clone(&self.client);
            runtime.spawn(async move {
                let _ = client.close().await;
            });
        }
    }
}

/// A live connection to a VNC server.
///
/// Cheap to clone; the connection closes when the last clone is dropped or
/// [`Session::close`] is called.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Connect, authenticate and start the reader task.
    ///
    /// The library asks for the first full frame itself; waiting for it is
    /// up to the connection manager.
    pub async fn connect(config: &EndpointConfig) -> Result<Self, RfbError> {
        let address = config.address();
        info!("Connecting to VNC server at {}", address);
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        tcp.set_nodelay(true)?;

        // Only awaited when the server picks VNC authentication
        let asked_for_password = Arc::new(AtomicBool::new(false));
        let auth = {
            let asked = Arc::clone(&asked_for_password);
            let password = config.password.clone();
            async move {
                asked.store(true, Ordering::SeqCst);
                Ok(password.unwrap_or_default())
            }
        };

        let handshake = async move {
            VncConnector::new(tcp)
                .set_auth_method(auth)
                .allow_shared(true)
                .set_pixel_format(vnc::PixelFormat::bgra())
                .add_encoding(VncEncoding::Tight)
                .add_encoding(VncEncoding::Zrle)
                .add_encoding(VncEncoding::CopyRect)
                .add_encoding(VncEncoding::Raw)
                .add_encoding(VncEncoding::DesktopSizePseudo)
                .build()?
                .try_start()
                .await?
                .finish()
        };
        let client = handshake.await.map_err(|e| {
            if !asked_for_password.load(Ordering::SeqCst) {
                RfbError::Vnc(e.to_string())
            } else if config.password.is_none() {
                RfbError::AuthFailed("server requires a password but none is configured".to_string())
            } else {
                RfbError::AuthFailed(e.to_string())
            }
        })?;
        info!("Connected to VNC server at {}", address);

        let client = Arc::new(client);
        let frame = Arc::new(Mutex::new(Framebuffer::new(session_format())));
        let (status_tx, status_rx) = watch::channel(ReaderStatus::default());
        let closing = Arc::new(AtomicBool::new(false));

        let reader = {
            let client = Arc::clone(&client);
            let frame = Arc::clone(&frame);
            let closing = Arc::clone(&closing);
            tokio::spawn(async move {
                let mut reader = Reader::new(frame, status_tx);
                let reason = read_loop(&client, &mut reader).await;
                if closing.load(Ordering::SeqCst) {
                    debug!("Reader stopped during close: {}", reason);
                } else {
                    warn!("VNC connection lost: {}", reason);
                }
                reader.disconnected(reason);
            })
        };

        Ok(Self {
            inner: Arc::new(SessionInner {
                address,
                client,
                frame,
                status: status_rx,
                closing,
                reader,
            }),
        })
    }

    /// `host:port` of the server.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Why the connection is gone, if it is.
    pub fn disconnect_reason(&self) -> Option<String> {
        self.inner.status.borrow().disconnected.clone()
    }

    /// Close the connection and stop the reader.
    pub async fn close(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.reader.abort();
        if let Err(e) = self.inner.client.close().await {
            debug!("Error closing VNC client: {}", e);
        }
    }

    async fn send(&self, event: X11Event) -> Result<(), DesktopError> {
        if let Some(reason) = self.disconnect_reason() {
            return Err(DesktopError::Connection(reason));
        }
        self.inner
            .client
            .input(event)
            .await
            .map_err(|e| DesktopError::Connection(format!("send failed: {}", e)))
    }
}

impl RemoteDesktop for Session {
    async fn pointer_event(&self, point: Point, buttons: u8) -> Result<(), DesktopError> {
        debug!("pointer ({}, {}) mask={}", point.x, point.y, buttons);
        self.send(X11Event::PointerEvent(ClientMouseEvent {
            position_x: point.x,
            position_y: point.y,
            bottons: buttons,
        }))
        .await
    }

    async fn key_event(&self, keysym: u32, down: bool) -> Result<(), DesktopError> {
        debug!("key {:#06x} {}", keysym, if down { "down" } else { "up" });
        self.send(X11Event::KeyEvent(ClientKeyEvent {
            keycode: keysym,
            down,
        }))
        .await
    }

    /// The library has a single whole-screen refresh request. Its first
    /// request on a connection is the full one; later ones are incremental
    /// against a framebuffer this session already holds in full.
    async fn request_update(&self, incremental: bool) -> Result<(), DesktopError> {
        debug!("refresh requested (incremental={})", incremental);
        self.send(X11Event::Refresh).await
    }

    fn frame_count(&self) -> u64 {
        self.inner.status.borrow().frames
    }

    async fn wait_for_frame(&self, seen: u64) -> Result<(), DesktopError> {
        let mut status = self.inner.status.clone();
        let outcome = {
            let current = status
                .wait_for(|s| s.frames > seen || s.disconnected.is_some())
                .await
                .map_err(|_| DesktopError::Connection("reader task stopped".to_string()))?;
            if current.frames > seen {
                Ok(())
            } else {
                Err(current.disconnected.clone().unwrap_or_default())
            }
        };
        outcome.map_err(DesktopError::Connection)
    }

    async fn screen_size(&self) -> Option<ScreenSize> {
        Some(self.inner.frame.lock().await.size()).filter(ScreenSize::is_known)
    }

    async fn framebuffer(&self) -> Option<RawFrame> {
        self.inner.frame.lock().await.snapshot()
    }
}
