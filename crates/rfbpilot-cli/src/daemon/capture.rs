//! Framebuffer capture and the screenshot pipeline.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use rfbpilot_core::corruption::{inspect, CorruptionReport, Severity};
use rfbpilot_core::encode::{encode_jpeg, EncodedImage, JpegSettings};
use rfbpilot_core::error::DesktopError;
use rfbpilot_core::pixel::{normalize, PixelFormat};

use crate::daemon::rfb::{RawFrame, RemoteDesktop};

/// How long to wait for the server to answer an update request.
pub const UPDATE_WAIT: Duration = Duration::from_millis(2000);

/// Request a fresh full frame and return the framebuffer.
///
/// A server that does not answer in time is not an error: the last frame
/// the session received is used instead.
pub(crate) async fn capture_frame<D: RemoteDesktop>(desktop: &D) -> Result<RawFrame, DesktopError> {
    let seen = desktop.frame_count();
    desktop.request_update(false).await?;

    match timeout(UPDATE_WAIT, desktop.wait_for_frame(seen)).await {
        Ok(result) => result?,
        Err(_) => warn!(
            "No framebuffer update within {}ms, using the last received frame",
            UPDATE_WAIT.as_millis()
        ),
    }

    desktop.framebuffer().await.ok_or(DesktopError::NoFramebuffer)
}

fn log_report(report: &CorruptionReport, format: &PixelFormat) {
    for finding in &report.findings {
        match finding.severity {
            Severity::LikelyCorrupt => warn!(
                "Frame looks corrupted ({}); server pixel format {:?}",
                finding.message, format
            ),
            Severity::Warning => debug!("Frame check: {}", finding.message),
        }
    }
}

/// Capture, normalize, check and encode the current screen.
pub(crate) async fn screenshot<D: RemoteDesktop>(
    desktop: &D,
    settings: JpegSettings,
) -> Result<EncodedImage, DesktopError> {
    let raw = capture_frame(desktop).await?;
    debug!(
        "Captured {}x{} frame, {} bytes at {} bpp",
        raw.size.width,
        raw.size.height,
        raw.data.len(),
        raw.format.bits_per_pixel
    );

    // Pixel conversion and JPEG encoding are CPU bound
    tokio::task::spawn_blocking(move || {
        let frame = normalize(&raw.data, raw.size.width, raw.size.height, &raw.format)?;
        log_report(&inspect(&frame.rgba), &raw.format);
        encode_jpeg(&frame, &settings)
    })
    .await
    .map_err(|e| DesktopError::Encode(format!("encoder task failed: {}", e)))?
}
