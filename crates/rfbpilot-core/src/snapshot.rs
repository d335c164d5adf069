//! Screen geometry and captured frames.
//!
//! # Coordinates
//!
//! Coordinates are pixels with the origin at the upper-left corner. A point
//! is on screen when `0 <= x < width` and `0 <= y < height`. Until the
//! remote side has reported its size every representable point is accepted.

use serde::{Deserialize, Serialize};

use crate::error::DesktopError;

/// Remote screen dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u16,
    pub height: u16,
}

impl ScreenSize {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Number of pixels on screen.
    pub fn pixel_count(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }

    /// A zero dimension means the server has not told us yet.
    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// A validated pointer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

/// Check a requested coordinate against the screen.
///
/// Unknown dimensions are permissive. The check is half-open while the error
/// message states the inclusive range `(0, 0) to (width-1, height-1)`.
///
/// RFB pointer events carry each coordinate as a `u16`, so with unknown
/// dimensions the permissive range is `0..=65535` rather than unbounded.
/// Anything negative or larger cannot be put on the wire and is rejected
/// with the same out-of-bounds error.
pub fn validate_point(x: i64, y: i64, size: Option<ScreenSize>) -> Result<Point, DesktopError> {
    let known = size.filter(ScreenSize::is_known);

    let (max_x, max_y) = match known {
        Some(size) => (i64::from(size.width) - 1, i64::from(size.height) - 1),
        None => (i64::from(u16::MAX), i64::from(u16::MAX)),
    };

    if !(0..=max_x).contains(&x) || !(0..=max_y).contains(&y) {
        return Err(DesktopError::CoordinateOutOfBounds { x, y, max_x, max_y });
    }

    // Range checked above
    Ok(Point {
        x: x as u16,
        y: y as u16,
    })
}

/// A frame normalized to canonical RGBA.
///
/// `rgba.len() == width * height * 4` always holds; the normalizer refuses
/// to build a frame otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u16,
    pub height: u16,
    pub rgba: Vec<u8>,
}

impl CapturedFrame {
    pub fn size(&self) -> ScreenSize {
        ScreenSize::new(self.width, self.height)
    }
}
