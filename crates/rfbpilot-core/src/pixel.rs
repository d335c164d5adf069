//! Pixel format normalization.
//!
//! RFB servers send pixels in whatever format they negotiated. This module
//! converts a raw framebuffer into canonical RGBA (`[r, g, b, a]` per pixel).
//!
//! | Bytes/px | Layout | Rule |
//! |----------|--------|------|
//! | 1 | indexed | index used as a gray level (no palette lookup) |
//! | 2 | RGB565 LE | 5/6/5 channels scaled to 8 bits |
//! | 3 | RGB24 | copied, alpha 255 |
//! | 4 | RGB32 | passed through when already canonical, else decoded by shifts/maxima |

use serde::{Deserialize, Serialize};

use crate::error::DesktopError;
use crate::snapshot::CapturedFrame;

/// RFB pixel format descriptor (the 16-byte `PIXEL_FORMAT` structure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// 32-bit little-endian with red in the lowest byte, i.e. RGBA in memory.
    pub fn rgba32() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 0,
            green_shift: 8,
            blue_shift: 16,
        }
    }

    /// 32-bit little-endian with blue in the lowest byte, i.e. BGRA in memory.
    pub fn bgra32() -> Self {
        Self {
            red_shift: 16,
            blue_shift: 0,
            ..Self::rgba32()
        }
    }

    /// Parse the wire representation.
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        Self {
            bits_per_pixel: bytes[0],
            depth: bytes[1],
            big_endian: bytes[2] != 0,
            true_color: bytes[3] != 0,
            red_max: u16::from_be_bytes([bytes[4], bytes[5]]),
            green_max: u16::from_be_bytes([bytes[6], bytes[7]]),
            blue_max: u16::from_be_bytes([bytes[8], bytes[9]]),
            red_shift: bytes[10],
            green_shift: bytes[11],
            blue_shift: bytes[12],
            // bytes[13..16] are padding
        }
    }

    /// Serialize to the wire representation.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0] = self.bits_per_pixel;
        bytes[1] = self.depth;
        bytes[2] = u8::from(self.big_endian);
        bytes[3] = u8::from(self.true_color);
        bytes[4..6].copy_from_slice(&self.red_max.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.green_max.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.blue_max.to_be_bytes());
        bytes[10] = self.red_shift;
        bytes[11] = self.green_shift;
        bytes[12] = self.blue_shift;
        bytes
    }

    /// Bytes each pixel occupies on the wire.
    pub fn bytes_per_pixel(&self) -> usize {
        usize::from(self.bits_per_pixel).div_ceil(8)
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgba32()
    }
}

/// Where one colour channel lives inside a 32-bit pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub shift: u8,
    pub max: u16,
}

impl Channel {
    /// Extract this channel as an 8-bit intensity.
    fn extract(self, pixel: u32) -> u8 {
        // Some servers declare a 16-bit lane with the value in its upper byte
        if self.max == 0xff00 {
            return (pixel.checked_shr(u32::from(self.shift) + 8).unwrap_or(0) & 0xff) as u8;
        }
        if self.max == 0 {
            return 0;
        }
        let max = u32::from(self.max);
        let value = pixel.checked_shr(u32::from(self.shift)).unwrap_or(0) & max;
        (value * 255 / max) as u8
    }
}

/// How the source bytes are laid out, decided once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayout {
    Indexed8,
    Rgb565,
    Rgb24,
    Rgb32 {
        red: Channel,
        green: Channel,
        blue: Channel,
        big_endian: bool,
    },
}

impl SourceLayout {
    /// Pick the decoding branch for a pixel width.
    pub fn detect(bytes_per_pixel: usize, format: &PixelFormat) -> Result<Self, DesktopError> {
        match bytes_per_pixel {
            1 => Ok(SourceLayout::Indexed8),
            2 => Ok(SourceLayout::Rgb565),
            3 => Ok(SourceLayout::Rgb24),
            4 => Ok(SourceLayout::Rgb32 {
                red: Channel {
                    shift: format.red_shift,
                    max: format.red_max,
                },
                green: Channel {
                    shift: format.green_shift,
                    max: format.green_max,
                },
                blue: Channel {
                    shift: format.blue_shift,
                    max: format.blue_max,
                },
                big_endian: format.big_endian,
            }),
            other => Err(DesktopError::UnsupportedPixelFormat(format!(
                "{} bytes per pixel",
                other
            ))),
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            SourceLayout::Indexed8 => 1,
            SourceLayout::Rgb565 => 2,
            SourceLayout::Rgb24 => 3,
            SourceLayout::Rgb32 { .. } => 4,
        }
    }

    /// True when the 32-bit layout already is RGBA in memory.
    pub fn is_canonical(&self) -> bool {
        matches!(
            self,
            SourceLayout::Rgb32 {
                red: Channel { shift: 0, max: 255 },
                green: Channel { shift: 8, max: 255 },
                blue: Channel { shift: 16, max: 255 },
                big_endian: false,
            }
        )
    }

    fn decode_pixel(&self, src: &[u8], dst: &mut [u8]) {
        match *self {
            SourceLayout::Indexed8 => {
                let level = src[0];
                dst.copy_from_slice(&[level, level, level, 255]);
            }
            SourceLayout::Rgb565 => {
                let pixel = u16::from_le_bytes([src[0], src[1]]);
                let r = (pixel >> 11) & 0x1f;
                let g = (pixel >> 5) & 0x3f;
                let b = pixel & 0x1f;
                dst[0] = (u32::from(r) * 255 / 31) as u8;
                dst[1] = (u32::from(g) * 255 / 63) as u8;
                dst[2] = (u32::from(b) * 255 / 31) as u8;
                dst[3] = 255;
            }
            SourceLayout::Rgb24 => {
                dst[..3].copy_from_slice(&src[..3]);
                dst[3] = 255;
            }
            SourceLayout::Rgb32 {
                red,
                green,
                blue,
                big_endian,
            } => {
                let bytes = [src[0], src[1], src[2], src[3]];
                let pixel = if big_endian {
                    u32::from_be_bytes(bytes)
                } else {
                    u32::from_le_bytes(bytes)
                };
                dst[0] = red.extract(pixel);
                dst[1] = green.extract(pixel);
                dst[2] = blue.extract(pixel);
                dst[3] = 255;
            }
        }
    }
}

/// Convert a raw framebuffer to canonical RGBA.
///
/// Bytes per pixel are derived from `raw.len() / (width * height)`, so the
/// buffer describes itself; `format` only matters for 32-bit pixels.
pub fn normalize(
    raw: &[u8],
    width: u16,
    height: u16,
    format: &PixelFormat,
) -> Result<CapturedFrame, DesktopError> {
    let pixels = usize::from(width) * usize::from(height);
    if pixels == 0 {
        return Err(DesktopError::UnsupportedPixelFormat(format!(
            "empty {}x{} frame",
            width, height
        )));
    }

    let layout = SourceLayout::detect(raw.len() / pixels, format)?;
    let bpp = layout.bytes_per_pixel();

    let rgba = if layout.is_canonical() {
        raw[..pixels * 4].to_vec()
    } else {
        let mut out = vec![0u8; pixels * 4];
        for (src, dst) in raw
            .chunks_exact(bpp)
            .take(pixels)
            .zip(out.chunks_exact_mut(4))
        {
            layout.decode_pixel(src, dst);
        }
        out
    };

    let expected = pixels * 4;
    if rgba.len() != expected {
        return Err(DesktopError::FramebufferSizeMismatch {
            expected,
            actual: rgba.len(),
        });
    }

    Ok(CapturedFrame {
        width,
        height,
        rgba,
    })
}
