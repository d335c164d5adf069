//! Size-bounded progressive JPEG encoding of captured frames.

use image::imageops::{self, FilterType};
use jpeg_encoder::{ColorType, Encoder};
use image::{ImageBuffer, RgbImage};

use crate::error::DesktopError;
use crate::snapshot::CapturedFrame;

pub const JPEG_MIME: &str = "image/jpeg";

/// Knobs for [`encode_jpeg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegSettings {
    /// Largest acceptable encoded size before downscaling.
    pub max_bytes: usize,
    pub quality: u8,
    /// Quality used for the downscaled re-encode.
    pub resize_quality: u8,
}

impl Default for JpegSettings {
    fn default() -> Self {
        Self {
            max_bytes: 800_000,
            quality: 80,
            resize_quality: 75,
        }
    }
}

/// An encoded screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub resized: bool,
}

/// Encode a frame, shrinking it once if the first pass is too large.
///
/// The shrink factor is `sqrt(max_bytes / size)` applied to both sides,
/// floored and kept at least one pixel. The smaller image is produced from
/// the original pixels, not from the first JPEG.
pub fn encode_jpeg(
    frame: &CapturedFrame,
    settings: &JpegSettings,
) -> Result<EncodedImage, DesktopError> {
    let rgb = to_rgb(frame)?;
    let data = encode_rgb(&rgb, settings.quality)?;

    if data.len() <= settings.max_bytes {
        return Ok(EncodedImage {
            data,
            mime_type: JPEG_MIME,
            width: rgb.width(),
            height: rgb.height(),
            resized: false,
        });
    }

    let scale = (settings.max_bytes as f64 / data.len() as f64).sqrt();
    let width = scaled(rgb.width(), scale);
    let height = scaled(rgb.height(), scale);

    let smaller = imageops::resize(&rgb, width, height, FilterType::Triangle);
    let data = encode_rgb(&smaller, settings.resize_quality)?;

    Ok(EncodedImage {
        data,
        mime_type: JPEG_MIME,
        width,
        height,
        resized: true,
    })
}

fn scaled(dim: u32, scale: f64) -> u32 {
    ((f64::from(dim) * scale).floor() as u32).max(1)
}

fn to_rgb(frame: &CapturedFrame) -> Result<RgbImage, DesktopError> {
    let rgb: Vec<u8> = frame
        .rgba
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    let (width, height) = (u32::from(frame.width), u32::from(frame.height));
    ImageBuffer::from_raw(width, height, rgb).ok_or_else(|| {
        DesktopError::Encode(format!(
            "buffer does not match {}x{} dimensions",
            width, height
        ))
    })
}

fn encode_rgb(image: &RgbImage, quality: u8) -> Result<Vec<u8>, DesktopError> {
    let dimension = |d: u32| {
        u16::try_from(d).map_err(|_| DesktopError::Encode(format!("dimension {} too large", d)))
    };
    let (width, height) = (dimension(image.width())?, dimension(image.height())?);

    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf, quality);
    encoder.set_progressive(true);
    encoder
        .encode(image.as_raw(), width, height, ColorType::Rgb)
        .map_err(|e| DesktopError::Encode(e.to_string()))?;
    Ok(buf)
}
