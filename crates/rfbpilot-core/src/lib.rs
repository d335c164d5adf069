//! Core types and logic for rfbpilot.
//!
//! This crate holds the runtime-free half of remote desktop automation over
//! RFB (VNC): data structures, key tables and the frame pipeline. The daemon
//! in `rfbpilot-cli` drives the network side and calls into it.
//!
//! # Modules
//!
//! - [`error`]: Error taxonomy and API errors with actionable suggestions
//! - [`protocol`]: JSON-line request/response protocol
//! - [`keysym`]: X11 keysym table and shift rules
//! - [`input`]: Key combination parsing
//! - [`snapshot`]: Screen geometry, coordinate validation, captured frames
//! - [`pixel`]: Pixel format normalization to RGBA
//! - [`corruption`]: Advisory checks for wrongly decoded frames
//! - [`encode`]: Size-bounded progressive JPEG encoding
//!
//! # Screenshot pipeline
//!
//! | Stage | Function | Output |
//! |-------|----------|--------|
//! | Normalize | [`pixel::normalize`] | [`snapshot::CapturedFrame`] (RGBA) |
//! | Inspect | [`corruption::inspect`] | [`corruption::CorruptionReport`] (logged only) |
//! | Encode | [`encode::encode_jpeg`] | [`encode::EncodedImage`] |

pub mod corruption;
pub mod encode;
pub mod error;
pub mod input;
pub mod keysym;
pub mod pixel;
pub mod protocol;
pub mod snapshot;
