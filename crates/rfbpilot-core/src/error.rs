//! AI-friendly error types with suggestions.
//!
//! [`DesktopError`] is the internal taxonomy raised while driving a remote
//! desktop. At the operation boundary it is converted into an [`ApiError`],
//! the wire form that always carries an actionable suggestion.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failures raised while operating a remote desktop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DesktopError {
    /// Handshake, authentication, transport failure, disconnect or setup timeout.
    #[error("VNC connection failed: {0}")]
    Connection(String),

    #[error(
        "Coordinates ({x}, {y}) are out of bounds. Valid range: (0, 0) to ({max_x}, {max_y})"
    )]
    CoordinateOutOfBounds { x: i64, y: i64, max_x: i64, max_y: i64 },

    #[error("Unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    #[error("Framebuffer size mismatch: expected {expected} bytes, got {actual}")]
    FramebufferSizeMismatch { expected: usize, actual: usize },

    /// The server did not answer a frame update request in time.
    ///
    /// Capture recovers from this locally by falling back to the last
    /// known framebuffer, so it rarely reaches a caller.
    #[error("Timed out waiting for a framebuffer update after {0}ms")]
    FrameUpdateTimeout(u64),

    #[error("No framebuffer available")]
    NoFramebuffer,

    /// Typing aborted part-way through a text. The whole text may be retried.
    #[error("Failed to type character {index} ({character:?}): {reason}")]
    CharacterSynthesis {
        index: usize,
        character: char,
        reason: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Image encoding failed: {0}")]
    Encode(String),
}

impl DesktopError {
    /// Whether the caller can reasonably retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DesktopError::Connection(_)
                | DesktopError::CharacterSynthesis { .. }
                | DesktopError::NoFramebuffer
        )
    }
}

/// Error codes for protocol responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConnectionFailed,
    OutOfBounds,
    UnsupportedFormat,
    CaptureFailed,
    SynthesisFailed,
    InvalidInput,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::ConnectionFailed => write!(f, "CONNECTION_FAILED"),
            ErrorCode::OutOfBounds => write!(f, "OUT_OF_BOUNDS"),
            ErrorCode::UnsupportedFormat => write!(f, "UNSUPPORTED_FORMAT"),
            ErrorCode::CaptureFailed => write!(f, "CAPTURE_FAILED"),
            ErrorCode::SynthesisFailed => write!(f, "SYNTHESIS_FAILED"),
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// An error response with AI-friendly context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ConnectionFailed,
            message: message.into(),
            suggestion: Some(
                "Check that the VNC server is running and that RFBPILOT_VNC_HOST, RFBPILOT_VNC_PORT and RFBPILOT_VNC_PASSWORD are correct".into(),
            ),
        }
    }

    pub fn out_of_bounds(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::OutOfBounds,
            message: message.into(),
            suggestion: Some(
                "Take a screenshot to check the screen dimensions, then use coordinates inside them"
                    .into(),
            ),
        }
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::UnsupportedFormat,
            message: message.into(),
            suggestion: Some(
                "Configure the VNC server for 8, 16, 24 or 32 bits per pixel".into(),
            ),
        }
    }

    pub fn capture_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::CaptureFailed,
            message: message.into(),
            suggestion: Some(
                "The remote screen could not be captured. Wait a moment and take the screenshot again".into(),
            ),
        }
    }

    /// Create a synthesis error for an aborted text operation.
    pub fn synthesis_failed(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::SynthesisFailed,
            message: message.into(),
            suggestion: Some(
                "Typing was aborted part-way. Check the focused field and retry the whole text"
                    .into(),
            ),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some("Check the command syntax and try again".into()),
        }
    }

    /// Create an invalid input error with a custom suggestion.
    pub fn invalid_input_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    pub fn unknown_key(key: &str) -> Self {
        Self::invalid_input_with_suggestion(
            format!("Unknown key: '{}'", key),
            "Use named keys like Enter, Tab, Escape, Up, F1, a single character, or combos like Ctrl+Alt+Delete",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
            suggestion: Some("This is an internal error. Please report it if it persists.".into()),
        }
    }
}

impl From<DesktopError> for ApiError {
    fn from(err: DesktopError) -> Self {
        let message = err.to_string();
        match err {
            DesktopError::Connection(_) => ApiError::connection_failed(message),
            DesktopError::CoordinateOutOfBounds { .. } => ApiError::out_of_bounds(message),
            DesktopError::UnsupportedPixelFormat(_) => ApiError::unsupported_format(message),
            DesktopError::FramebufferSizeMismatch { .. }
            | DesktopError::FrameUpdateTimeout(_)
            | DesktopError::NoFramebuffer => ApiError::capture_failed(message),
            DesktopError::CharacterSynthesis { .. } => ApiError::synthesis_failed(message),
            DesktopError::InvalidArgument(_) => ApiError::invalid_input(message),
            DesktopError::Encode(_) => ApiError::internal(message),
        }
    }
}
