//! Protocol types for CLI-daemon communication.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// A request from CLI to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: Command,
}

/// Operations the daemon can execute against the remote desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Click (or double-click) a mouse button at a pixel coordinate.
    Click {
        x: i64,
        y: i64,
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        double: bool,
    },
    /// Move the pointer without pressing any button.
    Move { x: i64, y: i64 },
    /// Press a key or key combination such as `Ctrl+Alt+Delete`.
    KeyPress { key: String },
    /// Type text character by character.
    TypeText {
        text: String,
        #[serde(default)]
        enter: bool,
    },
    /// Type several lines, pressing Enter after each one.
    TypeMultiline { lines: Vec<String> },
    /// Capture the screen as a JPEG, optionally after a delay.
    Screenshot {
        #[serde(default)]
        delay_ms: u64,
    },
    /// Shutdown the daemon gracefully.
    Shutdown,
}

/// Mouse button for click commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// RFB pointer button mask (bit 0 = left, bit 1 = middle, bit 2 = right).
    pub fn mask(self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

/// A response from daemon to CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    pub fn success(id: impl Into<String>, data: ResponseData) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: ApiError) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Response payload variants.
///
/// Every operation produces a text summary; screenshots add an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// Captured screen image.
    Screenshot {
        message: String,
        image: ImagePayload,
    },
    /// Generic success message.
    Ok { message: String },
}

impl ResponseData {
    /// The text summary carried by every payload.
    pub fn message(&self) -> &str {
        match self {
            ResponseData::Screenshot { message, .. } | ResponseData::Ok { message } => message,
        }
    }
}

/// An encoded image in transit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    /// Base64-encoded image bytes.
    pub data: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Whether the image was downscaled to fit the size limit.
    pub resized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_defaults_to_single_left() {
        let json = r#"{"id":"1","command":{"action":"click","x":10,"y":20}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(
            request.command,
            Command::Click {
                x: 10,
                y: 20,
                button: MouseButton::Left,
                double: false,
            }
        );
    }

    #[test]
    fn command_tags_are_snake_case() {
        let cmd = Command::TypeMultiline {
            lines: vec!["a".into()],
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"action\":\"type_multiline\""));

        let cmd = Command::KeyPress {
            key: "Ctrl+C".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"action\":\"key_press\""));
    }

    #[test]
    fn screenshot_delay_defaults_to_zero() {
        let json = r#"{"action":"screenshot"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, Command::Screenshot { delay_ms: 0 });
    }

    #[test]
    fn button_masks_follow_rfb_bits() {
        assert_eq!(MouseButton::Left.mask(), 1);
        assert_eq!(MouseButton::Middle.mask(), 2);
        assert_eq!(MouseButton::Right.mask(), 4);
    }

    #[test]
    fn error_response_omits_data() {
        let response = Response::error("9", ApiError::invalid_input("nope"));
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("\"data\""));
        assert!(json.contains("\"success\":false"));
    }

    #[test]
    fn screenshot_payload_exposes_message() {
        let data = ResponseData::Screenshot {
            message: "Screenshot captured".into(),
            image: ImagePayload {
                data: "AAAA".into(),
                mime_type: "image/jpeg".into(),
                width: 1,
                height: 1,
                resized: false,
            },
        };
        assert_eq!(data.message(), "Screenshot captured");
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"type\":\"screenshot\""));
        assert!(json.contains("\"mime_type\":\"image/jpeg\""));
    }
}
