//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{EndpointConfig, DEFAULT_PORT};

/// Remote desktop automation over VNC for AI agents.
///
/// Click, type, press keys and take screenshots on any machine that runs a
/// VNC server. Commands go through a background daemon that opens a fresh
/// VNC connection for every operation and answers in JSON.
#[derive(Debug, Parser)]
#[command(name = "rfbpilot", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Click a mouse button at a screen coordinate
    #[command(after_help = "\
Coordinates are 0-indexed pixels. Take a screenshot first to see the
screen size.

Examples:
  rfbpilot click 100 200                # Left click
  rfbpilot click 100 200 --double       # Double click
  rfbpilot click 640 360 -b right       # Open a context menu")]
    Click(ClickArgs),

    /// Move the pointer without clicking
    #[command(after_help = "\
Examples:
  rfbpilot move 500 300                 # Hover over a menu item")]
    Move(MoveArgs),

    /// Press a key or key combination
    #[command(after_long_help = "\
Supported Keys:
  Editing:     Enter, Tab, Escape, Backspace, Space, Delete, Insert
  Navigation:  Up, Down, Left, Right, Home, End, PageUp, PageDown
  Function:    F1 to F12
  Modifiers:   Ctrl, Alt, Shift, Meta, Super (also Cmd, Win)
  Characters:  any single character, 'plus' for + inside a combo

Examples:
  rfbpilot key Enter                    # Press Enter
  rfbpilot key Ctrl+c                   # Copy
  rfbpilot key Ctrl+Alt+Delete          # Modifiers go down in order
  rfbpilot key Shift+F10                # Context menu from the keyboard")]
    Key(KeyArgs),

    /// Type text into the focused field
    #[command(
        name = "type",
        after_help = "\
Examples:
  rfbpilot type 'Hello, world!'         # Type literal text
  rfbpilot type --enter 'ls -la'        # Type, then press Enter"
    )]
    Type(TypeArgs),

    /// Type several lines, pressing Enter after each
    #[command(after_help = "\
Examples:
  rfbpilot type-lines 'first line' 'second line'")]
    TypeLines(TypeLinesArgs),

    /// Capture the screen as a JPEG
    #[command(after_help = "\
Without --output the JSON response (with base64 image data) is printed.

Examples:
  rfbpilot screenshot -o screen.jpg     # Save the image
  rfbpilot screenshot --delay 2000      # Let an animation finish first")]
    Screenshot(ScreenshotArgs),

    /// Show an end-to-end usage example
    Examples,

    /// Start the daemon process (usually auto-started)
    Daemon(DaemonArgs),

    /// Stop the daemon process
    Stop,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum Button {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, clap::Args)]
#[command(allow_negative_numbers = true)]
pub struct ClickArgs {
    /// X coordinate in pixels
    pub x: i64,

    /// Y coordinate in pixels
    pub y: i64,

    /// Mouse button
    #[arg(short, long, value_enum, default_value_t = Button::Left)]
    pub button: Button,

    /// Click twice in quick succession
    #[arg(short, long)]
    pub double: bool,
}

#[derive(Debug, clap::Args)]
#[command(allow_negative_numbers = true)]
pub struct MoveArgs {
    /// X coordinate in pixels
    pub x: i64,

    /// Y coordinate in pixels
    pub y: i64,
}

#[derive(Debug, clap::Args)]
pub struct KeyArgs {
    /// Key or combo to press (e.g., Enter, Ctrl+c, Ctrl+Alt+Delete)
    pub key: String,
}

#[derive(Debug, clap::Args)]
pub struct TypeArgs {
    /// Text to type
    pub text: String,

    /// Press Enter after the text
    #[arg(short, long)]
    pub enter: bool,
}

#[derive(Debug, clap::Args)]
pub struct TypeLinesArgs {
    /// Lines to type
    #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
    pub lines: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct ScreenshotArgs {
    /// Wait this many milliseconds before capturing (max 300000)
    #[arg(short, long, default_value_t = 0, value_name = "MS")]
    pub delay: u64,

    /// Write the decoded JPEG to this file instead of printing JSON
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// Where the daemon finds the VNC server.
#[derive(Debug, clap::Args)]
pub struct DaemonArgs {
    /// VNC server host
    #[arg(long, env = "RFBPILOT_VNC_HOST", default_value = "localhost")]
    pub host: String,

    /// VNC server port
    #[arg(long, env = "RFBPILOT_VNC_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// VNC password, if the server asks for one
    #[arg(long, env = "RFBPILOT_VNC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl DaemonArgs {
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig::new(self.host.clone(), self.port, self.password.clone())
    }
}

/// End-to-end example text for the `examples` command.
pub const EXAMPLES_TEXT: &str = r#"End-to-end example: write a note in a desktop text editor

The daemon starts on first use and connects to the VNC server named by
RFBPILOT_VNC_HOST, RFBPILOT_VNC_PORT and RFBPILOT_VNC_PASSWORD.

# 1. Point rfbpilot at the VNC server
export RFBPILOT_VNC_HOST=192.168.1.50
export RFBPILOT_VNC_PASSWORD=secret

# 2. Look at the screen to find the editor
rfbpilot screenshot -o screen.jpg

# 3. Click into the editor window
rfbpilot click 640 360

# 4. Type a few lines
rfbpilot type-lines "Shopping list" "- milk" "- bread"

# 5. Save with the keyboard
rfbpilot key Ctrl+s

# 6. Wait for the save dialog, then check the result
rfbpilot screenshot --delay 1000 -o saved.jpg

# 7. Stop the daemon when done
rfbpilot stop
"#;
