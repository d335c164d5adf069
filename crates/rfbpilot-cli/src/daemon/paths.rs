//! Where the daemon keeps its socket and PID file.
//!
//! Directory lookup order:
//! 1. `RFBPILOT_SOCKET_DIR`
//! 2. `XDG_RUNTIME_DIR/rfbpilot`
//! 3. `~/.rfbpilot`
//! 4. `{temp}/rfbpilot`
//!
//! Several daemons can run side by side (one per VNC server, say) under
//! different instance names taken from `RFBPILOT_INSTANCE`. Each instance
//! owns `{dir}/{instance}.sock` and `{dir}/{instance}.pid`.

use std::env;
use std::path::PathBuf;

const DEFAULT_INSTANCE: &str = "default";

/// Instance name from the environment.
pub fn instance_name() -> String {
    env::var("RFBPILOT_INSTANCE").unwrap_or_else(|_| DEFAULT_INSTANCE.to_string())
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Directory holding sockets and PID files. Empty variables are ignored.
pub fn socket_dir() -> PathBuf {
    if let Some(dir) = non_empty_var("RFBPILOT_SOCKET_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(runtime_dir) = non_empty_var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("rfbpilot");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".rfbpilot");
    }
    env::temp_dir().join("rfbpilot")
}

/// Keep instance names usable as file names.
///
/// Only ASCII alphanumerics, `-` and `_` are allowed, and the name may not
/// start with `-`. Anything else falls back to the default instance.
pub(crate) fn sanitize_instance_name(name: &str) -> String {
    let is_valid = !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if is_valid {
        name.to_string()
    } else {
        tracing::warn!(
            "Invalid instance name '{}', using '{}'. Names may contain only alphanumerics, hyphen and underscore.",
            name,
            DEFAULT_INSTANCE
        );
        DEFAULT_INSTANCE.to_string()
    }
}

fn instance_file(instance: Option<&str>, extension: &str) -> PathBuf {
    let name = instance.map(String::from).unwrap_or_else(instance_name);
    socket_dir().join(format!("{}.{}", sanitize_instance_name(&name), extension))
}

pub fn socket_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "sock")
}

pub fn pid_path(instance: Option<&str>) -> PathBuf {
    instance_file(instance, "pid")
}

/// Create the socket directory, private to the current user on Unix.
pub fn ensure_socket_dir() -> std::io::Result<()> {
    let dir = socket_dir();
    std::fs::create_dir_all(&dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}
