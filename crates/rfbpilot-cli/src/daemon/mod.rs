//! Background daemon that drives a VNC server on behalf of the CLI.

pub mod capture;
pub mod client;
pub mod paths;
pub mod rfb;
pub mod server;
pub mod session;
pub mod synth;

#[cfg(test)]
mod testing;

// Public API - used by main.rs
pub use client::DaemonClient;
pub use server::DaemonServer;
pub use session::ConnectionManager;
