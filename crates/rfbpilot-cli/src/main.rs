//! rfbpilot CLI and daemon entry point.

mod args;
mod config;
mod daemon;

use std::path::Path;

use anyhow::Context;
use base64::Engine;
use clap::Parser;
use rfbpilot_core::protocol::{Command, MouseButton, Request, ResponseData};
use tracing::{error, info};
use uuid::Uuid;

use crate::args::{Button, Cli, Commands, DaemonArgs};
use crate::daemon::{ConnectionManager, DaemonClient, DaemonServer};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Panics are logged like any other error
    std::panic::set_hook(Box::new(|info| {
        error!("panic: {}", info);
    }));

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(args) => run_daemon(args),
        Commands::Examples => println!("{}", crate::args::EXAMPLES_TEXT),
        command => {
            if let Err(e) = run_client_command(command) {
                error!("{:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn mouse_button(button: Button) -> MouseButton {
    match button {
        Button::Left => MouseButton::Left,
        Button::Right => MouseButton::Right,
        Button::Middle => MouseButton::Middle,
    }
}

/// Convert CLI args to a protocol Command.
///
/// Returns None for commands that don't talk to the daemon.
fn cli_to_command(command: &Commands) -> Option<Command> {
    match command {
        Commands::Click(args) => Some(Command::Click {
            x: args.x,
            y: args.y,
            button: mouse_button(args.button),
            double: args.double,
        }),
        Commands::Move(args) => Some(Command::Move {
            x: args.x,
            y: args.y,
        }),
        Commands::Key(args) => Some(Command::KeyPress {
            key: args.key.clone(),
        }),
        Commands::Type(args) => Some(Command::TypeText {
            text: args.text.clone(),
            enter: args.enter,
        }),
        Commands::TypeLines(args) => Some(Command::TypeMultiline {
            lines: args.lines.clone(),
        }),
        Commands::Screenshot(args) => Some(Command::Screenshot {
            delay_ms: args.delay,
        }),
        Commands::Stop => Some(Command::Shutdown),
        Commands::Examples | Commands::Daemon(_) => None,
    }
}

fn save_image(data: &str, path: &Path) -> anyhow::Result<usize> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("Daemon sent invalid base64 image data")?;
    std::fs::write(path, &bytes).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(bytes.len())
}

/// Run a client command by connecting to the daemon.
fn run_client_command(command: Commands) -> anyhow::Result<()> {
    let Some(request_command) = cli_to_command(&command) else {
        return Ok(());
    };

    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let client = if matches!(request_command, Command::Shutdown) {
            // Starting a daemon just to stop it would be pointless
            DaemonClient::connect_existing().await?
        } else {
            Some(DaemonClient::connect().await?)
        };
        let Some(mut client) = client else {
            println!("Daemon is not running");
            return Ok(());
        };

        let request = Request {
            id: Uuid::new_v4().to_string(),
            command: request_command,
        };

        let response = client.request(request).await?;

        if let Some(err) = response.error {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }

        match (response.data, &command) {
            (Some(ResponseData::Screenshot { message, image }), Commands::Screenshot(args))
                if args.output.is_some() =>
            {
                if let Some(path) = &args.output {
                    let written = save_image(&image.data, path)?;
                    println!("{}; saved {} bytes to {}", message, written, path.display());
                }
            }
            (Some(data), _) => println!("{}", serde_json::to_string_pretty(&data)?),
            (None, _) => {}
        }

        Ok(())
    })
}

/// Run the daemon server until `stop`, SIGINT or SIGTERM.
///
/// Signals go through the server's own shutdown path so in-flight requests
/// can finish. The DaemonServer's Drop impl cleans up socket and PID files.
fn run_daemon(args: DaemonArgs) {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let endpoint = args.endpoint();
        info!("VNC endpoint: {:?}", endpoint);

        let server = match DaemonServer::bind(ConnectionManager::new(endpoint)).await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to start daemon: {:#}", e);
                std::process::exit(1);
            }
        };

        let shutdown = server.shutdown_handle();
        let run = server.run();
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => result,
            signal = shutdown_signal() => {
                info!("Received {}, shutting down gracefully", signal);
                shutdown.notify_waiters();
                run.await
            }
        };

        if let Err(e) = result {
            error!("Daemon error: {:#}", e);
            std::process::exit(1);
        }
        // Server is dropped here, triggering cleanup of socket and PID files
    });
}

/// Resolve on SIGINT or SIGTERM, naming the signal.
async fn shutdown_signal() -> &'static str {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm() => "SIGTERM",
    }
}

/// Wait for SIGTERM. If registration fails, log it and wait forever.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, daemon will only respond to SIGINT",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
