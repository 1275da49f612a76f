#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # brains-host
//!
//! Privileged host process for the Brains desktop workspace.
//!
//! The desktop shell launches `brains-host`, reads the launch token from its
//! stdout (`BRAINS_LAUNCH_TOKEN=<token>`) and hands it to the main window.
//! Every UI surface then connects over a loopback WebSocket; only the main
//! window may spawn terminals, poll telemetry, or read files.
//!
//! ## API surface
//!
//! | Method | Path          | Auth     | Description                         |
//! |--------|---------------|----------|-------------------------------------|
//! | GET    | `/api/health` | No       | Liveness probe                      |
//! | GET    | `/api/ws`     | Token*   | WebSocket for one UI surface        |
//!
//! *`?token=<launch token>` marks the main window. Without a token the
//! surface connects untrusted; a wrong token is refused with 403.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          - entry point, config, tracing, graceful shutdown
//! config.rs        - TOML + env-var configuration
//! auth.rs          - trusted-origin gate, constant-time comparison
//! surface.rs       - surface identities, push channels, teardown hooks
//! sanitize.rs      - size clamping/validation, input caps, env scrubbing
//! ratelimit.rs     - per-surface sliding-window limiter
//! router.rs        - command boundary: gate → validate → act
//! shell/
//!   mod.rs         - shell resolution, spawn request
//!   pty.rs         - PTY allocation, spawn, resize
//! terminal/
//!   mod.rs         - TerminalManager (one PTY per surface)
//!   backend.rs     - PtyBackend seam, UnavailableBackend
//!   native.rs      - Unix PTY backend
//! telemetry/
//!   mod.rs         - TelemetryPoller, metric types
//!   sampler.rs     - /proc sampler
//! files.rs         - read-only file commands
//! ws/
//!   mod.rs         - WebSocket upgrade, frame dispatch
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use brains_host::{ws, AppState, CommandRouter, Config};

/// Privileged host for the Brains workspace.
#[derive(Parser)]
#[command(name = "brains-host", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("brains-host: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("brains-host v{} starting", env!("CARGO_PKG_VERSION"));

    let launch_token = if let Some(token) = config.auth.launch_token.clone() {
        token
    } else {
        let token = uuid::Uuid::new_v4().to_string();
        println!("BRAINS_LAUNCH_TOKEN={token}");
        info!("Generated launch token (printed on stdout)");
        token
    };

    match config.server.listen.parse::<SocketAddr>() {
        Ok(addr) if !addr.ip().is_loopback() => {
            warn!("Listening on non-loopback address {addr}; the host is meant for local use only");
        }
        Ok(_) => {}
        Err(e) => warn!("Could not parse listen address {}: {e}", config.server.listen),
    }

    if !config.terminal.enabled {
        warn!("Terminal support disabled; terminal.spawn will always fail");
    }

    let router = CommandRouter::from_config(&config);
    let listen = config.server.listen.clone();
    let state = AppState::new(config, router.clone(), &launch_token);
    let app = ws::app(state);

    let listener = match TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {listen}: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Listening on {listen}");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Shutting down...");
    router.shutdown().await;

    if let Err(e) = result {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }
    info!("Goodbye");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
