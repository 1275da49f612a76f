//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::router::CommandRouter;

/// Shared application state for the host.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The privileged command boundary and everything behind it.
    pub router: CommandRouter,
    /// Token the main window presents on `/api/ws?token=`.
    pub launch_token: Arc<str>,
}

impl AppState {
    pub fn new(config: Config, router: CommandRouter, launch_token: &str) -> Self {
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            router,
            launch_token: Arc::from(launch_token),
        }
    }
}
