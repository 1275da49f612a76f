#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! brains-host library - the privileged half of the Brains desktop workspace.
//!
//! UI surfaces connect over a loopback WebSocket; only the main window may
//! run privileged commands. The building blocks:
//! - `auth` - trusted-origin gate, constant-time token comparison
//! - `surface` - surface identities, push channels, teardown hooks
//! - `sanitize` / `ratelimit` - input checks before anything reaches the OS
//! - `terminal` - one PTY shell per surface
//! - `telemetry` - CPU/memory sampling and per-surface subscriptions
//! - `files` - read-only file commands confined to one root
//! - `router` - the command boundary tying the above together
//! - `ws` - WebSocket transport

pub mod auth;
pub mod config;
pub mod error;
pub mod files;
pub mod ratelimit;
pub mod router;
pub mod routes;
pub mod sanitize;
pub mod shell;
pub mod state;
pub mod surface;
pub mod telemetry;
pub mod terminal;
pub mod util;
pub mod ws;

#[cfg(test)]
mod testing;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use error::CommandError;
pub use router::CommandRouter;
pub use state::AppState;
pub use surface::{SurfaceId, SurfaceRegistry};
