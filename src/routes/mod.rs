//! HTTP route handlers.
//!
//! Only [`health`] lives here; everything privileged goes over the
//! WebSocket in [`crate::ws`].

pub mod health;
