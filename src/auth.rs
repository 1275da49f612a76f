//! Sender authorization.
//!
//! Two checks live here:
//!
//! - [`constant_time_eq`] compares the launch token a connecting surface
//!   presents on `/api/ws?token=` (the WebSocket upgrade has no header
//!   channel in browsers).
//! - [`is_authorized`] is the per-command gate. It runs before any state is
//!   touched in every privileged handler.

use crate::surface::SurfaceId;

/// Surfaces allowed to invoke privileged commands. In practice the main
/// window only; empty while no main window is live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrustedOrigins {
    main: Option<SurfaceId>,
}

impl TrustedOrigins {
    pub fn new(main: Option<SurfaceId>) -> Self {
        Self { main }
    }

    pub fn main(&self) -> Option<SurfaceId> {
        self.main
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.main == Some(id)
    }
}

/// `true` only when `caller` is the live main window.
///
/// A missing or destroyed main window is represented by an empty set, so it
/// rejects every caller.
pub fn is_authorized(caller: SurfaceId, trusted: &TrustedOrigins) -> bool {
    trusted.contains(caller)
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of `provided`
/// length, so an attacker cannot determine the token length from response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for i in 0..expected.len() {
        let p = if i < provided.len() {
            provided[i]
        } else {
            0xff
        };
        diff |= expected[i] ^ p;
    }
    diff == 0
}
