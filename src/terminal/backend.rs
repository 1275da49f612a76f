//! The seam between the terminal manager and the OS.
//!
//! A [`PtyBackend`] starts one shell and hands back its control handle plus
//! the three streams the manager wires up: an input channel, an output
//! channel of decoded text chunks, and a one-shot exit code.

use tokio::sync::{mpsc, oneshot};

use crate::error::SpawnError;
use crate::sanitize::TermSize;
use crate::shell::SpawnRequest;

/// A freshly started shell.
pub struct PtySpawn {
    pub process: Box<dyn PtyProcess>,
    /// Raw bytes for the shell's terminal input, applied in send order.
    pub input: mpsc::Sender<Vec<u8>>,
    /// Output chunks in the order the shell emitted them.
    pub output: mpsc::Receiver<String>,
    /// Exit code once the OS reports the shell gone (`-1` when killed by a signal).
    pub exit: oneshot::Receiver<i32>,
}

/// Control handle for one running shell.
pub trait PtyProcess: Send + Sync {
    fn pid(&self) -> u32;
    fn resize(&self, size: TermSize) -> Result<(), String>;
    /// Terminate the shell and stop its I/O. Safe to call more than once.
    fn kill(&self);
}

pub trait PtyBackend: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<PtySpawn, SpawnError>;
}

/// Backend used when PTY support is switched off: every spawn fails, the
/// rest of the host keeps working.
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PtyBackend for UnavailableBackend {
    fn spawn(&self, _request: &SpawnRequest) -> Result<PtySpawn, SpawnError> {
        Err(SpawnError::BackendUnavailable(self.reason.clone()))
    }
}
