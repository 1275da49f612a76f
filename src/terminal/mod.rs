//! PTY session management.
//!
//! [`TerminalManager`] owns at most one interactive shell per surface. It
//! enforces the global session cap, validates and rate-limits input, and
//! forwards shell output to the owning surface's push channel.
//!
//! ## Concurrency
//!
//! The session map is behind an `RwLock`. `spawn` holds the write lock
//! across the cap check, the spawn and the insert, so two surfaces racing
//! for the last slot cannot both win. Writes clone the input sender under a
//! read lock and send after releasing it.
//!
//! ## Teardown
//!
//! A session ends in one of three ways: `kill` (explicit or from surface
//! teardown), or the shell exiting on its own. In the last case the output
//! forwarder removes the entry, but only if it still belongs to the same
//! spawn; a later re-spawn on the same surface is left alone.

pub mod backend;
pub mod native;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TerminalConfig;
use crate::error::SpawnError;
use crate::ratelimit::RateLimiter;
use crate::sanitize::{validate_input, TermSize};
use crate::shell::spawn_request;
use crate::surface::{Outbound, Push, SurfaceId};
use crate::util::now_ms;
use backend::{PtyBackend, PtyProcess};

/// How long to keep draining output after the shell has exited.
const EXIT_DRAIN: Duration = Duration::from_millis(200);

/// What happened to one `terminal.write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Forwarded,
    /// Not text, or over the length cap.
    Invalid,
    RateLimited,
    NoSession,
    /// The shell's input side is gone.
    Closed,
}

/// Returned by a successful spawn.
#[derive(Debug, Clone, Copy)]
pub struct SpawnedTerminal {
    pub pid: u32,
    pub size: TermSize,
    /// Whether an earlier session on the same surface was replaced.
    pub replaced: bool,
}

struct TerminalEntry {
    process: Box<dyn PtyProcess>,
    input: mpsc::Sender<Vec<u8>>,
    size: TermSize,
    created_at: u64,
    serial: u64,
    forwarder: JoinHandle<()>,
}

impl TerminalEntry {
    fn shutdown(&self) {
        self.forwarder.abort();
        self.process.kill();
    }
}

type SessionMap = Arc<RwLock<HashMap<SurfaceId, TerminalEntry>>>;

/// Manages the live PTY sessions, one per surface.
///
/// Cloneable; all clones share the same state.
#[derive(Clone)]
pub struct TerminalManager {
    sessions: SessionMap,
    limiter: Arc<Mutex<RateLimiter<SurfaceId>>>,
    backend: Arc<dyn PtyBackend>,
    config: Arc<TerminalConfig>,
    next_serial: Arc<AtomicU64>,
}

impl TerminalManager {
    pub fn new(config: TerminalConfig, backend: Arc<dyn PtyBackend>) -> Self {
        let limiter = RateLimiter::new(
            config.writes_per_window,
            Duration::from_millis(config.rate_window_ms),
        );
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            limiter: Arc::new(Mutex::new(limiter)),
            backend,
            config: Arc::new(config),
            next_serial: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Start a shell for `surface`, streaming its output to `outbound`.
    ///
    /// A live session on the same surface is replaced: the old shell is
    /// killed and the new one installed under the same lock, without
    /// counting twice against the cap. On failure nothing changes.
    pub async fn spawn(
        &self,
        surface: SurfaceId,
        size: TermSize,
        outbound: Outbound,
    ) -> Result<SpawnedTerminal, SpawnError> {
        let mut sessions = self.sessions.write().await;

        let replacing = sessions.contains_key(&surface);
        if !replacing && sessions.len() >= self.config.max_sessions {
            warn!(
                "{surface}: terminal spawn refused, limit of {} reached",
                self.config.max_sessions
            );
            return Err(SpawnError::SessionLimit {
                max: self.config.max_sessions,
            });
        }

        // The write lock spans the fork/exec so the cap check and the insert
        // stay one step; spawns are rare and capped.
        let request = spawn_request(&self.config, size);
        let spawned = self.backend.spawn(&request)?;
        let pid = spawned.process.pid();
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);

        let forwarder = tokio::spawn(forward_output(
            surface,
            serial,
            spawned.output,
            spawned.exit,
            outbound,
            Arc::clone(&self.sessions),
        ));

        let previous = sessions.insert(
            surface,
            TerminalEntry {
                process: spawned.process,
                input: spawned.input,
                size,
                created_at: now_ms(),
                serial,
                forwarder,
            },
        );
        if let Some(old) = &previous {
            old.shutdown();
            info!(
                "{surface}: replaced terminal pid {} (started at {})",
                old.process.pid(),
                old.created_at
            );
        }
        info!(
            "{surface}: terminal started ({}, pid {pid}, {}x{}), total: {}",
            request.shell,
            size.cols,
            size.rows,
            sessions.len()
        );

        Ok(SpawnedTerminal {
            pid,
            size,
            replaced: previous.is_some(),
        })
    }

    /// Forward one input payload to the surface's shell.
    ///
    /// Invalid payloads and rate-limited writes are dropped whole and logged;
    /// nothing reaches the shell in that case.
    pub async fn write(&self, surface: SurfaceId, payload: &Value) -> WriteOutcome {
        let data = match validate_input(payload, self.config.max_input_chars) {
            Ok(data) => data,
            Err(e) => {
                warn!("{surface}: dropping terminal input: {e}");
                return WriteOutcome::Invalid;
            }
        };

        let input = {
            let sessions = self.sessions.read().await;
            match sessions.get(&surface) {
                Some(entry) => entry.input.clone(),
                None => {
                    debug!("{surface}: terminal input with no live terminal");
                    return WriteOutcome::NoSession;
                }
            }
        };

        if !self.limiter.lock().await.admit(surface) {
            warn!(
                "{surface}: dropping terminal input, more than {} writes per {} ms",
                self.config.writes_per_window, self.config.rate_window_ms
            );
            return WriteOutcome::RateLimited;
        }

        match input.send(data.as_bytes().to_vec()).await {
            Ok(()) => WriteOutcome::Forwarded,
            Err(_) => {
                warn!("{surface}: terminal input closed");
                WriteOutcome::Closed
            }
        }
    }

    /// Apply an already-validated size. Returns whether the PTY took it.
    pub async fn resize(&self, surface: SurfaceId, size: TermSize) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&surface) else {
            debug!("{surface}: resize with no live terminal");
            return false;
        };
        match entry.process.resize(size) {
            Ok(()) => {
                entry.size = size;
                true
            }
            Err(e) => {
                warn!("{surface}: terminal resize failed: {e}");
                false
            }
        }
    }

    /// Kill the surface's shell and drop its rate-limit window.
    ///
    /// Idempotent: returns `false` and does nothing when no shell is live.
    pub async fn kill(&self, surface: SurfaceId) -> bool {
        let entry = self.sessions.write().await.remove(&surface);
        self.limiter.lock().await.forget(surface);
        match entry {
            Some(entry) => {
                entry.shutdown();
                info!("{surface}: terminal pid {} killed", entry.process.pid());
                true
            }
            None => {
                debug!("{surface}: kill with no live terminal");
                false
            }
        }
    }

    /// Kill every shell (used during shutdown).
    pub async fn kill_all(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        let count = drained.len();
        for (surface, entry) in drained {
            entry.shutdown();
            self.limiter.lock().await.forget(surface);
        }
        if count > 0 {
            info!("Shut down {count} terminal(s)");
        }
    }

    /// Current size of the surface's terminal.
    pub async fn size_of(&self, surface: SurfaceId) -> Option<TermSize> {
        self.sessions
            .read()
            .await
            .get(&surface)
            .map(|entry| entry.size)
    }

    pub async fn is_live(&self, surface: SurfaceId) -> bool {
        self.sessions.read().await.contains_key(&surface)
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of surfaces with rate-limit bookkeeping.
    pub async fn rate_windows(&self) -> usize {
        self.limiter.lock().await.tracked()
    }
}

/// Output pump for one spawn: shell chunks → surface, then `terminal.exit`
/// and registry cleanup once the shell is gone.
async fn forward_output(
    surface: SurfaceId,
    serial: u64,
    mut output: mpsc::Receiver<String>,
    mut exit: oneshot::Receiver<i32>,
    outbound: Outbound,
    sessions: SessionMap,
) {
    let code = loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(data) => {
                    let _ = outbound.send(Push::TerminalOutput(data)).await;
                }
                None => break (&mut exit).await.unwrap_or(-1),
            },
            code = &mut exit => {
                // Flush what the shell wrote just before exiting.
                while let Ok(Some(data)) = tokio::time::timeout(EXIT_DRAIN, output.recv()).await {
                    let _ = outbound.send(Push::TerminalOutput(data)).await;
                }
                break code.unwrap_or(-1);
            }
        }
    };

    let _ = outbound.send(Push::TerminalExit { code }).await;

    let mut sessions = sessions.write().await;
    if sessions.get(&surface).is_some_and(|e| e.serial == serial) {
        if let Some(entry) = sessions.remove(&surface) {
            // Reap whatever the shell left running in its process group.
            entry.process.kill();
        }
        info!(
            "{surface}: terminal exited with code {code}, remaining: {}",
            sessions.len()
        );
    }
}
