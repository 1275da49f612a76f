//! UI surfaces: identity, push channels, trusted origins, teardown hooks.
//!
//! Every WebSocket connection is one surface. Identities come from a
//! monotonically increasing counter and are never handed out twice, so a
//! closed surface can never alias a live one.
//!
//! Resource owners (the terminal manager, the telemetry poller) register a
//! [`Teardown`] hook when they create per-surface state. [`SurfaceRegistry::close`]
//! removes the surface and returns its hooks exactly once; a second close
//! gets `None`. Hooks are a set per surface, so repeated spawn/kill cycles
//! on the same surface never pile up registrations.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::auth::TrustedOrigins;
use crate::telemetry::Metrics;

/// Opaque per-surface identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// What a surface claimed when it connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Presented the launch token; wants to be the main window.
    Main,
    /// Anything else (browser windows, stray clients).
    Untrusted,
}

/// Asynchronous event pushed to one surface.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Push {
    #[serde(rename = "terminal.output")]
    TerminalOutput(String),
    #[serde(rename = "terminal.exit")]
    TerminalExit { code: i32 },
    #[serde(rename = "system.metrics")]
    Metrics(Metrics),
}

/// Sending half of a surface's push channel.
pub type Outbound = mpsc::Sender<Push>;

/// Per-surface resource that must be released when the surface goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Teardown {
    Terminal,
    Telemetry,
}

struct SurfaceEntry {
    outbound: Outbound,
    hooks: HashSet<Teardown>,
}

#[derive(Default)]
struct Inner {
    live: HashMap<SurfaceId, SurfaceEntry>,
    main: Option<SurfaceId>,
}

/// Registry of live surfaces.
///
/// Cloneable; all clones share the same state.
#[derive(Clone)]
pub struct SurfaceRegistry {
    next_id: Arc<AtomicU64>,
    inner: Arc<RwLock<Inner>>,
}

impl Default for SurfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Register a new surface and return its identity.
    ///
    /// A [`SurfaceKind::Main`] surface becomes the trusted main window only
    /// when no other main window is live; otherwise it is kept as an
    /// untrusted surface.
    pub async fn open(&self, kind: SurfaceKind, outbound: Outbound) -> SurfaceId {
        let id = SurfaceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.write().await;
        inner.live.insert(
            id,
            SurfaceEntry {
                outbound,
                hooks: HashSet::new(),
            },
        );
        match (kind, inner.main) {
            (SurfaceKind::Main, None) => {
                inner.main = Some(id);
                info!("{id} opened as main window");
            }
            (SurfaceKind::Main, Some(current)) => {
                warn!("{id} presented the launch token but {current} is still the main window; treating as untrusted");
            }
            (SurfaceKind::Untrusted, _) => info!("{id} opened (untrusted)"),
        }
        id
    }

    /// Snapshot of the trusted origin set. Only ever contains live surfaces.
    pub async fn trusted(&self) -> TrustedOrigins {
        TrustedOrigins::new(self.inner.read().await.main)
    }

    /// Push channel of a live surface.
    pub async fn outbound(&self, id: SurfaceId) -> Option<Outbound> {
        self.inner
            .read()
            .await
            .live
            .get(&id)
            .map(|entry| entry.outbound.clone())
    }

    /// Record that `id` owns a resource of kind `hook`. Returns `false` when
    /// the surface is already gone, in which case the caller must release
    /// the resource itself.
    pub async fn register_teardown(&self, id: SurfaceId, hook: Teardown) -> bool {
        let mut inner = self.inner.write().await;
        match inner.live.get_mut(&id) {
            Some(entry) => {
                entry.hooks.insert(hook);
                true
            }
            None => false,
        }
    }

    /// Drop a hook after the resource was released explicitly.
    pub async fn clear_teardown(&self, id: SurfaceId, hook: Teardown) {
        if let Some(entry) = self.inner.write().await.live.get_mut(&id) {
            entry.hooks.remove(&hook);
        }
    }

    /// Remove a surface. Returns its pending hooks the first time, `None` after.
    pub async fn close(&self, id: SurfaceId) -> Option<Vec<Teardown>> {
        let mut inner = self.inner.write().await;
        let entry = inner.live.remove(&id)?;
        if inner.main == Some(id) {
            inner.main = None;
            info!("{id} (main window) closed");
        } else {
            info!("{id} closed");
        }
        Some(entry.hooks.into_iter().collect())
    }

    /// Number of live surfaces.
    pub async fn count(&self) -> usize {
        self.inner.read().await.live.len()
    }
}
