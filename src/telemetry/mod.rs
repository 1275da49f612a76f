//! System telemetry: one shared sampler, per-surface delivery.
//!
//! [`TelemetryPoller`] keeps at most one subscription per surface. A new
//! `subscribe` for the same surface aborts the previous timer task before
//! installing its own, so a surface never has two cadences running.
//! Sampling failures on a tick are logged and the next tick still fires.

pub mod sampler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::surface::{Outbound, Push, SurfaceId};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    /// 1-minute load average divided by the core count.
    pub avg_load: f64,
    pub current_load: f64,
    pub current_load_user: f64,
    pub current_load_system: f64,
    /// Busy percentage per core.
    pub cores: Vec<f64>,
}

/// Memory figures in bytes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemMetrics {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub active: u64,
    pub available: u64,
    pub swapused: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Metrics {
    pub cpu: CpuMetrics,
    pub mem: MemMetrics,
}

/// Something that can take a metrics sample.
pub trait MetricsSource: Send + Sync {
    fn sample(&self) -> Result<Metrics, TelemetryError>;
}

/// Requested delivery interval, resolved against the configured bounds.
///
/// Accepts a bare number or `{"intervalMs": n}`. Missing or non-numeric
/// values take the default.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resolve_interval(payload: &Value, cfg: &TelemetryConfig) -> Duration {
    let requested = payload
        .as_f64()
        .or_else(|| payload.get("intervalMs").and_then(Value::as_f64))
        .filter(|v| v.is_finite());
    let ms = match requested {
        Some(v) => (v.max(0.0) as u64).clamp(cfg.min_interval_ms, cfg.max_interval_ms),
        None => cfg.default_interval_ms,
    };
    Duration::from_millis(ms)
}

struct Subscription {
    period: Duration,
    task: JoinHandle<()>,
}

/// Per-surface metric subscriptions over one shared [`MetricsSource`].
///
/// Cloneable; all clones share the same state.
#[derive(Clone)]
pub struct TelemetryPoller {
    source: Arc<dyn MetricsSource>,
    subscriptions: Arc<Mutex<HashMap<SurfaceId, Subscription>>>,
    config: Arc<TelemetryConfig>,
}

impl TelemetryPoller {
    pub fn new(config: TelemetryConfig, source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// One immediate sample.
    pub fn snapshot(&self) -> Result<Metrics, TelemetryError> {
        self.source.sample()
    }

    /// Start (or restart) periodic delivery to `surface`. Returns the
    /// effective interval.
    pub async fn subscribe(
        &self,
        surface: SurfaceId,
        interval: &Value,
        outbound: Outbound,
    ) -> Duration {
        let period = resolve_interval(interval, &self.config);
        let requested = interval
            .as_f64()
            .or_else(|| interval.get("intervalMs").and_then(Value::as_f64));
        if let Some(requested) = requested {
            #[allow(clippy::cast_precision_loss)]
            let effective = period.as_millis() as f64;
            if (requested - effective).abs() > f64::EPSILON {
                warn!("{surface}: telemetry interval {requested} ms adjusted to {effective} ms");
            }
        }

        let source = Arc::clone(&self.source);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match source.sample() {
                    Ok(metrics) => {
                        if outbound.send(Push::Metrics(metrics)).await.is_err() {
                            debug!("{surface}: metrics channel closed, stopping timer");
                            break;
                        }
                    }
                    Err(e) => warn!("{surface}: metrics sample failed: {e}"),
                }
            }
        });

        let mut subs = self.subscriptions.lock().await;
        if let Some(previous) = subs.insert(surface, Subscription { period, task }) {
            previous.task.abort();
            info!(
                "{surface}: telemetry re-subscribed ({} ms → {} ms)",
                previous.period.as_millis(),
                period.as_millis()
            );
        } else {
            info!(
                "{surface}: telemetry subscribed every {} ms, active: {}",
                period.as_millis(),
                subs.len()
            );
        }
        period
    }

    /// Stop delivery to `surface`. Returns `false` when nothing was active.
    pub async fn unsubscribe(&self, surface: SurfaceId) -> bool {
        match self.subscriptions.lock().await.remove(&surface) {
            Some(sub) => {
                sub.task.abort();
                info!("{surface}: telemetry unsubscribed");
                true
            }
            None => {
                debug!("{surface}: unsubscribe with no active subscription");
                false
            }
        }
    }

    /// Stop every subscription (used during shutdown).
    pub async fn cancel_all(&self) {
        let drained: Vec<_> = self.subscriptions.lock().await.drain().collect();
        for (_, sub) in &drained {
            sub.task.abort();
        }
        if !drained.is_empty() {
            info!("Cancelled {} telemetry subscription(s)", drained.len());
        }
    }

    pub async fn active_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    #[cfg(test)]
    async fn interval_of(&self, surface: SurfaceId) -> Option<Duration> {
        self.subscriptions
            .lock()
            .await
            .get(&surface)
            .map(|sub| sub.period)
    }
}
