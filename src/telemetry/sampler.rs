//! `/proc`-backed metrics source.
//!
//! | Field                  | Source                                   |
//! |------------------------|------------------------------------------|
//! | `cpu.currentLoad*`     | `/proc/stat` tick deltas between samples |
//! | `cpu.cores`            | `/proc/stat` per-CPU lines               |
//! | `cpu.avgLoad`          | `/proc/loadavg` 1-minute value / cores   |
//! | `mem.*`                | `/proc/meminfo` (kB, reported as bytes)  |
//!
//! The first sample has no previous reading, so its loads are averages
//! since boot.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use super::{CpuMetrics, MemMetrics, Metrics, MetricsSource};
use crate::error::TelemetryError;
use crate::util::round2;

/// Cumulative jiffies for one CPU line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTicks {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    fn since(&self, earlier: &CpuTicks) -> CpuTicks {
        CpuTicks {
            user: self.user.saturating_sub(earlier.user),
            nice: self.nice.saturating_sub(earlier.nice),
            system: self.system.saturating_sub(earlier.system),
            idle: self.idle.saturating_sub(earlier.idle),
            iowait: self.iowait.saturating_sub(earlier.iowait),
            irq: self.irq.saturating_sub(earlier.irq),
            softirq: self.softirq.saturating_sub(earlier.softirq),
            steal: self.steal.saturating_sub(earlier.steal),
        }
    }
}

/// Aggregate line followed by one entry per core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    pub total: CpuTicks,
    pub cores: Vec<CpuTicks>,
}

/// Reads metrics from a procfs mount.
pub struct ProcSampler {
    root: PathBuf,
    previous: Mutex<Option<StatSnapshot>>,
}

impl ProcSampler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            previous: Mutex::new(None),
        }
    }

    fn read(&self, name: &str) -> Result<String, TelemetryError> {
        let path = self.root.join(name);
        std::fs::read_to_string(&path).map_err(|source| TelemetryError::Read {
            path: path.display().to_string(),
            source,
        })
    }
}

impl MetricsSource for ProcSampler {
    fn sample(&self) -> Result<Metrics, TelemetryError> {
        let stat = parse_stat(&self.read("stat")?)?;
        let load1 = parse_loadavg(&self.read("loadavg")?)?;
        let mem = parse_meminfo(&self.read("meminfo")?)?;

        let previous = {
            let mut guard = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
            guard.replace(stat.clone())
        };
        let baseline = previous.unwrap_or_default();

        Ok(Metrics {
            cpu: cpu_metrics(&stat, &baseline, load1),
            mem,
        })
    }
}

/// Build CPU metrics from two `/proc/stat` readings. A baseline with a
/// different core count (or none at all) is treated as zero.
pub fn cpu_metrics(now: &StatSnapshot, baseline: &StatSnapshot, load1: f64) -> CpuMetrics {
    let total = now.total.since(&baseline.total);
    let cores: Vec<f64> = if baseline.cores.len() == now.cores.len() {
        now.cores
            .iter()
            .zip(&baseline.cores)
            .map(|(n, b)| busy_percent(&n.since(b)))
            .collect()
    } else {
        now.cores.iter().map(busy_percent).collect()
    };

    let core_count = now.cores.len().max(1);
    #[allow(clippy::cast_precision_loss)]
    let avg_load = round2(load1 / core_count as f64);

    CpuMetrics {
        avg_load,
        current_load: busy_percent(&total),
        current_load_user: share(total.user, total.total()),
        current_load_system: share(total.system, total.total()),
        cores,
    }
}

fn busy_percent(delta: &CpuTicks) -> f64 {
    let total = delta.total();
    share(total - delta.idle - delta.iowait, total)
}

#[allow(clippy::cast_precision_loss)]
fn share(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 * 100.0 / total as f64)
}

/// Parse the `cpu` and `cpuN` lines of `/proc/stat`.
pub fn parse_stat(content: &str) -> Result<StatSnapshot, TelemetryError> {
    let mut total = None;
    let mut cores = Vec::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        if !label.starts_with("cpu") {
            continue;
        }
        let values: Vec<u64> = fields.filter_map(|v| v.parse().ok()).collect();
        if values.len() < 4 {
            return Err(TelemetryError::Parse { what: "/proc/stat" });
        }
        let at = |i: usize| values.get(i).copied().unwrap_or(0);
        let ticks = CpuTicks {
            user: at(0),
            nice: at(1),
            system: at(2),
            idle: at(3),
            iowait: at(4),
            irq: at(5),
            softirq: at(6),
            steal: at(7),
        };
        if label == "cpu" {
            total = Some(ticks);
        } else {
            cores.push(ticks);
        }
    }
    let total = total.ok_or(TelemetryError::Parse { what: "/proc/stat" })?;
    Ok(StatSnapshot { total, cores })
}

/// 1-minute load average from `/proc/loadavg`.
pub fn parse_loadavg(content: &str) -> Result<f64, TelemetryError> {
    content
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or(TelemetryError::Parse {
            what: "/proc/loadavg",
        })
}

/// Memory figures from `/proc/meminfo`, converted to bytes.
pub fn parse_meminfo(content: &str) -> Result<MemMetrics, TelemetryError> {
    let mut total = None;
    let mut free = 0u64;
    let mut available = None;
    let mut swap_total = 0u64;
    let mut swap_free = 0u64;
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = parse_kb_value(rest) * 1024;
        match key {
            "MemTotal" => total = Some(value),
            "MemFree" => free = value,
            "MemAvailable" => available = Some(value),
            "SwapTotal" => swap_total = value,
            "SwapFree" => swap_free = value,
            _ => {}
        }
    }
    let total = total.ok_or(TelemetryError::Parse {
        what: "/proc/meminfo",
    })?;
    // Pre-3.14 kernels have no MemAvailable.
    let available = available.unwrap_or(free);
    Ok(MemMetrics {
        total,
        free,
        used: total.saturating_sub(free),
        active: total.saturating_sub(available),
        available,
        swapused: swap_total.saturating_sub(swap_free),
    })
}

fn parse_kb_value(s: &str) -> u64 {
    s.split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
