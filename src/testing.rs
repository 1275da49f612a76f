//! In-process fakes for the OS-facing seams.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::error::{SpawnError, TelemetryError};
use crate::sanitize::TermSize;
use crate::shell::SpawnRequest;
use crate::surface::SurfaceId;
use crate::telemetry::{CpuMetrics, MemMetrics, Metrics, MetricsSource};
use crate::terminal::backend::{PtyBackend, PtyProcess, PtySpawn};

pub fn surface_id(raw: u64) -> SurfaceId {
    SurfaceId::from_raw(raw)
}

pub fn sample_metrics() -> Metrics {
    Metrics {
        cpu: CpuMetrics {
            avg_load: 0.25,
            current_load: 12.5,
            current_load_user: 8.0,
            current_load_system: 4.5,
            cores: vec![10.0, 15.0],
        },
        mem: MemMetrics {
            total: 8 << 30,
            free: 2 << 30,
            used: 6 << 30,
            active: 4 << 30,
            available: 4 << 30,
            swapused: 0,
        },
    }
}

struct FakeState {
    pid: u32,
    request: SpawnRequest,
    input: Mutex<mpsc::Receiver<Vec<u8>>>,
    written: Mutex<Vec<String>>,
    resizes: Mutex<Vec<TermSize>>,
    fail_resize: AtomicBool,
    kills: AtomicUsize,
    output: mpsc::Sender<String>,
    exit: Mutex<Option<oneshot::Sender<i32>>>,
}

/// Test-side view of one fake shell.
#[derive(Clone)]
pub struct FakeHandle(Arc<FakeState>);

impl FakeHandle {
    pub fn pid(&self) -> u32 {
        self.0.pid
    }

    pub fn request(&self) -> SpawnRequest {
        self.0.request.clone()
    }

    /// Everything written to the shell so far, one entry per write.
    pub fn written(&self) -> Vec<String> {
        let mut written = self.0.written.lock().unwrap();
        let mut input = self.0.input.lock().unwrap();
        while let Ok(bytes) = input.try_recv() {
            written.push(String::from_utf8(bytes).unwrap());
        }
        written.clone()
    }

    pub fn resizes(&self) -> Vec<TermSize> {
        self.0.resizes.lock().unwrap().clone()
    }

    pub fn fail_resizes(&self) {
        self.0.fail_resize.store(true, Ordering::SeqCst);
    }

    pub fn kill_count(&self) -> usize {
        self.0.kills.load(Ordering::SeqCst)
    }

    /// Pretend the shell printed `text`.
    pub async fn emit(&self, text: &str) {
        self.0.output.send(text.to_string()).await.unwrap();
    }

    /// Pretend the shell exited.
    pub fn exit(&self, code: i32) {
        if let Some(tx) = self.0.exit.lock().unwrap().take() {
            let _ = tx.send(code);
        }
    }
}

impl PtyProcess for FakeHandle {
    fn pid(&self) -> u32 {
        self.0.pid
    }

    fn resize(&self, size: TermSize) -> Result<(), String> {
        if self.0.fail_resize.load(Ordering::SeqCst) {
            return Err("ENOTTY".to_string());
        }
        self.0.resizes.lock().unwrap().push(size);
        Ok(())
    }

    fn kill(&self) {
        self.0.kills.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend that records every spawn instead of starting processes.
#[derive(Default)]
pub struct FakeBackend {
    next_pid: AtomicU32,
    handles: Mutex<Vec<FakeHandle>>,
    fail_next: Mutex<Option<String>>,
    panic_next: AtomicBool,
}

impl FakeBackend {
    /// Handles for every successful spawn, oldest first.
    pub fn handles(&self) -> Vec<FakeHandle> {
        self.handles.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn fail_next(&self, reason: &str) {
        *self.fail_next.lock().unwrap() = Some(reason.to_string());
    }

    /// Make the next spawn panic, as a buggy backend would.
    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }
}

impl PtyBackend for FakeBackend {
    fn spawn(&self, request: &SpawnRequest) -> Result<PtySpawn, SpawnError> {
        assert!(
            !self.panic_next.swap(false, Ordering::SeqCst),
            "fake backend panic"
        );
        if let Some(reason) = self.fail_next.lock().unwrap().take() {
            return Err(SpawnError::Os(reason));
        }
        let (input_tx, input_rx) = mpsc::channel(1024);
        let (output_tx, output_rx) = mpsc::channel(256);
        let (exit_tx, exit_rx) = oneshot::channel();
        let handle = FakeHandle(Arc::new(FakeState {
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            request: request.clone(),
            input: Mutex::new(input_rx),
            written: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            fail_resize: AtomicBool::new(false),
            kills: AtomicUsize::new(0),
            output: output_tx,
            exit: Mutex::new(Some(exit_tx)),
        }));
        self.handles.lock().unwrap().push(handle.clone());
        Ok(PtySpawn {
            process: Box::new(handle),
            input: input_tx,
            output: output_rx,
            exit: exit_rx,
        })
    }
}

/// Metrics source returning [`sample_metrics`], optionally failing.
#[derive(Default)]
pub struct FakeSource {
    samples: AtomicUsize,
    failing: AtomicBool,
}

impl FakeSource {
    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MetricsSource for FakeSource {
    fn sample(&self) -> Result<Metrics, TelemetryError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TelemetryError::Parse { what: "fake" });
        }
        Ok(sample_metrics())
    }
}
