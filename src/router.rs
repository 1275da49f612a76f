//! The privileged command boundary.
//!
//! Every named command goes through [`CommandRouter::dispatch`], which
//! applies the same order each time:
//!
//! 1. authorization gate ([`is_authorized`])
//! 2. payload validation and, for `terminal.write`, rate limiting
//! 3. the action itself
//!
//! Handler errors are typed ([`CommandError`]) and become the uniform
//! `{ok: false, error}` reply here. A panic inside a handler is caught at
//! this boundary and answered with `"Internal error"`.
//!
//! ## Commands
//!
//! | Command               | Kind             | Reply body                 |
//! |-----------------------|------------------|----------------------------|
//! | `terminal.spawn`      | request/response | `pid`, `cols`, `rows`      |
//! | `terminal.write`      | one-way          | -                          |
//! | `terminal.resize`     | one-way          | -                          |
//! | `terminal.kill`       | request/response | -                          |
//! | `system.getSnapshot`  | request/response | `data`                     |
//! | `system.subscribe`    | request/response | `intervalMs`               |
//! | `system.unsubscribe`  | request/response | -                          |
//! | `files.getHomeDir`    | request/response | `path`                     |
//! | `files.readDir`       | request/response | `files`                    |
//! | `files.readFile`      | request/response | `content`                  |
//!
//! Names may also be spelled with a colon (`terminal:spawn`).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::auth::is_authorized;
use crate::config::Config;
use crate::error::CommandError;
use crate::files::FileBrowser;
use crate::sanitize::{clamp_spawn_size, validate_resize, SizeLimits};
use crate::surface::{Outbound, SurfaceId, SurfaceKind, SurfaceRegistry, Teardown};
use crate::telemetry::sampler::ProcSampler;
use crate::telemetry::{MetricsSource, TelemetryPoller};
use crate::terminal::backend::{PtyBackend, UnavailableBackend};
use crate::terminal::native::NativePtyBackend;
use crate::terminal::TerminalManager;

/// A named operation callers may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TerminalSpawn,
    TerminalWrite,
    TerminalResize,
    TerminalKill,
    SystemGetSnapshot,
    SystemSubscribe,
    SystemUnsubscribe,
    FilesGetHomeDir,
    FilesReadDir,
    FilesReadFile,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Command::TerminalSpawn,
        Command::TerminalWrite,
        Command::TerminalResize,
        Command::TerminalKill,
        Command::SystemGetSnapshot,
        Command::SystemSubscribe,
        Command::SystemUnsubscribe,
        Command::FilesGetHomeDir,
        Command::FilesReadDir,
        Command::FilesReadFile,
    ];

    /// Accepts `terminal.spawn` and `terminal:spawn`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.name() == name || cmd.operation() == name)
    }

    /// Dotted wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::TerminalSpawn => "terminal.spawn",
            Self::TerminalWrite => "terminal.write",
            Self::TerminalResize => "terminal.resize",
            Self::TerminalKill => "terminal.kill",
            Self::SystemGetSnapshot => "system.getSnapshot",
            Self::SystemSubscribe => "system.subscribe",
            Self::SystemUnsubscribe => "system.unsubscribe",
            Self::FilesGetHomeDir => "files.getHomeDir",
            Self::FilesReadDir => "files.readDir",
            Self::FilesReadFile => "files.readFile",
        }
    }

    /// Label used in the unauthorized message, e.g. `terminal:spawn`.
    pub fn operation(self) -> &'static str {
        match self {
            Self::TerminalSpawn => "terminal:spawn",
            Self::TerminalWrite => "terminal:write",
            Self::TerminalResize => "terminal:resize",
            Self::TerminalKill => "terminal:kill",
            Self::SystemGetSnapshot => "system:getSnapshot",
            Self::SystemSubscribe => "system:subscribe",
            Self::SystemUnsubscribe => "system:unsubscribe",
            Self::FilesGetHomeDir => "files:getHomeDir",
            Self::FilesReadDir => "files:readDir",
            Self::FilesReadFile => "files:readFile",
        }
    }

    /// One-way commands only answer when the caller is unauthorized.
    pub fn is_one_way(self) -> bool {
        matches!(self, Self::TerminalWrite | Self::TerminalResize)
    }
}

/// Reply to a request/response command.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Response {
    fn success(body: Map<String, Value>) -> Self {
        Self {
            ok: true,
            error: None,
            body,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            ok: false,
            error: Some(message),
            body: Map::new(),
        }
    }
}

fn body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Composition of the gate, the surface registry, and the resource owners.
///
/// Cloneable; all clones share the same state.
#[derive(Clone)]
pub struct CommandRouter {
    surfaces: SurfaceRegistry,
    terminals: TerminalManager,
    telemetry: TelemetryPoller,
    files: Arc<FileBrowser>,
    limits: SizeLimits,
}

impl CommandRouter {
    /// Router backed by real PTYs (unless disabled) and `/proc`.
    pub fn from_config(config: &Config) -> Self {
        let backend: Arc<dyn PtyBackend> = if config.terminal.enabled {
            Arc::new(NativePtyBackend)
        } else {
            Arc::new(UnavailableBackend::new("terminal support is disabled"))
        };
        let source = Arc::new(ProcSampler::new(&config.telemetry.proc_root));
        Self::new(config, backend, source)
    }

    pub fn new(
        config: &Config,
        backend: Arc<dyn PtyBackend>,
        source: Arc<dyn MetricsSource>,
    ) -> Self {
        Self {
            surfaces: SurfaceRegistry::new(),
            terminals: TerminalManager::new(config.terminal.clone(), backend),
            telemetry: TelemetryPoller::new(config.telemetry.clone(), source),
            files: Arc::new(FileBrowser::new(&config.files)),
            limits: SizeLimits::from(&config.terminal),
        }
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    pub fn terminals(&self) -> &TerminalManager {
        &self.terminals
    }

    pub fn telemetry(&self) -> &TelemetryPoller {
        &self.telemetry
    }

    pub async fn open_surface(&self, kind: SurfaceKind, outbound: Outbound) -> SurfaceId {
        self.surfaces.open(kind, outbound).await
    }

    /// Surface-destroyed signal. Releases everything the surface owned; a
    /// second call for the same surface does nothing.
    pub async fn close_surface(&self, surface: SurfaceId) {
        let Some(hooks) = self.surfaces.close(surface).await else {
            return;
        };
        for hook in hooks {
            self.run_teardown(surface, hook).await;
        }
    }

    async fn run_teardown(&self, surface: SurfaceId, hook: Teardown) {
        match hook {
            Teardown::Terminal => {
                self.terminals.kill(surface).await;
            }
            Teardown::Telemetry => {
                self.telemetry.unsubscribe(surface).await;
            }
        }
    }

    /// Kill every terminal and cancel every subscription.
    pub async fn shutdown(&self) {
        self.terminals.kill_all().await;
        self.telemetry.cancel_all().await;
    }

    /// Run one command for `caller`. Returns `None` when the command sends
    /// no reply (successful or dropped one-way commands).
    pub async fn dispatch(&self, caller: SurfaceId, name: &str, payload: &Value) -> Option<Response> {
        let trusted = self.surfaces.trusted().await;
        let authorized = is_authorized(caller, &trusted);

        let Some(command) = Command::parse(name) else {
            if !authorized {
                warn!("{caller}: unauthorized request for unknown command {name:?}");
                return Some(Response::failure(
                    CommandError::unauthorized(name.replace('.', ":")).to_string(),
                ));
            }
            warn!("{caller}: unknown command {name:?}");
            return Some(Response::failure(
                CommandError::UnknownCommand(name.to_string()).to_string(),
            ));
        };

        if !authorized {
            warn!("{caller}: rejected {} from unrecognized sender", command.operation());
            return Some(Response::failure(
                CommandError::unauthorized(command.operation()).to_string(),
            ));
        }

        let outcome = AssertUnwindSafe(self.handle(caller, command, payload))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(body)) => (!command.is_one_way()).then(|| Response::success(body)),
            Ok(Err(e)) => {
                if command.is_one_way() {
                    warn!("{caller}: {} dropped: {e}", command.name());
                    None
                } else {
                    warn!("{caller}: {} failed: {e}", command.name());
                    Some(Response::failure(e.to_string()))
                }
            }
            Err(_) => {
                error!("{caller}: {} handler panicked", command.name());
                (!command.is_one_way()).then(|| Response::failure("Internal error".to_string()))
            }
        }
    }

    async fn handle(
        &self,
        caller: SurfaceId,
        command: Command,
        payload: &Value,
    ) -> Result<Map<String, Value>, CommandError> {
        match command {
            Command::TerminalSpawn => {
                let clamped = clamp_spawn_size(payload, &self.limits);
                if clamped.adjusted {
                    warn!(
                        "{caller}: terminal size clamped to {}x{}",
                        clamped.size.cols, clamped.size.rows
                    );
                }
                let outbound = self.live_outbound(caller, command).await?;
                let spawned = self.terminals.spawn(caller, clamped.size, outbound).await?;
                if !self.surfaces.register_teardown(caller, Teardown::Terminal).await {
                    // Surface closed while the shell was starting.
                    self.terminals.kill(caller).await;
                    return Err(CommandError::unauthorized(command.operation()));
                }
                Ok(body(json!({
                    "pid": spawned.pid,
                    "cols": spawned.size.cols,
                    "rows": spawned.size.rows,
                })))
            }
            Command::TerminalWrite => {
                self.terminals.write(caller, payload).await;
                Ok(Map::new())
            }
            Command::TerminalResize => {
                let size = validate_resize(payload, &self.limits)?;
                self.terminals.resize(caller, size).await;
                Ok(Map::new())
            }
            Command::TerminalKill => {
                if self.terminals.kill(caller).await {
                    self.surfaces.clear_teardown(caller, Teardown::Terminal).await;
                }
                Ok(Map::new())
            }
            Command::SystemGetSnapshot => {
                let metrics = self.telemetry.snapshot()?;
                Ok(body(json!({ "data": metrics })))
            }
            Command::SystemSubscribe => {
                let outbound = self.live_outbound(caller, command).await?;
                let period = self.telemetry.subscribe(caller, payload, outbound).await;
                if !self.surfaces.register_teardown(caller, Teardown::Telemetry).await {
                    self.telemetry.unsubscribe(caller).await;
                    return Err(CommandError::unauthorized(command.operation()));
                }
                #[allow(clippy::cast_possible_truncation)]
                let interval_ms = period.as_millis() as u64;
                Ok(body(json!({ "intervalMs": interval_ms })))
            }
            Command::SystemUnsubscribe => {
                if self.telemetry.unsubscribe(caller).await {
                    self.surfaces.clear_teardown(caller, Teardown::Telemetry).await;
                }
                Ok(Map::new())
            }
            Command::FilesGetHomeDir => Ok(body(json!({ "path": self.files.home_dir() }))),
            Command::FilesReadDir => {
                let files = self.files.read_dir(payload).await?;
                Ok(body(json!({ "files": files })))
            }
            Command::FilesReadFile => {
                let content = self.files.read_file(payload).await?;
                info!("{caller}: read file ({} bytes)", content.len());
                Ok(body(json!({ "content": content })))
            }
        }
    }

    async fn live_outbound(&self, caller: SurfaceId, command: Command) -> Result<Outbound, CommandError> {
        self.surfaces
            .outbound(caller)
            .await
            .ok_or_else(|| CommandError::unauthorized(command.operation()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Push;
    use crate::testing::{FakeBackend, FakeSource};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        router: CommandRouter,
        backend: Arc<FakeBackend>,
        source: Arc<FakeSource>,
        main: SurfaceId,
        main_rx: mpsc::Receiver<Push>,
    }

    async fn harness() -> Harness {
        harness_with(Config::default()).await
    }

    async fn harness_with(config: Config) -> Harness {
        let backend = Arc::new(FakeBackend::default());
        let source = Arc::new(FakeSource::default());
        let router = CommandRouter::new(&config, backend.clone(), source.clone());
        let (tx, main_rx) = mpsc::channel(512);
        let main = router.open_surface(SurfaceKind::Main, tx).await;
        Harness {
            router,
            backend,
            source,
            main,
            main_rx,
        }
    }

    async fn untrusted(router: &CommandRouter) -> (SurfaceId, mpsc::Receiver<Push>) {
        let (tx, rx) = mpsc::channel(64);
        (router.open_surface(SurfaceKind::Untrusted, tx).await, rx)
    }

    fn count_metrics(rx: &mut mpsc::Receiver<Push>) -> usize {
        let mut n = 0;
        while let Ok(push) = rx.try_recv() {
            if matches!(push, Push::Metrics(_)) {
                n += 1;
            }
        }
        n
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::parse("terminal.spawn"), Some(Command::TerminalSpawn));
        assert_eq!(Command::parse("terminal:spawn"), Some(Command::TerminalSpawn));
        assert_eq!(Command::parse("system:getSnapshot"), Some(Command::SystemGetSnapshot));
        assert_eq!(Command::parse("terminal.exec"), None);
        assert!(Command::TerminalWrite.is_one_way());
        assert!(!Command::TerminalKill.is_one_way());
        for cmd in Command::ALL {
            assert_eq!(cmd.operation().replace(':', "."), cmd.name());
        }
    }

    #[test]
    fn test_response_shape() {
        let ok = serde_json::to_value(Response::success(body(json!({"pid": 7})))).unwrap();
        assert_eq!(ok, json!({"ok": true, "pid": 7}));
        let err = serde_json::to_value(Response::failure("nope".into())).unwrap();
        assert_eq!(err, json!({"ok": false, "error": "nope"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_command_requires_authorization() {
        let h = harness().await;
        let (stranger, _rx) = untrusted(&h.router).await;
        let payloads = [
            json!({"cols": 80, "rows": 24}),
            json!("ls\n"),
            json!({"cols": 80, "rows": 24}),
            Value::Null,
            Value::Null,
            json!(250),
            Value::Null,
            Value::Null,
            json!("/"),
            json!("/etc/passwd"),
        ];
        for (cmd, payload) in Command::ALL.into_iter().zip(payloads) {
            let reply = h.router.dispatch(stranger, cmd.name(), &payload).await.unwrap();
            assert!(!reply.ok);
            assert_eq!(
                reply.error.unwrap(),
                format!("Unauthorized: {} request from unrecognized sender", cmd.operation())
            );
            assert!(reply.body.is_empty());
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.backend.spawn_count(), 0);
        assert_eq!(h.router.terminals().count().await, 0);
        assert_eq!(h.router.terminals().rate_windows().await, 0);
        assert_eq!(h.router.telemetry().active_count().await, 0);
        assert_eq!(h.source.samples(), 0);
    }

    #[tokio::test]
    async fn test_closed_main_window_is_never_trusted() {
        let h = harness().await;
        h.router.close_surface(h.main).await;
        let reply = h
            .router
            .dispatch(h.main, "system.getSnapshot", &Value::Null)
            .await
            .unwrap();
        assert!(!reply.ok);
        assert_eq!(h.source.samples(), 0);
    }

    #[tokio::test]
    async fn test_second_main_window_is_untrusted() {
        let h = harness().await;
        let (tx, _rx) = mpsc::channel(8);
        let second = h.router.open_surface(SurfaceKind::Main, tx).await;
        let reply = h
            .router
            .dispatch(second, "terminal.spawn", &json!({}))
            .await
            .unwrap();
        assert!(!reply.ok);
        assert_eq!(h.backend.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let h = harness().await;
        let (stranger, _rx) = untrusted(&h.router).await;

        let reply = h.router.dispatch(stranger, "shell.exec", &Value::Null).await.unwrap();
        assert_eq!(
            reply.error.unwrap(),
            "Unauthorized: shell:exec request from unrecognized sender"
        );

        let reply = h.router.dispatch(h.main, "shell.exec", &Value::Null).await.unwrap();
        assert_eq!(reply.error.unwrap(), "Unknown command: shell.exec");
    }

    #[tokio::test]
    async fn test_spawn_cap_through_router() {
        let h = harness().await;
        // Fill every slot from other surfaces.
        let (tx, _rx) = mpsc::channel(8);
        let size = crate::sanitize::TermSize { cols: 80, rows: 24 };
        for n in 100..105 {
            h.router
                .terminals()
                .spawn(crate::testing::surface_id(n), size, tx.clone())
                .await
                .unwrap();
        }

        let reply = h.router.dispatch(h.main, "terminal.spawn", &json!({})).await.unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.error.unwrap(), "Terminal session limit reached (max 5)");
        assert_eq!(h.router.terminals().count().await, 5);

        h.router.terminals().kill(crate::testing::surface_id(100)).await;
        let reply = h.router.dispatch(h.main, "terminal.spawn", &json!({})).await.unwrap();
        assert!(reply.ok);
    }

    #[tokio::test]
    async fn test_spawn_clamps_and_resize_rejects() {
        let h = harness().await;
        let reply = h
            .router
            .dispatch(h.main, "terminal.spawn", &json!({"cols": 9999, "rows": 24}))
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.body["cols"], json!(500));
        assert_eq!(reply.body["rows"], json!(24));
        assert_eq!(h.backend.handles()[0].request().size.cols, 500);

        let reply = h
            .router
            .dispatch(h.main, "terminal.resize", &json!({"cols": 9999, "rows": 30}))
            .await;
        assert!(reply.is_none());
        let size = h.router.terminals().size_of(h.main).await.unwrap();
        assert_eq!((size.cols, size.rows), (500, 24));
        assert!(h.backend.handles()[0].resizes().is_empty());

        h.router
            .dispatch(h.main, "terminal.resize", &json!({"cols": 100, "rows": 30}))
            .await;
        let size = h.router.terminals().size_of(h.main).await.unwrap();
        assert_eq!((size.cols, size.rows), (100, 30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_rate_limit_through_router() {
        let h = harness().await;
        h.router.dispatch(h.main, "terminal.spawn", &json!({})).await;
        for i in 0..150 {
            let reply = h
                .router
                .dispatch(h.main, "terminal.write", &json!(format!("echo {i}\n")))
                .await;
            assert!(reply.is_none());
        }
        let written = h.backend.handles()[0].written();
        assert_eq!(written.len(), 100);
        for (i, chunk) in written.iter().enumerate() {
            assert_eq!(chunk, &format!("echo {i}\n"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_close_tears_down_once() {
        let mut h = harness().await;
        h.router.dispatch(h.main, "terminal.spawn", &json!({})).await;
        h.router.dispatch(h.main, "system.subscribe", &json!(250)).await;
        h.router.dispatch(h.main, "terminal.write", &json!("x")).await;
        tokio::time::sleep(Duration::from_millis(260)).await;
        assert_eq!(count_metrics(&mut h.main_rx), 1);

        h.router.close_surface(h.main).await;
        h.router.close_surface(h.main).await;

        let handle = h.backend.handles()[0].clone();
        assert_eq!(handle.kill_count(), 1);
        assert_eq!(h.router.terminals().count().await, 0);
        assert_eq!(h.router.terminals().rate_windows().await, 0);
        assert_eq!(h.router.telemetry().active_count().await, 0);

        assert!(!h.router.terminals().kill(h.main).await);
        assert!(!h.router.telemetry().unsubscribe(h.main).await);
        assert_eq!(handle.kill_count(), 1);

        let samples = h.source.samples();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.source.samples(), samples);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_teardown_then_close() {
        let h = harness().await;
        h.router.dispatch(h.main, "terminal.spawn", &json!({})).await;
        h.router.dispatch(h.main, "system.subscribe", &json!(250)).await;

        let reply = h.router.dispatch(h.main, "terminal.kill", &Value::Null).await.unwrap();
        assert!(reply.ok);
        let reply = h.router.dispatch(h.main, "terminal.kill", &Value::Null).await.unwrap();
        assert!(reply.ok);
        let reply = h.router.dispatch(h.main, "system.unsubscribe", &Value::Null).await.unwrap();
        assert!(reply.ok);

        h.router.close_surface(h.main).await;
        assert_eq!(h.backend.handles()[0].kill_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_spawn_kill_cycles() {
        let h = harness().await;
        for _ in 0..10 {
            let reply = h.router.dispatch(h.main, "terminal.spawn", &json!({})).await.unwrap();
            assert!(reply.ok);
            h.router.dispatch(h.main, "terminal.kill", &Value::Null).await;
        }
        assert_eq!(h.router.terminals().count().await, 0);
        h.router.close_surface(h.main).await;
        assert!(h.backend.handles().iter().all(|handle| handle.kill_count() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_keeps_single_timer() {
        let mut h = harness().await;
        h.router.dispatch(h.main, "system.subscribe", &json!(250)).await;
        let reply = h
            .router
            .dispatch(h.main, "system.subscribe", &json!(500))
            .await
            .unwrap();
        assert_eq!(reply.body["intervalMs"], json!(500));
        assert_eq!(h.router.telemetry().active_count().await, 1);

        tokio::time::sleep(Duration::from_millis(2010)).await;
        assert_eq!(count_metrics(&mut h.main_rx), 4);
    }

    #[tokio::test]
    async fn test_spawn_write_and_output() {
        let mut h = harness().await;
        let reply = h
            .router
            .dispatch(h.main, "terminal.spawn", &json!({"cols": 80, "rows": 24}))
            .await
            .unwrap();
        assert!(reply.ok);
        assert!(reply.error.is_none());

        assert!(h.router.dispatch(h.main, "terminal.write", &json!("ls\n")).await.is_none());
        let handle = h.backend.handles()[0].clone();
        assert_eq!(handle.written(), vec!["ls\n".to_string()]);

        handle.emit("Cargo.toml  src\r\n").await;
        assert_eq!(
            h.main_rx.recv().await,
            Some(Push::TerminalOutput("Cargo.toml  src\r\n".into()))
        );
    }

    #[tokio::test]
    async fn test_rejection_does_not_poison_state() {
        let h = harness().await;
        let (stranger, _rx) = untrusted(&h.router).await;
        let reply = h
            .router
            .dispatch(stranger, "terminal.spawn", &json!({}))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "ok": false,
                "error": "Unauthorized: terminal:spawn request from unrecognized sender"
            })
        );

        let reply = h
            .router
            .dispatch(h.main, "system.getSnapshot", &Value::Null)
            .await
            .unwrap();
        assert!(reply.ok);
        assert!(reply.body["data"]["cpu"]["currentLoad"].is_number());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_floor() {
        let mut h = harness().await;
        let reply = h
            .router
            .dispatch(h.main, "system.subscribe", &json!(100))
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.body["intervalMs"], json!(250));

        tokio::time::sleep(Duration::from_millis(1010)).await;
        assert_eq!(count_metrics(&mut h.main_rx), 4);
    }

    #[tokio::test]
    async fn test_spawn_failure_creates_nothing() {
        let h = harness().await;
        h.backend.fail_next("openpty: no devices");
        let reply = h.router.dispatch(h.main, "terminal.spawn", &json!({})).await.unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.error.unwrap(), "Failed to start shell: openpty: no devices");
        assert_eq!(h.router.terminals().count().await, 0);
    }

    #[tokio::test]
    async fn test_disabled_backend_degrades() {
        let config = Config::default();
        let router = CommandRouter::new(
            &config,
            Arc::new(UnavailableBackend::new("terminal support is disabled")),
            Arc::new(FakeSource::default()),
        );
        let (tx, _rx) = mpsc::channel(8);
        let main = router.open_surface(SurfaceKind::Main, tx).await;
        let reply = router.dispatch(main, "terminal.spawn", &json!({})).await.unwrap();
        assert_eq!(
            reply.error.unwrap(),
            "PTY backend not available: terminal support is disabled"
        );
        let reply = router.dispatch(main, "system.getSnapshot", &Value::Null).await.unwrap();
        assert!(reply.ok);
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let h = harness().await;
        h.backend.panic_next();
        let reply = h.router.dispatch(h.main, "terminal.spawn", &json!({})).await.unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.error.unwrap(), "Internal error");

        let reply = h.router.dispatch(h.main, "terminal.spawn", &json!({})).await.unwrap();
        assert!(reply.ok);
    }

    #[tokio::test]
    async fn test_snapshot_error_is_reported() {
        let h = harness().await;
        h.source.set_failing(true);
        let reply = h
            .router
            .dispatch(h.main, "system.getSnapshot", &Value::Null)
            .await
            .unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.error.unwrap(), "Unrecognised fake format");
    }

    #[tokio::test]
    async fn test_files_commands() {
        let dir = std::env::temp_dir().join(format!("brains-router-files-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("docs")).unwrap();
        std::fs::write(dir.join("note.txt"), "remember").unwrap();

        let mut config = Config::default();
        config.files.root = Some(dir.display().to_string());
        let h = harness_with(config).await;

        let reply = h
            .router
            .dispatch(h.main, "files.readDir", &json!(dir.display().to_string()))
            .await
            .unwrap();
        assert!(reply.ok);
        assert_eq!(reply.body["files"][0]["name"], json!("docs"));
        assert_eq!(reply.body["files"][0]["type"], json!("directory"));
        assert_eq!(reply.body["files"][1]["isHidden"], json!(false));

        let file = dir.join("note.txt").display().to_string();
        let reply = h.router.dispatch(h.main, "files:readFile", &json!(file)).await.unwrap();
        assert_eq!(reply.body["content"], json!("remember"));

        let reply = h.router.dispatch(h.main, "files.readFile", &json!("/etc/../etc/passwd")).await.unwrap();
        assert_eq!(reply.error.unwrap(), "Path traversal (..) not allowed");

        let reply = h.router.dispatch(h.main, "files.getHomeDir", &Value::Null).await.unwrap();
        assert!(reply.body["path"].as_str().unwrap().starts_with('/'));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let h = harness().await;
        h.router.dispatch(h.main, "terminal.spawn", &json!({})).await;
        h.router.dispatch(h.main, "system.subscribe", &json!(1000)).await;
        h.router.shutdown().await;
        assert_eq!(h.router.terminals().count().await, 0);
        assert_eq!(h.router.telemetry().active_count().await, 0);
        assert_eq!(h.backend.handles()[0].kill_count(), 1);
    }
}
