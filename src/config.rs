//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** - `BRAINS_LAUNCH_TOKEN`, `BRAINS_LISTEN`
//! 2. **Config file** - path via `--config <path>`, or `brains-host.toml` in CWD
//! 3. **Compiled defaults** - see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:7420"
//! max_message_bytes = 262144
//!
//! [auth]
//! launch_token = "handed-to-the-main-window"   # generated at startup if unset
//!
//! [terminal]
//! enabled = true
//! shell = "/bin/zsh"          # default: $SHELL, then /bin/bash, then /bin/sh
//! max_sessions = 5
//! min_cols = 10
//! max_cols = 500
//! min_rows = 5
//! max_rows = 200
//! default_cols = 80
//! default_rows = 24
//! max_input_chars = 10000
//! writes_per_window = 100
//! rate_window_ms = 1000
//!
//! [telemetry]
//! min_interval_ms = 250
//! default_interval_ms = 1000
//! max_interval_ms = 60000
//! proc_root = "/proc"
//!
//! [files]
//! root = "/home/me"           # default: $HOME
//! max_file_size = 2097152     # 2 MB
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `127.0.0.1:7420`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Largest inbound WebSocket frame accepted, in bytes (default 256 KiB).
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

/// Main-window authentication.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Token the main window presents on `/api/ws`. Override with
    /// `BRAINS_LAUNCH_TOKEN`. When unset a random token is generated at startup.
    pub launch_token: Option<String>,
}

/// PTY session limits.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    /// When `false` every spawn fails with "PTY backend not available".
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Shell override. Falls back to `$SHELL`, `/bin/bash`, `/bin/sh`.
    pub shell: Option<String>,
    /// Maximum concurrent PTY sessions across all surfaces (default 5).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_min_cols")]
    pub min_cols: u16,
    #[serde(default = "default_max_cols")]
    pub max_cols: u16,
    #[serde(default = "default_min_rows")]
    pub min_rows: u16,
    #[serde(default = "default_max_rows")]
    pub max_rows: u16,
    /// Columns used when `terminal.spawn` omits `cols` (default 80).
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    /// Rows used when `terminal.spawn` omits `rows` (default 24).
    #[serde(default = "default_rows")]
    pub default_rows: u16,
    /// Longest accepted `terminal.write` payload, in characters (default 10 000).
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Writes admitted per surface per rate window (default 100).
    #[serde(default = "default_writes_per_window")]
    pub writes_per_window: usize,
    /// Rate window length in milliseconds (default 1000).
    #[serde(default = "default_rate_window_ms")]
    pub rate_window_ms: u64,
}

/// System metrics polling.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Floor applied to subscription intervals (default 250).
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Interval used when `system.subscribe` carries no usable number (default 1000).
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
    /// Ceiling applied to subscription intervals (default 60 000).
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Where procfs is mounted (default `/proc`).
    #[serde(default = "default_proc_root")]
    pub proc_root: String,
}

/// Read-only file browsing.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Directory the file commands are confined to. Defaults to `$HOME`.
    pub root: Option<String>,
    /// Maximum file size in bytes for `files.readFile` (default 2 MB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "127.0.0.1:7420".to_string()
}
fn default_max_message_bytes() -> usize {
    256 * 1024
}
fn default_true() -> bool {
    true
}
fn default_max_sessions() -> usize {
    5
}
fn default_min_cols() -> u16 {
    10
}
fn default_max_cols() -> u16 {
    500
}
fn default_min_rows() -> u16 {
    5
}
fn default_max_rows() -> u16 {
    200
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}
fn default_max_input_chars() -> usize {
    10_000
}
fn default_writes_per_window() -> usize {
    100
}
fn default_rate_window_ms() -> u64 {
    1000
}
fn default_min_interval_ms() -> u64 {
    250
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_max_interval_ms() -> u64 {
    60_000
}
fn default_proc_root() -> String {
    "/proc".to_string()
}
fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 // 2 MB
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shell: None,
            max_sessions: default_max_sessions(),
            min_cols: default_min_cols(),
            max_cols: default_max_cols(),
            min_rows: default_min_rows(),
            max_rows: default_max_rows(),
            default_cols: default_cols(),
            default_rows: default_rows(),
            max_input_chars: default_max_input_chars(),
            writes_per_window: default_writes_per_window(),
            rate_window_ms: default_rate_window_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            default_interval_ms: default_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            proc_root: default_proc_root(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file. Otherwise looks for
    /// `brains-host.toml` in the current directory, falling back to compiled
    /// defaults. Unreadable, malformed or inconsistent files are errors.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = path.or_else(|| Path::new(DEFAULT_FILE).exists().then_some(DEFAULT_FILE));
        let mut config = match file {
            Some(p) => {
                let content = std::fs::read_to_string(p).map_err(|source| ConfigError::Read {
                    path: p.to_string(),
                    source,
                })?;
                Self::parse(&content)?
            }
            None => Config::default(),
        };

        // Env var overrides
        if let Ok(token) = std::env::var("BRAINS_LAUNCH_TOKEN") {
            if !token.is_empty() {
                config.auth.launch_token = Some(token);
            }
        }
        if let Ok(listen) = std::env::var("BRAINS_LISTEN") {
            config.server.listen = listen;
        }

        Ok(config)
    }

    /// Parse a TOML document, filling every missing field with its default.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Every `min_*` must not exceed its `max_*`; clamping relies on it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.terminal;
        check_bounds("terminal", "cols", t.min_cols.into(), t.max_cols.into())?;
        check_bounds("terminal", "rows", t.min_rows.into(), t.max_rows.into())?;
        let m = &self.telemetry;
        check_bounds("telemetry", "interval_ms", m.min_interval_ms, m.max_interval_ms)
    }
}

const DEFAULT_FILE: &str = "brains-host.toml";

fn check_bounds(
    section: &'static str,
    field: &'static str,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::Bounds {
            section,
            field,
            min,
            max,
        });
    }
    Ok(())
}
