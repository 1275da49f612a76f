//! Error taxonomy for the command channel.
//!
//! Every handler returns `Result<_, CommandError>`; the router turns the
//! error into the `{ok: false, error}` reply via its `Display` text. Nothing
//! below is ever allowed to unwind out of a handler.

use thiserror::Error;

/// Why a `terminal.spawn` did not produce a session.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// PTY support is missing from this build/platform or disabled by config.
    #[error("PTY backend not available: {0}")]
    BackendUnavailable(String),
    /// The global concurrent-session cap is reached.
    #[error("Terminal session limit reached (max {max})")]
    SessionLimit { max: usize },
    /// The OS refused to allocate the PTY or start the shell.
    #[error("Failed to start shell: {0}")]
    Os(String),
}

/// Malformed, oversized or out-of-range input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be a string")]
    NotText { field: &'static str },
    #[error("{field} exceeds {max} characters ({len})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{field} must be a finite number")]
    NotANumber { field: &'static str },
    #[error("{field} out of range ({value}, allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: u16,
        max: u16,
    },
}

/// Startup configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {section}.min_{field} ({min}) exceeds {section}.max_{field} ({max})")]
    Bounds {
        section: &'static str,
        field: &'static str,
        min: u64,
        max: u64,
    },
}

/// Metrics sampling failures.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Unrecognised {what} format")]
    Parse { what: &'static str },
}

/// File command failures.
#[derive(Debug, Error)]
pub enum FilesError {
    #[error("Path must be a string")]
    NotText,
    #[error("Path must be absolute")]
    NotAbsolute,
    #[error("Path contains null bytes")]
    NullByte,
    #[error("Path traversal (..) not allowed")]
    Traversal,
    #[error("Access denied: Path must be within {root}")]
    OutsideRoot { root: String },
    #[error("File too large ({size} bytes, max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("File is not valid UTF-8 text")]
    NotUtf8,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Anything a command handler can fail with.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Caller is not in the trusted origin set. `operation` uses the colon
    /// form, e.g. `terminal:spawn`.
    #[error("Unauthorized: {operation} request from unrecognized sender")]
    Unauthorized { operation: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Files(#[from] FilesError),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl CommandError {
    pub fn unauthorized(operation: impl Into<String>) -> Self {
        Self::Unauthorized {
            operation: operation.into(),
        }
    }
}
