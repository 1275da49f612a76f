//! Shell process plumbing.
//!
//! - [`pty`] - PTY allocation, spawning a shell on the slave side, resize.
//! - [`resolve_shell`] / [`spawn_request`] - what to run and with which
//!   environment for a new terminal session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::TerminalConfig;
use crate::sanitize::{scrub_env, TermSize};

pub mod pty;

/// Everything a backend needs to start one interactive shell.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub shell: String,
    pub working_dir: PathBuf,
    /// Complete child environment (already scrubbed).
    pub env: HashMap<String, String>,
    pub size: TermSize,
}

/// Shell binary for new sessions: config override, then `$SHELL`, then
/// `/bin/bash` when present, then `/bin/sh`.
pub fn resolve_shell(cfg: &TerminalConfig) -> String {
    if let Some(shell) = cfg.shell.as_deref().filter(|s| !s.is_empty()) {
        return shell.to_string();
    }
    match std::env::var("SHELL") {
        Ok(shell) if !shell.is_empty() => shell,
        _ if Path::new("/bin/bash").exists() => "/bin/bash".to_string(),
        _ => "/bin/sh".to_string(),
    }
}

/// `$HOME`, or the host's current directory when unset.
pub fn home_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
    }
}

/// Build the spawn request for a new terminal: the host environment minus
/// loader-injection variables, plus terminal capability hints.
pub fn spawn_request(cfg: &TerminalConfig, size: TermSize) -> SpawnRequest {
    let mut env = scrub_env(std::env::vars());
    env.insert("TERM".to_string(), "xterm-256color".to_string());
    env.insert("COLORTERM".to_string(), "truecolor".to_string());
    SpawnRequest {
        shell: resolve_shell(cfg),
        working_dir: home_dir(),
        env,
        size,
    }
}
