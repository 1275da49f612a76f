//! Unix PTY backend.
//!
//! The shell runs as a session leader on the slave side of a fresh PTY (see
//! [`crate::shell::pty`]). Three background tasks serve it:
//!
//! - **writer** - input channel → dup'd master fd
//! - **reader** - dup'd master fd → output channel, decoded as UTF-8 without
//!   splitting a multi-byte character across two chunks
//! - **exit watcher** - `wait()` on the child, reports the exit code
//!
//! The original master fd stays in [`NativePty`] for resize.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::backend::{PtyBackend, PtyProcess, PtySpawn};
use crate::error::SpawnError;
use crate::sanitize::TermSize;
use crate::shell::pty::{allocate_pty, resize_pty, spawn_shell_pty};
use crate::shell::SpawnRequest;

const READ_CHUNK: usize = 4096;

/// Spawns real shells on real PTYs.
pub struct NativePtyBackend;

impl PtyBackend for NativePtyBackend {
    fn spawn(&self, request: &SpawnRequest) -> Result<PtySpawn, SpawnError> {
        let pair = allocate_pty(request.size)
            .map_err(|e| SpawnError::Os(format!("failed to allocate PTY: {e}")))?;
        let child = spawn_shell_pty(&pair, request)
            .map_err(|e| SpawnError::Os(format!("{}: {e}", request.shell)))?;
        // The child holds its own copy of the slave; ours closes here.
        drop(pair.slave);
        NativePty::start(child, pair.master)
    }
}

/// Control handle for a shell running on a PTY.
pub struct NativePty {
    pid: u32,
    master: OwnedFd,
    tasks: Vec<JoinHandle<()>>,
}

fn dup_fd(fd: RawFd, role: &str) -> Result<tokio::fs::File, SpawnError> {
    // SAFETY: F_DUPFD_CLOEXEC on a descriptor we own; the copy is owned by
    // the File and never leaks into later children.
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(SpawnError::Os(format!(
            "dup failed for PTY master {role}: {}",
            std::io::Error::last_os_error()
        )));
    }
    // SAFETY: `dup` is a fresh descriptor nobody else owns.
    Ok(tokio::fs::File::from_std(unsafe {
        std::fs::File::from_raw_fd(dup)
    }))
}

impl NativePty {
    fn start(mut child: Child, master: OwnedFd) -> Result<PtySpawn, SpawnError> {
        let pid = child.id().unwrap_or(0);
        let master_raw = master.as_raw_fd();

        let mut writer = dup_fd(master_raw, "writer")?;
        let mut reader = dup_fd(master_raw, "reader")?;

        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(64);
        let writer_task = tokio::spawn(async move {
            while let Some(data) = input_rx.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let (output_tx, output_rx) = mpsc::channel::<String>(256);
        let reader_task = tokio::spawn(async move {
            let mut tmp = [0u8; READ_CHUNK];
            let mut decoder = Utf8Chunker::default();
            loop {
                match reader.read(&mut tmp).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = decoder.push(&tmp[..n]);
                        if !text.is_empty() && output_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let rest = decoder.finish();
            if !rest.is_empty() {
                let _ = output_tx.send(rest).await;
            }
            debug!("PTY pid {pid} output closed");
        });

        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_task = tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    info!("Shell pid {pid} exited with code {code}");
                    code
                }
                Err(e) => {
                    error!("Shell pid {pid} wait error: {e}");
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(PtySpawn {
            process: Box::new(NativePty {
                pid,
                master,
                tasks: vec![writer_task, reader_task, exit_task],
            }),
            input: input_tx,
            output: output_rx,
            exit: exit_rx,
        })
    }
}

impl PtyProcess for NativePty {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn resize(&self, size: TermSize) -> Result<(), String> {
        resize_pty(&self.master, size).map_err(|e| e.to_string())
    }

    /// SIGKILL to the whole process group, then stop the I/O tasks. The
    /// exit watcher is aborted too; dropping the `Child` with
    /// `kill_on_drop` leaves reaping to tokio.
    fn kill(&self) {
        #[allow(clippy::cast_possible_wrap)]
        let pgid = self.pid as i32;
        if pgid > 0 {
            // SAFETY: plain kill(2); ESRCH for an already-dead group is harmless.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Incremental UTF-8 decoder that holds back an incomplete trailing
/// sequence until the next chunk arrives. Invalid bytes become U+FFFD.
#[derive(Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail(&self.pending);
        let split = self.pending.len() - keep;
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a multi-byte sequence that starts near the end of `bytes` but
/// is not complete yet.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match b {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminalConfig;
    use crate::shell::spawn_request;
    use std::time::Duration;

    #[test]
    fn test_chunker_holds_split_characters() {
        let bytes = "héllo €".as_bytes();
        // Split inside the two-byte 'é' and inside the three-byte '€'.
        let mut decoder = Utf8Chunker::default();
        let mut out = decoder.push(&bytes[..2]);
        out += &decoder.push(&bytes[2..8]);
        out += &decoder.push(&bytes[8..]);
        out += &decoder.finish();
        assert_eq!(out, "héllo €");
    }

    #[test]
    fn test_chunker_replaces_garbage() {
        let mut decoder = Utf8Chunker::default();
        let out = decoder.push(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn test_incomplete_tail() {
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail(&[b'a', 0xE2]), 1);
        assert_eq!(incomplete_tail(&[b'a', 0xE2, 0x82]), 2);
        assert_eq!(incomplete_tail(&[0xE2, 0x82, 0xAC]), 0);
        assert_eq!(incomplete_tail(&[]), 0);
    }

    #[tokio::test]
    async fn test_real_shell_echoes() {
        let cfg = TerminalConfig {
            shell: Some("/bin/sh".to_string()),
            ..TerminalConfig::default()
        };
        let request = spawn_request(&cfg, TermSize { cols: 80, rows: 24 });
        let mut spawned = NativePtyBackend.spawn(&request).unwrap();
        assert!(spawned.process.pid() > 0);

        spawned
            .input
            .send(b"echo pty-$((40+2))\n".to_vec())
            .await
            .unwrap();

        let mut seen = String::new();
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(chunk) = spawned.output.recv().await {
                seen.push_str(&chunk);
                if seen.contains("pty-42") {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(found, "shell output never contained the echo: {seen:?}");

        spawned.process.resize(TermSize { cols: 120, rows: 40 }).unwrap();
        spawned.process.kill();
    }

    #[tokio::test]
    async fn test_exit_code_reported() {
        let cfg = TerminalConfig {
            shell: Some("/bin/sh".to_string()),
            ..TerminalConfig::default()
        };
        let request = spawn_request(&cfg, TermSize { cols: 80, rows: 24 });
        let spawned = NativePtyBackend.spawn(&request).unwrap();
        spawned.input.send(b"exit 3\n".to_vec()).await.unwrap();
        let code = tokio::time::timeout(Duration::from_secs(10), spawned.exit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_missing_shell_is_an_os_error() {
        let cfg = TerminalConfig {
            shell: Some("/nonexistent/shell".to_string()),
            ..TerminalConfig::default()
        };
        let request = spawn_request(&cfg, TermSize { cols: 80, rows: 24 });
        let err = NativePtyBackend.spawn(&request).err().unwrap();
        assert!(matches!(err, SpawnError::Os(_)));
    }
}
