//! PTY allocation, shell spawning, and terminal resize.
//!
//! Uses the `nix` crate for POSIX PTY APIs. The PTY master fd is kept alive for
//! the session lifetime so I/O and resize operations can be performed on it.

use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;

use nix::pty::{openpty, OpenptyResult, Winsize};
use tokio::process::{Child, Command};

use super::SpawnRequest;
use crate::sanitize::TermSize;

/// An allocated PTY pair (master + slave).
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

fn winsize(size: TermSize) -> Winsize {
    Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Allocate a PTY pair with the given terminal size.
///
/// The master is marked close-on-exec so the shell never holds its own
/// master end open.
pub fn allocate_pty(size: TermSize) -> Result<PtyPair, nix::Error> {
    let OpenptyResult { master, slave } = openpty(&winsize(size), None)?;
    // SAFETY: F_SETFD on a descriptor we own.
    if unsafe { libc::fcntl(master.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        return Err(nix::Error::last());
    }
    Ok(PtyPair { master, slave })
}

/// Spawn the requested shell on the slave side of the PTY.
///
/// The child becomes a session leader with the PTY slave as its controlling
/// terminal. stdin/stdout/stderr are all connected to the slave fd. The
/// inherited environment is replaced wholesale by `request.env`.
pub fn spawn_shell_pty(pty: &PtyPair, request: &SpawnRequest) -> std::io::Result<Child> {
    let slave_fd = pty.slave.as_raw_fd();
    let mut cmd = Command::new(&request.shell);
    cmd.current_dir(&request.working_dir)
        .env_clear()
        .envs(&request.env)
        .kill_on_drop(true);

    // The child's stdio is handled by pre_exec (dup2 to PTY slave), so tell
    // tokio not to set up pipes.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: All syscalls used here are async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);
            if slave_fd > 2 {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Resize a PTY's terminal window.
pub fn resize_pty(master: &OwnedFd, size: TermSize) -> Result<(), nix::Error> {
    let ws = winsize(size);
    // SAFETY: TIOCSWINSZ is a well-defined ioctl that reads a Winsize struct.
    let ret = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCSWINSZ,
            std::ptr::addr_of!(ws),
        )
    };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(())
    }
}

/// Current window size of a PTY.
#[cfg(test)]
fn pty_size(master: &OwnedFd) -> Result<TermSize, nix::Error> {
    let mut ws = winsize(TermSize { cols: 0, rows: 0 });
    // SAFETY: TIOCGWINSZ writes a Winsize struct into the pointer we pass.
    let ret = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCGWINSZ,
            std::ptr::addr_of_mut!(ws),
        )
    };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(TermSize {
            cols: ws.ws_col,
            rows: ws.ws_row,
        })
    }
}
