//! Owns the child shell and its pseudo-terminal master.
//!
//! Grounded on `agent/spawn.rs` (PTY opening via `portable-pty`'s
//! `native_pty_system`/`CommandBuilder`) and `agent/pty/mod.rs` (the
//! session struct shape), but carries raw bytes rather than a vt100-parsed
//! screen: viewers need an exact byte-for-byte replay, not a re-rendered
//! screen.

pub mod bridge;

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

pub use bridge::Bridge;

/// Default terminal size a freshly started session gets.
pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

/// Resolves a raw PTY master fd to its device path (e.g. `/dev/pts/3`) via
/// `/proc/self/fd`, the same approach `ptsname(3)` uses internally on
/// Linux. Needed so a freshly spawned session can later be reopened by
/// `reattach` after a daemon restart — `portable-pty` itself has no
/// portable "what device is this" accessor.
#[cfg(unix)]
fn resolve_pty_path(fd: std::os::fd::RawFd) -> Option<String> {
    std::fs::read_link(format!("/proc/self/fd/{fd}"))
        .ok()
        .and_then(|p| p.to_str().map(str::to_string))
}

/// Owns the master side of a PTY plus (when not reattached) the child
/// process handle.
///
/// A reattached session (`master` is `None`) resizes through a raw
/// `TIOCSWINSZ` ioctl on the reopened file descriptor instead, since
/// `portable-pty` has no "open an existing master" operation to hand back
/// a `MasterPty` trait object for a device this process did not create.
pub struct PtySession {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Box<dyn Write + Send>,
    #[cfg(unix)]
    raw_fd: Option<std::os::fd::RawFd>,
    child: Option<Box<dyn Child + Send + Sync>>,
    pty_path: String,
    shell_pid: u32,
    /// `true` if this session was recovered from a previous daemon's PTY
    /// rather than spawned by this process — such a session must never
    /// wait on the child at close time, since this process never owned it.
    reattached: bool,
}

impl PtySession {
    /// Spawns `shell` inside a fresh pseudo-terminal with `TERM=xterm-256color`
    /// and the given initial size.
    pub fn start(shell: &str, rows: u16, cols: u16) -> Result<(Self, Box<dyn Read + Send>)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to open pty")?;

        let mut cmd = CommandBuilder::new(shell);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("failed to spawn shell")?;
        let shell_pid = child.process_id().unwrap_or(0);

        let reader = pair
            .master
            .try_clone_reader()
            .context("failed to clone pty reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("failed to take pty writer")?;

        drop(pair.slave);

        #[cfg(unix)]
        let pty_path = pair
            .master
            .as_raw_fd()
            .and_then(resolve_pty_path)
            .unwrap_or_default();
        #[cfg(not(unix))]
        let pty_path = String::new();

        let session = Self {
            master: Some(pair.master),
            writer,
            #[cfg(unix)]
            raw_fd: None,
            child: Some(child),
            pty_path,
            shell_pid,
            reattached: false,
        };
        Ok((session, reader))
    }

    /// Reopens a previously persisted PTY device after verifying the
    /// recorded shell PID is still alive. Unix only — Windows console
    /// PTYs do not support reattachment (see `SPEC_FULL.md` §9).
    #[cfg(unix)]
    pub fn reattach(path: &str, pid: u32) -> Result<(Self, Box<dyn Read + Send>)> {
        use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};

        if !crate::procutil::is_process_alive(pid) {
            bail!("pid {pid} is not alive");
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to reopen pty device {path}"))?;

        let raw_fd = file.as_raw_fd();
        let read_fd = file.try_clone().context("failed to clone pty fd")?;

        // SAFETY: `file` and `read_fd` are both valid, freshly opened
        // descriptors on the same device; converting each into its own
        // owning `File` hands off ownership exactly once per descriptor.
        let reader: Box<dyn Read + Send> =
            Box::new(unsafe { std::fs::File::from_raw_fd(read_fd.into_raw_fd()) });
        let writer: Box<dyn Write + Send> = Box::new(file);

        let session = Self {
            master: None,
            writer,
            raw_fd: Some(raw_fd),
            child: None,
            pty_path: path.to_string(),
            shell_pid: pid,
            reattached: true,
        };
        Ok((session, reader))
    }

    #[cfg(not(unix))]
    pub fn reattach(_path: &str, _pid: u32) -> Result<(Self, Box<dyn Read + Send>)> {
        bail!("PTY reattachment is not supported on this platform")
    }

    /// Device path of the underlying PTY, if known.
    pub fn pty_path(&self) -> &str {
        &self.pty_path
    }

    /// PID of the shell process.
    pub fn shell_pid(&self) -> u32 {
        self.shell_pid
    }

    /// Resizes the PTY.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        if let Some(master) = &self.master {
            return master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .context("failed to resize pty");
        }
        #[cfg(unix)]
        if let Some(fd) = self.raw_fd {
            let ws = libc::winsize {
                ws_row: rows,
                ws_col: cols,
                ws_xpixel: 0,
                ws_ypixel: 0,
            };
            // SAFETY: fd is a valid, open pty descriptor owned by this
            // session; ws is a fully initialized winsize on the stack.
            let rc = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &ws) };
            if rc != 0 {
                bail!("TIOCSWINSZ failed: {}", std::io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// Writes bytes to the shell's stdin.
    pub fn write_input(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Sends SIGHUP to the process group and waits for the child to exit.
    /// A no-op wait for reattached sessions, which this process never
    /// spawned and must not block on.
    pub fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        if self.shell_pid != 0 {
            // SAFETY: sends SIGHUP to the process group led by shell_pid;
            // no memory access beyond the syscall itself.
            unsafe {
                libc::kill(-(self.shell_pid as libc::pid_t), libc::SIGHUP);
            }
        }

        if let Some(mut child) = self.child.take() {
            if !self.reattached {
                let _ = child.wait();
            }
        }
        Ok(())
    }
}
