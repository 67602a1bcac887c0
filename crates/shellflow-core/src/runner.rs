//! Command execution inside a pseudo-terminal.
//!
//! Commands run through the user's shell so aliases, profile settings, and
//! interactive prompts behave as they would in a terminal. Output is copied
//! to stdout and stdin is forwarded to the child until it exits.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::{getuid, User};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tracing::debug;

use crate::error::{Error, Result};

const DIM_GRAY: &str = "\x1b[90m\x1b[2m";
const RESET: &str = "\x1b[0m";
const FALLBACK_SHELL: &str = "/bin/sh";
const POLL_MS: u16 = 100;

/// Runs one fully resolved command string.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Shell selection
// ---------------------------------------------------------------------------

/// `$SHELL`, else the login shell from the user database, else `/bin/sh`.
pub fn detect_shell() -> PathBuf {
    shell_from(std::env::var_os("SHELL"), user_shell)
}

fn shell_from(env: Option<OsString>, user_db: impl FnOnce() -> Option<PathBuf>) -> PathBuf {
    if let Some(shell) = env.filter(|s| !s.is_empty()) {
        return PathBuf::from(shell);
    }
    user_db()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(FALLBACK_SHELL))
}

fn user_shell() -> Option<PathBuf> {
    User::from_uid(getuid()).ok().flatten().map(|u| u.shell)
}

/// Arguments that make `shell` run `command` as a login shell where it
/// supports one.
pub fn shell_args(shell: &Path, command: &str) -> Vec<String> {
    let name = shell.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let mut args: Vec<String> = match name {
        "bash" => vec!["--login".into(), "-c".into()],
        "zsh" | "fish" => vec!["-l".into(), "-c".into()],
        _ => vec!["-c".into()],
    };
    args.push(command.to_string());
    args
}

/// Size of the controlling terminal, or 24x80 when stdout is not one.
fn terminal_size() -> PtySize {
    let mut ws = nix::libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ only writes into the winsize we pass.
    let rc = unsafe { nix::libc::ioctl(nix::libc::STDOUT_FILENO, nix::libc::TIOCGWINSZ, &mut ws) };
    if rc == 0 && ws.ws_row > 0 && ws.ws_col > 0 {
        PtySize {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    } else {
        PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// PtyRunner
// ---------------------------------------------------------------------------

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Runs commands in a pseudo-terminal attached to this process's stdio.
pub struct PtyRunner {
    shell: Option<PathBuf>,
    forward_stdin: bool,
    /// Forwarded to the child instead of stdin when set.
    input: Option<OwnedFd>,
    output: Sink,
}

impl Default for PtyRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PtyRunner {
    pub fn new() -> Self {
        Self {
            shell: None,
            forward_stdin: true,
            input: None,
            output: Arc::new(Mutex::new(Box::new(io::stdout()))),
        }
    }

    /// Use `shell` instead of detecting one.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn forward_stdin(mut self, forward: bool) -> Self {
        self.forward_stdin = forward;
        self
    }

    /// Forward `input` to the child instead of stdin.
    pub fn with_input(mut self, input: impl Into<OwnedFd>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Copy child output to `out` instead of stdout.
    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.output = Arc::new(Mutex::new(out));
        self
    }

    fn write_out(&self, bytes: &[u8]) -> io::Result<()> {
        write_sink(&self.output, bytes)
    }

    /// A private handle on the input source, so each run owns what it reads.
    fn open_input(&self) -> io::Result<File> {
        let fd = match &self.input {
            Some(fd) => fd.try_clone()?,
            None => io::stdin().as_fd().try_clone_to_owned()?,
        };
        Ok(File::from(fd))
    }
}

fn write_sink(sink: &Sink, bytes: &[u8]) -> io::Result<()> {
    let mut out = sink
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "output lock poisoned"))?;
    out.write_all(bytes)?;
    out.flush()
}

impl CommandRunner for PtyRunner {
    fn run(&self, command: &str) -> Result<()> {
        let shell = self.shell.clone().unwrap_or_else(detect_shell);
        let args = shell_args(&shell, command);
        let cwd = std::env::current_dir()?;
        debug!(shell = %shell.display(), command, "spawning");

        let pair = native_pty_system()
            .openpty(terminal_size())
            .map_err(|e| Error::Command(format!("cannot open pseudo-terminal: {e}")))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.args(&args);
        cmd.cwd(cwd);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Command(format!("failed to start {}: {e}", shell.display())))?;
        // Only the child may hold the slave, or the master never sees EOF.
        drop(pair.slave);

        let reader = master_reader(&*pair.master)?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Command(format!("cannot write pseudo-terminal: {e}")))?;

        let input = if self.forward_stdin {
            match self.open_input() {
                Ok(input) => Some(input),
                Err(e) => {
                    debug!(error = %e, "input not forwarded");
                    None
                }
            }
        } else {
            None
        };

        self.write_out(DIM_GRAY.as_bytes())?;

        let stop = Arc::new(AtomicBool::new(false));
        let sink = Arc::clone(&self.output);
        let output_loop = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || copy_output(reader, &sink, &stop))
        };

        let input_loop = if let Some(input) = input {
            let stop = Arc::clone(&stop);
            Some(thread::spawn(move || forward_input(input, writer, &stop)))
        } else {
            drop(writer);
            None
        };

        let status = child.wait();
        stop.store(true, Ordering::SeqCst);
        drop(pair.master);

        let output_result = output_loop
            .join()
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "output loop panicked")));
        let input_result = match input_loop {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "input loop panicked"))),
            None => Ok(()),
        };
        self.write_out(RESET.as_bytes())?;

        let status = status?;
        if !status.success() {
            return Err(Error::Command(format!(
                "exited with status {}",
                status.exit_code()
            )));
        }
        output_result.map_err(|e| Error::Command(format!("output copy failed: {e}")))?;
        input_result.map_err(|e| Error::Command(format!("input copy failed: {e}")))?;
        Ok(())
    }
}

/// Our own descriptor on the master side. The output loop closes it when it
/// finishes, independently of anything the child left running.
fn master_reader(master: &(dyn portable_pty::MasterPty + Send)) -> Result<File> {
    let raw = master
        .as_raw_fd()
        .ok_or_else(|| Error::Command("pseudo-terminal has no file descriptor".into()))?;
    // SAFETY: `raw` belongs to `master`, which outlives this borrow.
    let fd = unsafe { BorrowedFd::borrow_raw(raw) }.try_clone_to_owned()?;
    Ok(File::from(fd))
}

enum Readiness {
    Ready,
    Idle,
    Closed,
}

/// Wait up to one poll interval for `fd` to become readable.
fn wait_readable(fd: BorrowedFd<'_>) -> io::Result<Readiness> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(POLL_MS)) {
        Ok(0) | Err(nix::errno::Errno::EINTR) => Ok(Readiness::Idle),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
                Ok(Readiness::Ready)
            } else if revents.intersects(PollFlags::POLLNVAL | PollFlags::POLLERR) {
                Ok(Readiness::Closed)
            } else {
                Ok(Readiness::Idle)
            }
        }
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Pseudo-terminal output to the sink until end of stream.
///
/// Once `stop` is set the loop drains what is already buffered and returns at
/// the first quiet poll, even if a background process still holds the
/// terminal open.
fn copy_output(mut reader: File, sink: &Sink, stop: &AtomicBool) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        match wait_readable(reader.as_fd())? {
            Readiness::Closed => return Ok(()),
            Readiness::Idle if stop.load(Ordering::SeqCst) => return Ok(()),
            Readiness::Idle => continue,
            Readiness::Ready => {}
        }
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => write_sink(sink, &buf[..n])?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // The master reports EIO once the child side has closed.
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// `input` to the pseudo-terminal until `stop` is set or `input` closes.
///
/// Polls with a short timeout so the loop notices `stop` without waiting for
/// the next keystroke.
fn forward_input(
    mut input: File,
    mut writer: Box<dyn Write + Send>,
    stop: &AtomicBool,
) -> io::Result<()> {
    let mut buf = [0u8; 8192];
    while !stop.load(Ordering::SeqCst) {
        match wait_readable(input.as_fd())? {
            Readiness::Closed => return Ok(()),
            Readiness::Idle => continue,
            Readiness::Ready => {}
        }
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        match writer.write_all(&buf[..n]).and_then(|_| writer.flush()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

/// Records commands instead of running them. Commands containing any of the
/// configured fragments fail.
#[derive(Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    fail_on: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on.push(fragment.into());
        self
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &str) -> Result<()> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        if self.fail_on.iter().any(|f| command.contains(f.as_str())) {
            return Err(Error::Command("exited with status 1".into()));
        }
        Ok(())
    }
}
