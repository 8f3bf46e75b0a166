//! Turning the invoking process into a daemon.
//!
//! Must run before any thread is started: only the forking thread survives
//! `fork`, so the tokio runtime is built afterwards.

use anyhow::{Context, Result};
use nix::{
    fcntl::{fcntl, open, FcntlArg, OFlag},
    sys::{
        signal::{self, SigHandler, Signal},
        stat::{umask, Mode},
    },
    unistd::{chdir, close, dup2, fork, setsid, sysconf, ForkResult, SysconfVar},
};
use std::{
    fs::{self, File},
    os::unix::io::{AsRawFd, FromRawFd, RawFd},
};
use tracing::debug;

const STDIN_FD: RawFd = 0;
const STDOUT_FD: RawFd = 1;
const STDERR_FD: RawFd = 2;
/// Used when the descriptor limit is indeterminate.
const FALLBACK_MAX_FD: RawFd = 8192;
const NULL_DEVICE: &str = "/dev/null";
const PROC_FD_DIR: &str = "/proc/self/fd";

#[derive(Clone, Debug, Default)]
pub struct DetachOptions {
    /// Descriptors opened by the daemon itself (e.g. its log file) that
    /// survive the descriptor sweep.
    pub keep_fds: Vec<RawFd>,
}

impl DetachOptions {
    pub fn keep_fd(mut self, fd: RawFd) -> Self {
        self.keep_fds.push(fd);
        self
    }
}

/// Detaches from the invoking terminal and session.
///
/// Returns only in the final daemon process; both intermediate parents exit
/// with status 0. Every error is fatal to the caller. Kept descriptors must
/// lie above 2, since 0..=2 are reserved for the null device; see
/// [`lift_above_stdio`].
pub fn daemonize(opts: &DetachOptions) -> Result<()> {
    if let Some(fd) = opts.keep_fds.iter().find(|fd| **fd <= STDERR_FD) {
        anyhow::bail!("daemonize: cannot keep fd {fd}, it is reserved for the null device");
    }
    fork_and_exit_parent().context("daemonize: first fork failed")?;
    setsid().context("daemonize: setsid failed")?;
    ignore_sigchld().context("daemonize: cannot ignore SIGCHLD")?;
    fork_and_exit_parent().context("daemonize: second fork failed")?;
    umask(Mode::empty());
    chdir("/").context("daemonize: chdir to / failed")?;
    close_inherited_fds(&opts.keep_fds);
    redirect_std_fds_to_null()?;
    debug!(pid = std::process::id(), "detached");
    Ok(())
}

fn fork_and_exit_parent() -> nix::Result<()> {
    match unsafe { fork() }? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => Ok(()),
    }
}

fn ignore_sigchld() -> nix::Result<()> {
    unsafe { signal::signal(Signal::SIGCHLD, SigHandler::SigIgn) }.map(|_| ())
}

fn max_fd() -> RawFd {
    match sysconf(SysconfVar::OPEN_MAX) {
        Ok(Some(limit)) if limit > 0 => RawFd::try_from(limit).unwrap_or(RawFd::MAX),
        _ => FALLBACK_MAX_FD,
    }
}

/// Descriptors currently open, as listed by procfs.
fn open_fds() -> Option<Vec<RawFd>> {
    let entries = fs::read_dir(PROC_FD_DIR).ok()?;
    Some(
        entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect(),
    )
}

/// Closes everything open except `keep`. Walks procfs when it is mounted, so
/// a huge descriptor limit costs nothing; otherwise tries every number up to
/// the limit.
fn close_inherited_fds(keep: &[RawFd]) {
    let candidates = open_fds().unwrap_or_else(|| (0..max_fd()).collect());
    for fd in candidates.into_iter().filter(|fd| !keep.contains(fd)) {
        // The procfs listing includes its own, already closed, descriptor;
        // the fallback range is mostly unopened. EBADF is expected for both.
        let _ = close(fd);
    }
}

/// Moves `file` to a descriptor of at least `min`, closing the original.
/// Files already at or above `min` are returned untouched.
pub fn move_fd_at_least(file: File, min: RawFd) -> Result<File> {
    let fd = file.as_raw_fd();
    if fd >= min {
        return Ok(file);
    }
    let moved = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(min))
        .with_context(|| format!("cannot move fd {fd} to {min} or above"))?;
    // `moved` is a fresh descriptor owned by nothing else.
    Ok(unsafe { File::from_raw_fd(moved) })
}

/// Keeps a file the daemon opened before detaching off descriptors 0..=2.
/// Those are free when the daemon is started with stdio closed.
pub fn lift_above_stdio(file: File) -> Result<File> {
    move_fd_at_least(file, STDERR_FD + 1)
}

/// Points 0, 1 and 2 at the null device. Descriptor 0 must be free, which
/// holds after the sweep unless the caller kept it.
fn redirect_std_fds_to_null() -> Result<()> {
    let fd = open(NULL_DEVICE, OFlag::O_RDWR, Mode::empty())
        .with_context(|| format!("daemonize: failed to open {NULL_DEVICE}"))?;
    if fd != STDIN_FD {
        anyhow::bail!("daemonize: {NULL_DEVICE} opened as fd {fd}, expected {STDIN_FD}");
    }
    for target in [STDOUT_FD, STDERR_FD] {
        let got = dup2(STDIN_FD, target)
            .with_context(|| format!("daemonize: failed to set {NULL_DEVICE} to fd {target}"))?;
        if got != target {
            anyhow::bail!("daemonize: dup2 returned fd {got}, expected {target}");
        }
    }
    Ok(())
}
