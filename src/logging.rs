//! Where log records go, and installing the global subscriber.

use crate::daemon::lift_above_stdio;
use anyhow::{Context, Result};
use std::{
    ffi::CStr,
    fs::OpenOptions,
    os::unix::io::{AsRawFd, RawFd},
    path::{Path, PathBuf},
    sync::Mutex,
};
use syslog_tracing::{Facility, Options, Syslog};
use tracing_subscriber::EnvFilter;

const SYSLOG_IDENT: &CStr = c"tssd";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    File(PathBuf),
    /// Facility `daemon`, tagged with the process id.
    Syslog,
    Stderr,
}

impl LogSink {
    /// A configured file always wins. Otherwise a detached daemon logs to
    /// syslog, since its stderr is the null device.
    pub fn select(log_file: Option<&Path>, detached: bool) -> Self {
        match log_file {
            Some(path) => LogSink::File(path.to_path_buf()),
            None if detached => LogSink::Syslog,
            None => LogSink::Stderr,
        }
    }

    /// libc opens its syslog socket on first use; installed before detaching,
    /// that socket would be closed by the descriptor sweep.
    pub fn installs_after_detach(&self) -> bool {
        matches!(self, LogSink::Syslog)
    }
}

/// `RUST_LOG` when set, else `directive`.
pub fn env_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .with_context(|| format!("invalid log filter '{directive}'"))
}

/// Installs the global subscriber writing to `sink`. Returns the descriptor
/// that has to survive detaching, if the sink holds one.
pub fn init(sink: &LogSink, directive: &str) -> Result<Option<RawFd>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(directive)?)
        .with_target(false)
        .compact();
    let (installed, fd) = match sink {
        LogSink::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let file = lift_above_stdio(file)?;
            let fd = file.as_raw_fd();
            let installed = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
            (installed, Some(fd))
        }
        LogSink::Syslog => {
            let options = Options::LOG_PID | Options::LOG_CONS;
            let writer = Syslog::new(SYSLOG_IDENT, options, Facility::Daemon)
                .context("syslog connection is already in use")?;
            // syslogd stamps each record itself.
            let installed = builder
                .with_ansi(false)
                .without_time()
                .with_writer(writer)
                .try_init();
            (installed, None)
        }
        LogSink::Stderr => (builder.with_writer(std::io::stderr).try_init(), None),
    };
    installed.map_err(|err| anyhow::anyhow!("cannot install log subscriber: {err}"))?;
    Ok(fd)
}

/// Whether [`init`] has already succeeded in this process.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
