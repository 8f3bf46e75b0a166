//! Single-instance guard backed by an exclusively locked pid file.
//!
//! Uses `fs2` (`flock` on Unix). The lock belongs to the open file
//! description, so it is released by the kernel when the process exits,
//! however it exits.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

pub const DEFAULT_PIDFILE: &str = "/var/run/tssd.pid";

const PIDFILE_MODE: u32 = 0o640;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot create lock file at '{}': {source}", path.display())]
    Create { path: PathBuf, source: io::Error },
    #[error("{}", already_held_message(path, *pid))]
    AlreadyHeld { path: PathBuf, pid: Option<u32> },
    #[error("cannot write pid to lock file at '{}': {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

fn already_held_message(path: &Path, pid: Option<u32>) -> String {
    match pid {
        Some(pid) => format!(
            "cannot lock the lock file at '{}': held by process {pid}",
            path.display()
        ),
        None => format!("cannot lock the lock file at '{}'", path.display()),
    }
}

/// Proof that this process is the only running instance.
///
/// Keep it alive for as long as the daemon runs; there is no explicit
/// release.
#[derive(Debug)]
pub struct SingleInstanceGuard {
    /// Held open to keep the lock.
    _file: File,
    path: PathBuf,
    pid: u32,
}

impl SingleInstanceGuard {
    /// Takes a non-blocking exclusive lock on `path` and records our pid in it.
    ///
    /// The file is not truncated until the lock is ours, so a losing attempt
    /// never clobbers the running instance's pid.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(PIDFILE_MODE)
            .open(&path)
            .map_err(|source| LockError::Create {
                path: path.clone(),
                source,
            })?;

        if file.try_lock_exclusive().is_err() {
            let pid = read_pid(&path);
            return Err(LockError::AlreadyHeld { path, pid });
        }

        let pid = std::process::id();
        let write = |file: &mut File| -> io::Result<()> {
            file.set_len(0)?;
            file.rewind()?;
            writeln!(file, "{pid}")?;
            file.sync_all()
        };
        write(&mut file).map_err(|source| LockError::Write {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            _file: file,
            path,
            pid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Reads the pid recorded in a pid file, if any.
pub fn read_pid(path: impl AsRef<Path>) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
