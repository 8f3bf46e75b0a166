use anyhow::{Context, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use once_cell::sync::OnceCell;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// One-way stop request observed by the responder loop.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    inner: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// Sets the flag. There is no way back to `false`.
    pub fn trigger(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }
}

static PROCESS_FLAG: OnceCell<ShutdownFlag> = OnceCell::new();

extern "C" fn handle_sigterm(_: libc::c_int) {
    // Atomic store only: async-signal-safe.
    if let Some(flag) = PROCESS_FLAG.get() {
        flag.trigger();
    }
}

/// Installs the SIGTERM handler and returns the flag it sets.
///
/// `SA_RESETHAND` puts the default disposition back once the handler has run,
/// so a second SIGTERM terminates the process immediately. Calling this twice
/// returns the same flag.
pub fn install_sigterm_handler() -> Result<ShutdownFlag> {
    let flag = PROCESS_FLAG.get_or_init(ShutdownFlag::new).clone();
    let action = SigAction::new(
        SigHandler::Handler(handle_sigterm),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGTERM, &action) }
        .context("failed to install SIGTERM handler")?;
    Ok(flag)
}
