//! Process lifecycle: detaching, the single-instance lock, and the
//! SIGTERM-driven shutdown flag.

pub mod detach;
pub mod lock;
pub mod signal;

pub use detach::{daemonize, lift_above_stdio, DetachOptions};
pub use lock::{LockError, SingleInstanceGuard};
pub use signal::{install_sigterm_handler, ShutdownFlag};
