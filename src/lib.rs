//! Time sync server daemon.
//!
//! Answers 16-byte TSP requests on UDP with a 24-byte reply carrying the
//! request header and the server's wall-clock time in milliseconds since the
//! Unix epoch. The [`daemon`] module holds the process lifecycle: detaching,
//! the single-instance pid lock, and SIGTERM-driven shutdown.

pub mod config;
pub mod daemon;
pub mod logging;
pub mod net;
pub mod time;
