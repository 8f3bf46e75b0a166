use anyhow::{Context, Result};
use nix::{
    sys::time::TimeSpec,
    time::{clock_gettime, ClockId},
};

/// Source of wall-clock time for replies.
pub trait Clock: Send + Sync {
    /// Milliseconds since 1970-01-01T00:00:00Z.
    fn now_ms(&self) -> Result<u64>;
}

/// Reads `CLOCK_REALTIME`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Result<u64> {
        let ts = clock_gettime(ClockId::CLOCK_REALTIME)
            .context("clock_gettime(CLOCK_REALTIME) failed")?;
        Ok(timespec_to_ms(&ts))
    }
}

/// Always reports the same instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ms(&self) -> Result<u64> {
        Ok(self.0)
    }
}

fn timespec_to_ms(ts: &TimeSpec) -> u64 {
    (ts.tv_sec() as u64) * 1_000 + (ts.tv_nsec() as u64) / 1_000_000
}
