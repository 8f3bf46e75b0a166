use crate::{
    daemon::lock::DEFAULT_PIDFILE,
    net::{proto::DEFAULT_PORT, responder::DEFAULT_POLL_INTERVAL},
};
use serde::Deserialize;
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

const DEFAULT_POLL_INTERVAL_MS: u64 = DEFAULT_POLL_INTERVAL.as_millis() as u64;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the UDP socket binds to; the wildcard address by default.
    pub bind_address: IpAddr,
    pub port: u16,
    /// Single-instance lock file, also holding the daemon's pid.
    pub pidfile: PathBuf,
    /// Upper bound on how long the receive loop waits before re-checking
    /// for shutdown (milliseconds).
    pub poll_interval_ms: u64,
    /// Log file, in either mode. Without it a detached daemon logs to syslog
    /// and a foreground one to stderr.
    pub log_file: Option<PathBuf>,
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            pidfile: PathBuf::from(DEFAULT_PIDFILE),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            log_file: None,
            log_filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Values given on the command line; each one that is set wins over the file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub pidfile: Option<PathBuf>,
    pub port: Option<u16>,
}

pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let buf = fs::read_to_string(path)?;
    Ok(toml::from_str::<Config>(&buf)?)
}

pub fn apply_overrides(cfg: &mut Config, overrides: Overrides) {
    if let Some(pidfile) = overrides.pidfile {
        cfg.pidfile = pidfile;
    }
    if let Some(port) = overrides.port {
        cfg.port = port;
    }
}

/// Clamps values that would break the receive loop.
pub fn ensure_defaults(cfg: &mut Config) {
    if cfg.poll_interval_ms == 0 {
        tracing::warn!(
            "poll_interval_ms = 0 would spin the receive loop; using {DEFAULT_POLL_INTERVAL_MS} ms"
        );
        cfg.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
    }
}
