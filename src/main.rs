use anyhow::Context;
use clap::Parser;
use std::{os::unix::io::RawFd, path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tssd::{
    config::{apply_overrides, ensure_defaults, load, Config, Overrides},
    daemon::{daemonize, install_sigterm_handler, DetachOptions, SingleInstanceGuard},
    logging::{self, LogSink},
    net::responder::Responder,
    time::clock::SystemClock,
};

/// Time Sync Server Daemon: ntp like server, used to synchronize clients time fast and precisely
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path of the PID lock file [default: /var/run/tssd.pid]
    #[arg(short, long)]
    pidfile: Option<PathBuf>,

    /// UDP port to listen on [default: 12321]
    #[arg(long)]
    port: Option<u16>,

    /// TOML configuration file
    #[arg(short, long, env = "TSSD_CONFIG")]
    config: Option<PathBuf>,

    /// Stay attached to the terminal (for supervisors and debugging)
    #[arg(short, long)]
    foreground: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let cfg = match resolve_config(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("tssd: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    match run(cfg, args.foreground) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if logging::is_initialized() => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("tssd: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut cfg = match &args.config {
        Some(path) => load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    apply_overrides(
        &mut cfg,
        Overrides {
            pidfile: args.pidfile.clone(),
            port: args.port,
        },
    );
    Ok(cfg)
}

fn run(mut cfg: Config, foreground: bool) -> anyhow::Result<()> {
    let sink = LogSink::select(cfg.log_file.as_deref(), !foreground);
    let log_fd: Option<RawFd> = if sink.installs_after_detach() {
        None
    } else {
        logging::init(&sink, &cfg.log_filter)?
    };
    // The working directory becomes / once detached.
    let pidfile = std::path::absolute(&cfg.pidfile)
        .with_context(|| format!("invalid pidfile path {}", cfg.pidfile.display()))?;
    // No threads may exist yet: the runtime is built after the forks.
    if !foreground {
        let opts = log_fd
            .into_iter()
            .fold(DetachOptions::default(), DetachOptions::keep_fd);
        daemonize(&opts)?;
    }
    if sink.installs_after_detach() {
        logging::init(&sink, &cfg.log_filter)?;
    }
    ensure_defaults(&mut cfg);
    let guard = SingleInstanceGuard::acquire(&pidfile)?;
    let shutdown = install_sigterm_handler()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let served = runtime.block_on(async {
        let responder =
            Responder::bind(cfg.listen_addr(), cfg.poll_interval(), SystemClock).await?;
        info!(
            pid = guard.pid(),
            pidfile = %guard.path().display(),
            addr = %responder.local_addr()?,
            "started time sync server daemon"
        );
        let served = responder.run(&shutdown).await?;
        anyhow::Ok(served)
    })?;

    info!(replies = served, "stopped time sync server daemon");
    Ok(())
}
