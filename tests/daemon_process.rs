//! End-to-end tests that run the `tssd` binary.

mod common;

use std::net::UdpSocket;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use common::{free_udp_port, log_contains, wait_until};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tssd::daemon::lock::read_pid;
use tssd::net::proto::{TimeReply, TimeRequest, REPLY_LEN};

const STARTUP: Duration = Duration::from_secs(5);

fn tssd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tssd"));
    cmd.env_remove("TSSD_CONFIG")
        .env("RUST_LOG", "info")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

fn write_config(dir: &Path, port: u16) -> std::path::PathBuf {
    let path = dir.join("tssd.toml");
    let body = format!(
        "bind_address = \"127.0.0.1\"\nport = {port}\npidfile = \"{}\"\nlog_file = \"{}\"\n",
        dir.join("tssd.pid").display(),
        dir.join("tssd.log").display(),
    );
    std::fs::write(&path, body).unwrap();
    path
}

fn terminate(pid: u32) {
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).unwrap();
}

fn wait_exit(child: &mut Child, limit: Duration) -> ExitStatus {
    let mut status = None;
    wait_until(limit, || {
        status = child.try_wait().unwrap();
        status.is_some()
    });
    match status {
        Some(status) => status,
        None => {
            let _ = child.kill();
            panic!("tssd did not exit within {limit:?}");
        }
    }
}

fn query(port: u16, cookie: u64) -> TimeReply {
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let req = TimeRequest::new(cookie).to_bytes().unwrap();
    client.send_to(&req, ("127.0.0.1", port)).unwrap();
    let mut buf = [0u8; 64];
    let (n, _) = client.recv_from(&mut buf).expect("no reply from tssd");
    assert_eq!(n, REPLY_LEN);
    TimeReply::from_bytes(&buf[..n]).unwrap()
}

#[test]
fn test_second_instance_fails_and_first_survives() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("tssd.pid");
    let pidfile_arg = pidfile.to_str().unwrap();

    let mut first = tssd()
        .args(["--foreground", "--port", "0", "--pidfile", pidfile_arg])
        .spawn()
        .unwrap();
    assert!(
        wait_until(STARTUP, || read_pid(&pidfile) == Some(first.id())),
        "first instance never wrote its pid"
    );

    let second = tssd()
        .args(["--foreground", "--port", "0", "--pidfile", pidfile_arg])
        .status()
        .unwrap();
    assert_eq!(second.code(), Some(1));

    assert!(first.try_wait().unwrap().is_none(), "first instance died");
    assert_eq!(read_pid(&pidfile), Some(first.id()));

    terminate(first.id());
    assert!(wait_exit(&mut first, STARTUP).success());
}

#[test]
fn test_foreground_serves_and_stops_on_sigterm() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_udp_port();
    let config = write_config(dir.path(), port);
    let log = dir.path().join("tssd.log");

    let mut child = tssd()
        .arg("--foreground")
        .arg("--config")
        .arg(&config)
        .spawn()
        .unwrap();
    assert!(
        wait_until(STARTUP, || log_contains(&log, "started time sync server daemon")),
        "no start line in log"
    );

    assert_eq!(query(port, 0xDEAD_BEEF).client_cookie, 0xDEAD_BEEF);

    terminate(child.id());
    let status = wait_exit(&mut child, STARTUP);
    assert_eq!(status.code(), Some(0));
    assert!(log_contains(&log, "stopped time sync server daemon"));
}

#[test]
fn test_bind_failure_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("tssd.pid");
    let taken = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = taken.local_addr().unwrap().port().to_string();

    let status = tssd()
        .args(["--foreground", "--port", &port, "--pidfile"])
        .arg(&pidfile)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_bad_config_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("tssd.toml");
    std::fs::write(&config, "port = \"not a number\"\n").unwrap();

    let status = tssd()
        .arg("--foreground")
        .arg("--config")
        .arg(&config)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_daemonized_process_detaches_and_serves() {
    let dir = tempfile::tempdir().unwrap();
    let port = free_udp_port();
    let config = write_config(dir.path(), port);
    let pidfile = dir.path().join("tssd.pid");
    let log = dir.path().join("tssd.log");

    let mut launcher = tssd().arg("--config").arg(&config).spawn().unwrap();
    // The invoking process returns success as soon as the daemon is forked.
    assert!(wait_exit(&mut launcher, STARTUP).success());

    assert!(
        wait_until(STARTUP, || log_contains(&log, "started time sync server daemon")),
        "daemon never started"
    );
    let pid = read_pid(&pidfile).expect("daemon wrote no pid");
    assert_ne!(pid, launcher.id());

    assert_eq!(query(port, 42).client_cookie, 42);

    terminate(pid);
    assert!(
        wait_until(STARTUP, || log_contains(&log, "stopped time sync server daemon")),
        "daemon did not log its stop"
    );
}
