//! Shared helpers for responder and daemon integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tssd::daemon::ShutdownFlag;
use tssd::net::responder::{Responder, DEFAULT_POLL_INTERVAL};
use tssd::time::clock::Clock;

/// Long enough that a reply that was going to come has come.
pub const NO_REPLY_WINDOW: Duration = Duration::from_millis(300);

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownFlag,
    pub handle: JoinHandle<anyhow::Result<u64>>,
}

impl TestServer {
    /// Stops the loop and returns the number of replies it sent.
    pub async fn stop(self) -> u64 {
        self.shutdown.trigger();
        self.handle
            .await
            .expect("responder task panicked")
            .expect("responder failed")
    }
}

/// Runs a responder on an ephemeral loopback port in a background task.
pub async fn spawn_responder<C: Clock + 'static>(clock: C) -> TestServer {
    let responder = Responder::bind("127.0.0.1:0".parse().unwrap(), DEFAULT_POLL_INTERVAL, clock)
        .await
        .expect("failed to bind test responder");
    let addr = responder.local_addr().unwrap();
    let shutdown = ShutdownFlag::new();
    let flag = shutdown.clone();
    let handle = tokio::spawn(async move { responder.run(&flag).await });
    TestServer {
        addr,
        shutdown,
        handle,
    }
}

/// Sends `payload` and returns the reply, or `None` if nothing arrives in `wait`.
pub async fn exchange(addr: SocketAddr, payload: &[u8], wait: Duration) -> Option<Vec<u8>> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(payload, addr).await.unwrap();
    let mut buf = [0u8; 128];
    match tokio::time::timeout(wait, client.recv_from(&mut buf)).await {
        Ok(Ok((n, _))) => Some(buf[..n].to_vec()),
        Ok(Err(err)) => panic!("client recv failed: {err}"),
        Err(_) => None,
    }
}

/// Polls until `cond` holds or `limit` passes.
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

pub fn log_contains(path: &Path, needle: &str) -> bool {
    std::fs::read_to_string(path)
        .map(|text| text.contains(needle))
        .unwrap_or(false)
}

/// A UDP port that was free a moment ago.
pub fn free_udp_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
