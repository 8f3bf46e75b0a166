use crate::{daemon::ShutdownFlag, net::proto, time::clock::Clock};
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::{io, net::SocketAddr};
use tokio::{
    net::UdpSocket,
    time::{timeout, Duration},
};
use tracing::{debug, trace};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_PACKET: usize = 512;

/// Answers TSP requests on one UDP socket.
pub struct Responder<C> {
    sock: UdpSocket,
    poll_interval: Duration,
    clock: C,
}

impl<C: Clock> Responder<C> {
    /// Binds with `SO_REUSEADDR` so a restarted daemon can rebind at once.
    pub async fn bind(addr: SocketAddr, poll_interval: Duration, clock: C) -> Result<Self> {
        let sock = bind_reusable(addr)
            .with_context(|| format!("failed to bind UDP socket on {addr}"))?;
        let sock = UdpSocket::from_std(sock.into())
            .context("failed to register UDP socket with the runtime")?;
        debug!(addr = %sock.local_addr()?, "udp socket bound");
        Ok(Self {
            sock,
            poll_interval,
            clock,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.sock.local_addr()?)
    }

    /// Serves until `shutdown` is set and returns how many replies were sent.
    ///
    /// Each receive waits at most one poll interval, so a set flag is seen
    /// within that interval even with no traffic. Malformed datagrams are
    /// dropped; receive, send and clock failures end the loop with an error.
    pub async fn run(self, shutdown: &ShutdownFlag) -> Result<u64> {
        let mut buf = [0u8; MAX_PACKET];
        let mut replies = 0u64;
        while !shutdown.is_set() {
            let (n, peer) = match timeout(self.poll_interval, self.sock.recv_from(&mut buf)).await
            {
                Err(_elapsed) => continue,
                Ok(Ok(pair)) => pair,
                Ok(Err(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(err)) => return Err(err).context("recv from socket failed"),
            };
            let head = match proto::validate(&buf[..n]) {
                Ok(head) => head,
                Err(reason) => {
                    trace!(%peer, len = n, %reason, "dropping datagram");
                    continue;
                }
            };
            let now_ms = self.clock.now_ms()?;
            let reply = proto::encode_reply(head, now_ms);
            self.sock
                .send_to(&reply, peer)
                .await
                .with_context(|| format!("send to {peer} failed"))?;
            replies += 1;
        }
        Ok(replies)
    }
}

fn bind_reusable(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}
