use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{self, UdpSocket};
use tokio::time::timeout;

use crate::utils::{ChatError, Result};

/// The single UDP control socket. Owns no protocol logic; the dispatcher
/// decides what a datagram means.
pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Bind with SO_REUSEADDR so a restarted instance can reclaim its port
    /// immediately. Port 0 asks the OS for an ephemeral port.
    pub async fn bind(port: u16) -> Result<Self> {
        let addr: SocketAddr = format!("0.0.0.0:{}", port)
            .parse()
            .map_err(|e| ChatError::Network(format!("invalid bind address: {}", e)))?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| ChatError::Network(format!("failed to create socket: {}", e)))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| ChatError::Network(format!("failed to set reuse_address: {}", e)))?;
        socket
            .bind(&addr.into())
            .map_err(|e| ChatError::Network(format!("failed to bind to {}: {}", addr, e)))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ChatError::Network(format!("failed to set nonblocking: {}", e)))?;

        let socket = UdpSocket::from_std(socket.into())
            .map_err(|e| ChatError::Network(format!("failed to register socket: {}", e)))?;

        debug!("socket bound to {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Non-blocking best-effort send to a (host, port) target; hostnames
    /// such as "localhost" are resolved here.
    pub async fn send(&self, payload: &[u8], target: (&str, u16)) -> Result<()> {
        self.socket.send_to(payload, target).await?;
        Ok(())
    }

    pub async fn send_addr(&self, payload: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket.send_to(payload, addr).await?;
        Ok(())
    }

    /// Wait up to `wait` for one datagram. `Ok(None)` means the poll timed
    /// out, which is the loop's chance to observe the stop flag.
    pub async fn recv(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> Result<Option<(usize, SocketAddr)>> {
        match timeout(wait, self.socket.recv_from(buf)).await {
            Err(_) => Ok(None),
            Ok(Ok((len, from))) => Ok(Some((len, from))),
            Ok(Err(e)) => Err(ChatError::Network(e.to_string())),
        }
    }

    /// Resolve a peer's stored (host, port) to a socket address, e.g. as
    /// the key of the pending-transfer table.
    pub async fn resolve(target: (&str, u16)) -> Result<SocketAddr> {
        net::lookup_host(target)
            .await?
            .next()
            .ok_or_else(|| ChatError::Network(format!("cannot resolve {}:{}", target.0, target.1)))
    }
}
