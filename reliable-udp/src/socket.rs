//! Raw datagram transport abstraction.
//!
//! The reliability layer never talks to the OS directly; it drives a
//! [`DatagramTransport`].  [`UdpTransport`] is the production implementation,
//! a thin wrapper around `tokio::net::UdpSocket` that owns only byte I/O.
//! [`crate::simulator::LossyTransport`] wraps any transport to inject faults.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::{ToSocketAddrs, UdpSocket};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
pub const MAX_DATAGRAM: usize = 65_535;

/// Whole-datagram send/receive, the capability the reliability layer builds on.
///
/// Implementations must deliver datagrams whole (no partial reads) and report
/// a dead socket as an `Err`.
pub trait DatagramTransport: Send + Sync + 'static {
    /// Send `buf` to the fixed peer.  Only valid on a connected transport.
    fn send(&self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Send `buf` to `dest`.  Only valid on an unconnected transport.
    fn send_to(&self, buf: &[u8], dest: SocketAddr)
        -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive the next datagram and its source address.
    fn recv_from(&self) -> impl Future<Output = io::Result<(Vec<u8>, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// The fixed peer, or `None` when the transport is unconnected.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// An async UDP socket speaking raw bytes.
#[derive(Debug)]
pub struct UdpTransport {
    inner: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpTransport {
    /// Bind an unconnected socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.  Host names
    /// are resolved and the first address that binds is used.
    pub async fn bind(local_addr: impl ToSocketAddrs) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        Ok(Self { inner, peer: None })
    }

    /// Bind to `local_addr` and fix `peer` as the only remote endpoint.
    ///
    /// `peer` may be a `"host:port"` string; the resolved address is kept.
    pub async fn connect(
        local_addr: impl ToSocketAddrs,
        peer: impl ToSocketAddrs,
    ) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        inner.connect(peer).await?;
        let peer = inner.peer_addr()?;
        Ok(Self {
            inner,
            peer: Some(peer),
        })
    }
}

impl DatagramTransport for UdpTransport {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.send(buf).await
    }

    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, dest).await
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}
