//! The public send/receive surface.
//!
//! [`ReliableSocket`] composes one [`DatagramTransport`] with one
//! [`ReliabilityController`].  It is cheap to clone; clones share the
//! transport, the sequence space and the retransmit worker.
//!
//! # Modes
//!
//! The [`Mode`] is fixed when the socket is built:
//! - [`ReliableSocket::bind`] → unconnected: use [`send_to`] / [`recv_from`].
//! - [`ReliableSocket::connect`] → connected: use [`send`] / [`recv`]
//!   ([`recv_from`] also works and reports the peer).
//!
//! Using the other family fails with [`ReliableError::InvalidMode`].
//!
//! # Completion styles
//!
//! Every operation comes in three flavours with identical effect:
//!
//! ```ignore
//! // future
//! let n = sock.send_to(b"hi", dest, true).await?;
//! // blocking (outside async context, e.g. inside spawn_blocking)
//! let n = sock.send_to_blocking(b"hi", dest, true)?;
//! // begin/end with a completion callback
//! let op = sock.begin_send_to(b"hi".to_vec(), dest, true, |r| println!("{r:?}"));
//! let n = op.end()?;
//! ```
//!
//! [`send`]: ReliableSocket::send
//! [`recv`]: ReliableSocket::recv
//! [`send_to`]: ReliableSocket::send_to
//! [`recv_from`]: ReliableSocket::recv_from

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::net::ToSocketAddrs;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::controller::ReliabilityController;
use crate::error::{ReliableError, Result};
use crate::sequence::PendingKey;
use crate::socket::{DatagramTransport, UdpTransport};
use crate::state::Mode;
use crate::timer::RetransmitConfig;

/// A UDP socket with optional per-datagram acknowledgement and retransmission.
#[derive(Debug)]
pub struct ReliableSocket<T = UdpTransport> {
    controller: Arc<ReliabilityController<T>>,
    runtime: Handle,
}

impl<T> Clone for ReliableSocket<T> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            runtime: self.runtime.clone(),
        }
    }
}

impl ReliableSocket<UdpTransport> {
    /// Bind an unconnected socket with the default retransmit settings.
    ///
    /// `local` is anything tokio can resolve: a `SocketAddr`, `"host:port"`,
    /// or an `(ip, port)` pair.
    pub async fn bind(local: impl ToSocketAddrs) -> Result<Self> {
        Self::bind_with_config(local, RetransmitConfig::default()).await
    }

    pub async fn bind_with_config(
        local: impl ToSocketAddrs,
        config: RetransmitConfig,
    ) -> Result<Self> {
        let transport = UdpTransport::bind(local).await?;
        Ok(Self::from_transport(transport, config))
    }

    /// Bind to `local` and fix `peer` as the only remote endpoint.
    ///
    /// A host name in `peer` is resolved once, here.
    pub async fn connect(local: impl ToSocketAddrs, peer: impl ToSocketAddrs) -> Result<Self> {
        Self::connect_with_config(local, peer, RetransmitConfig::default()).await
    }

    pub async fn connect_with_config(
        local: impl ToSocketAddrs,
        peer: impl ToSocketAddrs,
        config: RetransmitConfig,
    ) -> Result<Self> {
        let transport = UdpTransport::connect(local, peer).await?;
        Ok(Self::from_transport(transport, config))
    }
}

impl<T: DatagramTransport> ReliableSocket<T> {
    /// Wrap an arbitrary transport.  The mode follows `transport.peer_addr()`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn from_transport(transport: T, config: RetransmitConfig) -> Self {
        let runtime = Handle::current();
        let controller = ReliabilityController::spawn(transport, config);
        log::debug!("[sock] new socket, {}", controller.mode());
        Self {
            controller,
            runtime,
        }
    }

    pub fn mode(&self) -> Mode {
        self.controller.mode()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.controller.transport().local_addr()?)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.controller.mode().peer()
    }

    pub fn transport(&self) -> &T {
        self.controller.transport()
    }

    // -----------------------------------------------------------------------
    // Future-based
    // -----------------------------------------------------------------------

    /// Send `payload` to the connected peer.  Returns framed bytes written.
    pub async fn send(&self, payload: &[u8], reliable: bool) -> Result<usize> {
        let peer = self.mode().require_connected()?;
        self.controller.send(payload, reliable, peer).await
    }

    /// Send `payload` to `dest`.  Returns framed bytes written.
    pub async fn send_to(&self, payload: &[u8], dest: SocketAddr, reliable: bool) -> Result<usize> {
        self.mode().require_unconnected()?;
        self.controller.send(payload, reliable, dest).await
    }

    /// Receive the next application payload from the connected peer.
    pub async fn recv(&self) -> Result<Vec<u8>> {
        self.mode().require_connected()?;
        let (payload, _) = self.controller.receive().await?;
        Ok(payload)
    }

    /// Receive the next application payload and its sender.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr)> {
        self.controller.receive().await
    }

    // -----------------------------------------------------------------------
    // Blocking
    //
    // These drive the future on the runtime captured at construction and
    // panic if called from inside async context.
    // -----------------------------------------------------------------------

    pub fn send_blocking(&self, payload: &[u8], reliable: bool) -> Result<usize> {
        self.runtime.block_on(self.send(payload, reliable))
    }

    pub fn send_to_blocking(
        &self,
        payload: &[u8],
        dest: SocketAddr,
        reliable: bool,
    ) -> Result<usize> {
        self.runtime.block_on(self.send_to(payload, dest, reliable))
    }

    pub fn recv_blocking(&self) -> Result<Vec<u8>> {
        self.runtime.block_on(self.recv())
    }

    pub fn recv_from_blocking(&self) -> Result<(Vec<u8>, SocketAddr)> {
        self.runtime.block_on(self.recv_from())
    }

    // -----------------------------------------------------------------------
    // Begin / end
    // -----------------------------------------------------------------------

    /// Start a connected send; `callback` sees the result before
    /// [`Completion::end`] returns it.
    pub fn begin_send<F>(&self, payload: Vec<u8>, reliable: bool, callback: F) -> Completion<usize>
    where
        F: FnOnce(&Result<usize>) + Send + 'static,
    {
        let this = self.clone();
        self.begin(callback, async move { this.send(&payload, reliable).await })
    }

    pub fn begin_send_to<F>(
        &self,
        payload: Vec<u8>,
        dest: SocketAddr,
        reliable: bool,
        callback: F,
    ) -> Completion<usize>
    where
        F: FnOnce(&Result<usize>) + Send + 'static,
    {
        let this = self.clone();
        self.begin(callback, async move { this.send_to(&payload, dest, reliable).await })
    }

    pub fn begin_recv<F>(&self, callback: F) -> Completion<Vec<u8>>
    where
        F: FnOnce(&Result<Vec<u8>>) + Send + 'static,
    {
        let this = self.clone();
        self.begin(callback, async move { this.recv().await })
    }

    pub fn begin_recv_from<F>(&self, callback: F) -> Completion<(Vec<u8>, SocketAddr)>
    where
        F: FnOnce(&Result<(Vec<u8>, SocketAddr)>) + Send + 'static,
    {
        let this = self.clone();
        self.begin(callback, async move { this.recv_from().await })
    }

    fn begin<R, F, Fut>(&self, callback: F, op: Fut) -> Completion<R>
    where
        R: Send + 'static,
        F: FnOnce(&Result<R>) + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn(async move {
            let result = op.await;
            callback(&result);
            // Caller may have dropped the completion; the callback already ran.
            let _ = tx.send(result);
        });
        Completion { rx }
    }

    // -----------------------------------------------------------------------
    // Lifecycle & diagnostics
    // -----------------------------------------------------------------------

    /// Close the transport for every clone of this socket.
    ///
    /// Blocked receives return [`ReliableError::TransportClosed`], later sends
    /// fail the same way.  Pending retransmissions keep their timers; call
    /// [`cancel_retransmissions`](Self::cancel_retransmissions) to drop them.
    pub fn close(&self) {
        log::debug!("[sock] close");
        self.controller.close();
    }

    pub fn is_closed(&self) -> bool {
        self.controller.is_closed()
    }

    /// Stop retransmitting everything still pending.  Returns how many
    /// packets were abandoned.
    pub fn cancel_retransmissions(&self) -> usize {
        self.controller.registry().clear()
    }

    /// Reliable packets sent but not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.controller.registry().pending_count()
    }

    pub fn is_pending(&self, peer: SocketAddr, seq: u8) -> bool {
        self.controller.registry().is_pending(PendingKey::new(peer, seq))
    }

    pub fn retry_count(&self, peer: SocketAddr, seq: u8) -> Option<u32> {
        self.controller.registry().retry_count(PendingKey::new(peer, seq))
    }

    /// The sequence number the next reliable send towards `peer` will carry.
    pub fn next_sequence(&self, peer: SocketAddr) -> u8 {
        self.controller.registry().next_sequence(peer)
    }
}

/// Result slot of a `begin_*` call.
///
/// Await it from async code, or call [`end`](Completion::end) from a
/// blocking context.
#[derive(Debug)]
pub struct Completion<R> {
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> Completion<R> {
    /// Block until the operation finishes and return its result.
    ///
    /// # Panics
    ///
    /// Panics when called from inside async context.
    pub fn end(self) -> Result<R> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(abandoned()))
    }
}

impl<R> Future for Completion<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(abandoned())))
    }
}

/// The task driving a `begin_*` call died without reporting (runtime shut down).
fn abandoned() -> ReliableError {
    ReliableError::TransportClosed(None)
}
