//! Reliability controller: framing, receive filtering, acks and resends.
//!
//! # Architecture
//!
//! ```text
//!   ReliableSocket (send / recv)
//!        │                    ▲
//!        ▼ attach_header      │ Deliver(payload)
//!  ┌──────────────────────────┴──────────┐
//!  │         ReliabilityController       │◀── PendingKey ── retransmit worker
//!  │   ┌──────────────────────────────┐  │        ▲
//!  │   │ SequenceRegistry (Mutex)     │──┼── timers ┘
//!  │   └──────────────────────────────┘  │
//!  └──────────────────┬──────────────────┘
//!                     │ raw datagrams
//!               DatagramTransport
//! ```
//!
//! Three paths touch the registry, each with one job:
//! - send: [`ReliabilityController::attach_header`] inserts,
//! - receive: [`ReliabilityController::classify_inbound`] releases on ACK,
//! - retransmit worker: [`ReliabilityController::resend`] re-sends.
//!
//! The worker is a single task per controller fed by the registry's timers.
//! It holds a `Weak` reference, so dropping the last controller handle tears
//! everything down: timers abort, the channel closes, the worker exits.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, watch};

use crate::error::{ReliableError, Result};
use crate::packet::{self, Frame};
use crate::sequence::{self, PendingKey, SequenceRegistry};
use crate::socket::DatagramTransport;
use crate::state::Mode;
use crate::timer::RetransmitConfig;

/// Outcome of filtering one inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Hand this payload to the application.
    Deliver(Vec<u8>),
    /// Consumed internally (ack or malformed); keep receiving.
    Suppress,
}

/// Binds one transport to one sequence registry.
#[derive(Debug)]
pub struct ReliabilityController<T> {
    transport: T,
    mode: Mode,
    registry: SequenceRegistry,
    closed: watch::Sender<bool>,
}

impl<T: DatagramTransport> ReliabilityController<T> {
    /// Build a controller over `transport` and start its retransmit worker.
    ///
    /// The mode is taken from `transport.peer_addr()` and never changes.
    /// Must be called from within a tokio runtime.
    pub fn spawn(transport: T, config: RetransmitConfig) -> Arc<Self> {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let mode = Mode::from_peer(transport.peer_addr());

        let controller = Arc::new(Self {
            transport,
            mode,
            registry: SequenceRegistry::new(config, fired_tx),
            closed,
        });
        tokio::spawn(retransmit_worker(Arc::downgrade(&controller), fired_rx));
        controller
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn registry(&self) -> &SequenceRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Send path
    // -----------------------------------------------------------------------

    /// Frame `payload` for the wire.
    ///
    /// Unreliable payloads get a single zero byte.  Reliable payloads get
    /// `REALIZABLE|SEQ` plus a freshly allocated sequence number towards
    /// `target`, and are registered for retransmission before this returns,
    /// i.e. before the first transmission is attempted.
    pub fn attach_header(
        &self,
        payload: &[u8],
        reliable: bool,
        target: SocketAddr,
    ) -> Result<Arc<[u8]>> {
        if !reliable {
            return Ok(packet::encode_unreliable(payload).into());
        }
        let peer = self.key_peer(target);
        let (seq, datagram) = self
            .registry
            .allocate_and_register(peer, |seq| packet::encode_data(seq, payload))?;
        log::debug!("[ctl] registered seq={seq} towards {target}");
        Ok(datagram)
    }

    /// Frame `payload` and write it to `target`.  Returns bytes written.
    pub async fn send(&self, payload: &[u8], reliable: bool, target: SocketAddr) -> Result<usize> {
        self.ensure_open()?;
        let datagram = self.attach_header(payload, reliable, target)?;
        let n = self.transmit(&datagram, target).await?;
        log::debug!(
            "[ctl] → {} len={} to {target}",
            if reliable { "DATA" } else { "RAW" },
            payload.len()
        );
        Ok(n)
    }

    /// Write an already-framed datagram, choosing the connected or addressed
    /// path from the mode.
    async fn transmit(&self, datagram: &[u8], target: SocketAddr) -> Result<usize> {
        self.ensure_open()?;
        let n = match self.mode {
            Mode::Connected(_) => self.transport.send(datagram).await?,
            Mode::Unconnected => self.transport.send_to(datagram, target).await?,
        };
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // Receive path
    // -----------------------------------------------------------------------

    /// Receive until a datagram classifies as [`Inbound::Deliver`].
    ///
    /// Acks are consumed and malformed datagrams dropped without returning.
    /// Fails only when the transport fails or [`close`](Self::close) is called.
    pub async fn receive(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return Err(ReliableError::TransportClosed(None));
            }

            let (datagram, source) = tokio::select! {
                result = self.transport.recv_from() => result?,
                _ = closed.changed() => return Err(ReliableError::TransportClosed(None)),
            };

            match self.classify_inbound(&datagram, source).await {
                Inbound::Deliver(payload) => return Ok((payload, source)),
                Inbound::Suppress => continue,
            }
        }
    }

    /// Decide what to do with one raw datagram from `source`.
    ///
    /// - unreliable: strip the flag byte and deliver,
    /// - ACK: release the pending entry and suppress,
    /// - SEQ: send an ack back to `source`, then deliver.  Retransmitted
    ///   duplicates are acked and delivered again.
    pub async fn classify_inbound(&self, datagram: &[u8], source: SocketAddr) -> Inbound {
        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[ctl] dropping datagram from {source}: {e}");
                return Inbound::Suppress;
            }
        };

        match frame {
            Frame::Unreliable(payload) => Inbound::Deliver(payload),
            Frame::Ack { seq } => {
                let key = PendingKey::new(self.key_peer(source), seq);
                match self.registry.release(key) {
                    Ok(()) => log::debug!("[ctl] ← ACK seq={seq} from {source}"),
                    Err(e) => log::debug!("[ctl] ← stale ACK: {e}"),
                }
                Inbound::Suppress
            }
            Frame::Data { seq, payload } => {
                let ack = packet::encode_ack(seq);
                match self.transmit(&ack, source).await {
                    Ok(_) => log::debug!(
                        "[ctl] ← DATA seq={seq} len={} from {source}; → ACK",
                        payload.len()
                    ),
                    // Peer will retransmit and we will ack again.
                    Err(e) => log::warn!("[ctl] failed to ack seq={seq} to {source}: {e}"),
                }
                Inbound::Deliver(payload)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Retransmission
    // -----------------------------------------------------------------------

    /// Resend the packet registered under `key`.  Never fails: a packet that
    /// was acked meanwhile is skipped, and transport errors are logged.
    pub async fn resend(&self, key: PendingKey) {
        let datagram = match self.registry.resend_payload(key) {
            Ok(datagram) => datagram,
            Err(ReliableError::UnknownSequence { .. }) => {
                log::debug!("[ctl] resend of {key} skipped: already acknowledged");
                return;
            }
            Err(e) => {
                log::warn!("[ctl] {e}");
                return;
            }
        };

        match self.transmit(&datagram, key.peer).await {
            Ok(_) => log::debug!(
                "[ctl] ↻ RESEND {key} retry={}",
                self.registry.retry_count(key).unwrap_or_default()
            ),
            Err(e) => log::warn!("[ctl] resend of {key} failed: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Mark the transport closed.  Blocked receives return `TransportClosed`.
    ///
    /// Pending retransmissions are left alone; see
    /// [`SequenceRegistry::clear`].
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ReliableError::TransportClosed(None));
        }
        Ok(())
    }

    /// Registry key peer: the fixed peer when connected, otherwise `addr`,
    /// with IPv4-mapped addresses folded to IPv4.
    fn key_peer(&self, addr: SocketAddr) -> SocketAddr {
        sequence::canonical(self.mode.peer().unwrap_or(addr))
    }
}

async fn retransmit_worker<T: DatagramTransport>(
    controller: Weak<ReliabilityController<T>>,
    mut fired: mpsc::UnboundedReceiver<PendingKey>,
) {
    while let Some(key) = fired.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.resend(key).await;
    }
    log::debug!("[ctl] retransmit worker stopped");
}
