//! Sequence-number allocation and the in-flight retransmission store.
//!
//! [`SequenceRegistry`] owns the 0–255 sequence space for outbound reliable
//! packets.  For every packet that has not been acknowledged yet it keeps the
//! framed bytes, a [`RetransmitTimer`], and a retry counter.
//!
//! # Contract
//!
//! - Each destination has its own counter; the pending map is keyed by
//!   [`PendingKey`] = (peer, seq) so an ack from one peer can never release a
//!   packet sent to another.
//! - Peer addresses are canonicalised on the way in: an IPv4-mapped IPv6
//!   address (`[::ffff:a.b.c.d]:p`) and its IPv4 form name the same peer.
//!   A dual-stack socket sends to one form and hears the ack from the other.
//! - The counter advances by one (mod 256) on every allocation, whether or
//!   not earlier packets were acknowledged.
//! - A peer's counter is forgotten once nothing is in flight towards it and
//!   the counter has wrapped back to 0, i.e. when it equals a fresh one.
//!   Counters of idle peers that stopped elsewhere in the cycle are kept,
//!   so the map is bounded by the number of such peers.
//! - Allocating a sequence number that is still pending fails with
//!   [`ReliableError::SequenceExhausted`].
//! - Insert ([`allocate_and_register`]), resend ([`resend_payload`]) and
//!   release ([`release`]) are serialised by one mutex, which is never held
//!   across an await point.
//!
//! This module does not touch the socket; fired timers only post their key to
//! the channel handed to [`SequenceRegistry::new`].
//!
//! [`allocate_and_register`]: SequenceRegistry::allocate_and_register
//! [`resend_payload`]: SequenceRegistry::resend_payload
//! [`release`]: SequenceRegistry::release

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::error::{ReliableError, Result};
use crate::timer::{RetransmitConfig, RetransmitTimer};

/// Identifies one in-flight packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub peer: SocketAddr,
    pub seq: u8,
}

impl PendingKey {
    /// Key for `seq` towards `peer`, with `peer` canonicalised.
    pub fn new(peer: SocketAddr, seq: u8) -> Self {
        Self {
            peer: canonical(peer),
            seq,
        }
    }

    fn canonical(self) -> Self {
        Self::new(self.peer, self.seq)
    }
}

impl std::fmt::Display for PendingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.peer, self.seq)
    }
}

/// Fold an IPv4-mapped IPv6 address into plain IPv4.
pub fn canonical(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}

/// A packet that has been sent but not yet acknowledged.
#[derive(Debug)]
struct PendingRetransmission {
    /// The framed datagram, header included.  Immutable once stored.
    datagram: Arc<[u8]>,
    /// Number of resends so far (0 = only the original transmission).
    retries: u32,
    timer: RetransmitTimer,
}

/// Counter state for one destination.
#[derive(Debug, Default)]
struct PeerState {
    next_seq: u8,
    /// Entries in `RegistryInner::pending` towards this peer.
    in_flight: usize,
}

impl PeerState {
    fn is_fresh(&self) -> bool {
        self.in_flight == 0 && self.next_seq == 0
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    peers: HashMap<SocketAddr, PeerState>,
    pending: HashMap<PendingKey, PendingRetransmission>,
}

impl RegistryInner {
    /// Remove one pending entry, pruning its peer's counter if it is fresh.
    fn remove(&mut self, key: PendingKey) -> Option<PendingRetransmission> {
        let entry = self.pending.remove(&key)?;
        if let Some(state) = self.peers.get_mut(&key.peer) {
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.is_fresh() {
                self.peers.remove(&key.peer);
            }
        }
        Some(entry)
    }
}

/// Outbound sequence space and retransmission store for one controller.
#[derive(Debug)]
pub struct SequenceRegistry {
    inner: Mutex<RegistryInner>,
    config: RetransmitConfig,
    fired: UnboundedSender<PendingKey>,
}

impl SequenceRegistry {
    /// Create an empty registry.  Expired timers deliver their key on `fired`.
    pub fn new(config: RetransmitConfig, fired: UnboundedSender<PendingKey>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            config,
            fired,
        }
    }

    /// Allocate the next sequence number towards `peer`, store the datagram
    /// produced by `frame`, and arm its retransmit timer.
    ///
    /// `frame` receives the allocated sequence number and returns the
    /// complete datagram to retain for resending.  The returned bytes are the
    /// same ones that should go on the wire for the first transmission.
    pub fn allocate_and_register<F>(&self, peer: SocketAddr, frame: F) -> Result<(u8, Arc<[u8]>)>
    where
        F: FnOnce(u8) -> Vec<u8>,
    {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let peer = canonical(peer);
        let state = inner.peers.entry(peer).or_default();
        let key = PendingKey {
            peer,
            seq: state.next_seq,
        };

        if inner.pending.contains_key(&key) {
            return Err(ReliableError::SequenceExhausted { peer, seq: key.seq });
        }

        let datagram: Arc<[u8]> = frame(key.seq).into();
        let timer = RetransmitTimer::arm(key, self.config.timeout, self.fired.clone());
        inner.pending.insert(
            key,
            PendingRetransmission {
                datagram: Arc::clone(&datagram),
                retries: 0,
                timer,
            },
        );
        state.in_flight += 1;
        state.next_seq = key.seq.wrapping_add(1);

        Ok((key.seq, datagram))
    }

    /// Drop the pending entry for `key` and cancel its timer.
    ///
    /// Fails with [`ReliableError::UnknownSequence`] when nothing is pending
    /// under `key` (e.g. a duplicated ack).
    pub fn release(&self, key: PendingKey) -> Result<()> {
        let key = key.canonical();
        let removed = self.lock().remove(key);
        match removed {
            Some(entry) => {
                entry.timer.cancel();
                Ok(())
            }
            None => Err(ReliableError::UnknownSequence {
                peer: key.peer,
                seq: key.seq,
            }),
        }
    }

    /// Fetch the datagram for a resend, bump its retry counter, and re-arm
    /// its timer for another window.
    ///
    /// Fails with [`ReliableError::UnknownSequence`] if the packet was
    /// acknowledged in the meantime, or with
    /// [`ReliableError::RetriesExhausted`] once the configured cap is reached
    /// (the entry is evicted in that case).
    pub fn resend_payload(&self, key: PendingKey) -> Result<Arc<[u8]>> {
        let key = key.canonical();
        let mut inner = self.lock();
        let Some(entry) = inner.pending.get_mut(&key) else {
            return Err(ReliableError::UnknownSequence {
                peer: key.peer,
                seq: key.seq,
            });
        };

        if let Some(max) = self.config.max_retries {
            if entry.retries >= max {
                let retries = entry.retries;
                inner.remove(key);
                return Err(ReliableError::RetriesExhausted {
                    peer: key.peer,
                    seq: key.seq,
                    retries,
                });
            }
        }

        entry.retries += 1;
        entry.timer = RetransmitTimer::arm(key, self.config.timeout, self.fired.clone());
        Ok(Arc::clone(&entry.datagram))
    }

    /// Cancel every timer and forget every pending packet.
    ///
    /// Returns the number of entries dropped.  Counters are kept, except
    /// those that are back at 0.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let drained: Vec<_> = inner.pending.drain().collect();
        inner.peers.retain(|_, state| {
            state.in_flight = 0;
            !state.is_fresh()
        });
        drained.len()
    }

    /// Number of packets awaiting acknowledgement, across all peers.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of destinations whose counter is currently tracked.
    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn is_pending(&self, key: PendingKey) -> bool {
        self.lock().pending.contains_key(&key.canonical())
    }

    /// Resends performed so far for `key`, or `None` if it is not pending.
    pub fn retry_count(&self, key: PendingKey) -> Option<u32> {
        self.lock().pending.get(&key.canonical()).map(|e| e.retries)
    }

    /// The sequence number the next reliable send towards `peer` will use.
    pub fn next_sequence(&self, peer: SocketAddr) -> u8 {
        self.lock()
            .peers
            .get(&canonical(peer))
            .map_or(0, |state| state.next_seq)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A panic while holding the lock cannot leave a half-updated entry.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
