//! Optional network simulator for deterministic testing.
//!
//! Real networks drop and duplicate packets.  To exercise the retransmission
//! and ack paths without depending on actual network conditions, this module
//! provides [`LossyTransport`], which wraps another [`DatagramTransport`] and
//! intercepts outbound datagrams, applying a configurable fault model:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.    |
//! | Duplication      | Send a datagram twice with `duplicate_rate`.     |
//!
//! Decisions come from a seeded RNG, so a failing test replays identically.
//! Inbound datagrams pass through untouched; put the simulator on the sending
//! side of whichever direction should be lossy.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::DatagramTransport;

/// Configuration for the fault-injection model.
///
/// Probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram that was not dropped is sent twice.
    pub duplicate_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// Counters shared between a [`LossyTransport`] and test code.
#[derive(Debug, Default)]
pub struct SimulatorStats {
    /// Datagrams handed to the inner transport (duplicates counted twice).
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
    pub duplicated: AtomicU64,
}

impl SimulatorStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn duplicated(&self) -> u64 {
        self.duplicated.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Drop,
    Once,
    Twice,
}

/// A fault-injecting wrapper around another transport.
#[derive(Debug)]
pub struct LossyTransport<T> {
    inner: T,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    stats: Arc<SimulatorStats>,
}

impl<T: DatagramTransport> LossyTransport<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner,
            config,
            rng: Mutex::new(rng),
            stats: Arc::new(SimulatorStats::default()),
        }
    }

    /// Handle to the live counters; stays valid after the transport moves.
    pub fn stats(&self) -> Arc<SimulatorStats> {
        Arc::clone(&self.stats)
    }

    fn roll(&self) -> Fate {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if rng.random_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
            Fate::Drop
        } else if rng.random_bool(self.config.duplicate_rate.clamp(0.0, 1.0)) {
            Fate::Twice
        } else {
            Fate::Once
        }
    }

    fn account(&self, fate: Fate) {
        match fate {
            Fate::Drop => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Fate::Once => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Fate::Twice => {
                self.stats.sent.fetch_add(2, Ordering::Relaxed);
                self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl<T: DatagramTransport> DatagramTransport for LossyTransport<T> {
    async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let fate = self.roll();
        self.account(fate);
        match fate {
            // A dropped datagram still looks sent to the caller.
            Fate::Drop => Ok(buf.len()),
            Fate::Once => self.inner.send(buf).await,
            Fate::Twice => {
                self.inner.send(buf).await?;
                self.inner.send(buf).await
            }
        }
    }

    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        let fate = self.roll();
        self.account(fate);
        match fate {
            Fate::Drop => Ok(buf.len()),
            Fate::Once => self.inner.send_to(buf, dest).await,
            Fate::Twice => {
                self.inner.send_to(buf, dest).await?;
                self.inner.send_to(buf, dest).await
            }
        }
    }

    async fn recv_from(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        self.inner.recv_from().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::UdpTransport;
    use std::time::Duration;

    async fn pair(config: SimulatorConfig) -> (LossyTransport<UdpTransport>, UdpTransport) {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let lossy = LossyTransport::new(UdpTransport::bind(any).await.unwrap(), config);
        let sink = UdpTransport::bind(any).await.unwrap();
        (lossy, sink)
    }

    #[tokio::test]
    async fn default_config_passes_everything_through() {
        let (lossy, sink) = pair(SimulatorConfig::default()).await;
        let dest = sink.local_addr().unwrap();
        for _ in 0..10 {
            lossy.send_to(b"x", dest).await.unwrap();
        }
        for _ in 0..10 {
            sink.recv_from().await.unwrap();
        }
        let stats = lossy.stats();
        assert_eq!(stats.sent(), 10);
        assert_eq!(stats.dropped(), 0);
        assert_eq!(stats.duplicated(), 0);
    }

    #[tokio::test]
    async fn total_loss_drops_everything() {
        let config = SimulatorConfig {
            loss_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let (lossy, sink) = pair(config).await;
        let dest = sink.local_addr().unwrap();
        assert_eq!(lossy.send_to(b"gone", dest).await.unwrap(), 4);

        let got = tokio::time::timeout(Duration::from_millis(100), sink.recv_from()).await;
        assert!(got.is_err(), "dropped datagram arrived");
        assert_eq!(lossy.stats().dropped(), 1);
    }

    #[tokio::test]
    async fn full_duplication_sends_twice() {
        let config = SimulatorConfig {
            duplicate_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let (lossy, sink) = pair(config).await;
        lossy.send_to(b"dup", sink.local_addr().unwrap()).await.unwrap();

        assert_eq!(sink.recv_from().await.unwrap().0, b"dup");
        assert_eq!(sink.recv_from().await.unwrap().0, b"dup");
        assert_eq!(lossy.stats().duplicated(), 1);
    }

    #[tokio::test]
    async fn same_seed_same_fates() {
        let config = SimulatorConfig {
            loss_rate: 0.5,
            duplicate_rate: 0.2,
            seed: 7,
        };
        let (a, _sink_a) = pair(config.clone()).await;
        let (b, _sink_b) = pair(config).await;
        let fates_a: Vec<_> = (0..64).map(|_| a.roll()).collect();
        let fates_b: Vec<_> = (0..64).map(|_| b.roll()).collect();
        assert_eq!(fates_a, fates_b);
    }
}
