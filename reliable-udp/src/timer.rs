//! Retransmit timer management.
//!
//! Reliable delivery requires that an unacknowledged packet is re-sent if no
//! ACK arrives within a fixed window.  This module provides:
//! - [`RetransmitConfig`]: the window length and an optional retry cap.
//! - [`RetransmitTimer`]: a one-shot, cancellable timer owned by one pending
//!   packet.  When it fires it posts the packet's key to a channel; it never
//!   touches registry state itself.
//!
//! There is no RTT estimation and no back-off: every pending packet is
//! retried at the same fixed interval until it is acknowledged.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

/// Default retransmission window.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30);

/// Adjustable retransmission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitConfig {
    /// Time between the (re)transmission of a packet and its next resend.
    pub timeout: Duration,
    /// Maximum number of resends before a packet is abandoned.
    ///
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: None,
        }
    }
}

impl RetransmitConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A one-shot timer that delivers `key` on `fired` after `after` elapses.
///
/// Dropping the timer cancels it.  Must be armed from within a tokio runtime.
#[derive(Debug)]
pub struct RetransmitTimer {
    handle: AbortHandle,
}

impl RetransmitTimer {
    /// Arm a new timer.
    pub fn arm<K>(key: K, after: Duration, fired: UnboundedSender<K>) -> Self
    where
        K: Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // Receiver gone means the controller is shutting down.
            let _ = fired.send(key);
        });
        Self {
            handle: task.abort_handle(),
        }
    }

    /// Cancel the timer.  No-op if it already fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn default_config_retries_forever_every_30ms() {
        let config = RetransmitConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(30));
        assert_eq!(config.max_retries, None);
    }

    #[test]
    fn builder_overrides() {
        let config = RetransmitConfig::default()
            .with_timeout(Duration::from_millis(5))
            .with_max_retries(3);
        assert_eq!(config.timeout, Duration::from_millis(5));
        assert_eq!(config.max_retries, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = RetransmitTimer::arm(42u8, Duration::from_millis(30), tx);

        tokio::time::sleep(Duration::from_millis(29)).await;
        assert!(rx.try_recv().is_err(), "fired early");

        assert_eq!(rx.recv().await, Some(42));
        // One-shot: the sender was moved into the task, so the channel closes.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = RetransmitTimer::arm(1u8, Duration::from_millis(30), tx);
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(RetransmitTimer::arm(1u8, Duration::from_millis(30), tx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rx.recv().await, None);
    }
}
