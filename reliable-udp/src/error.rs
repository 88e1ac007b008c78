//! Error taxonomy for the reliability layer.
//!
//! Only [`ReliableError::InvalidMode`], [`ReliableError::SequenceExhausted`]
//! and [`ReliableError::TransportClosed`] are ever returned from the public
//! send/receive operations.  The remaining variants describe internal races
//! that the controller logs and swallows.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReliableError {
    /// The call does not match the socket's connected/unconnected mode.
    #[error("invalid mode: {0}")]
    InvalidMode(&'static str),

    /// All 256 sequence numbers towards `peer` are awaiting acknowledgement.
    #[error("sequence space exhausted towards {peer} (seq {seq} still pending); check for congestion or an unreachable peer")]
    SequenceExhausted { peer: SocketAddr, seq: u8 },

    /// No pending retransmission exists for this key (already acknowledged).
    #[error("no pending retransmission for seq {seq} towards {peer}")]
    UnknownSequence { peer: SocketAddr, seq: u8 },

    /// The configured retry cap was reached and the packet was abandoned.
    #[error("gave up on seq {seq} towards {peer} after {retries} retransmissions")]
    RetriesExhausted {
        peer: SocketAddr,
        seq: u8,
        retries: u32,
    },

    /// The underlying socket failed (`Some`) or was closed locally (`None`).
    #[error("transport closed")]
    TransportClosed(#[source] Option<std::io::Error>),
}

impl From<std::io::Error> for ReliableError {
    fn from(e: std::io::Error) -> Self {
        Self::TransportClosed(Some(e))
    }
}

pub type Result<T> = std::result::Result<T, ReliableError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_transport_closed() {
        let err: ReliableError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, ReliableError::TransportClosed(Some(_))));
    }

    #[test]
    fn transport_failure_keeps_io_error_as_source() {
        use std::error::Error as _;
        let err: ReliableError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(err.source().is_some());
        assert!(ReliableError::TransportClosed(None).source().is_none());
    }

    #[test]
    fn display_messages() {
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(
            ReliableError::TransportClosed(None).to_string(),
            "transport closed"
        );
        assert_eq!(
            ReliableError::UnknownSequence { peer, seq: 3 }.to_string(),
            "no pending retransmission for seq 3 towards 127.0.0.1:9000"
        );
        assert!(ReliableError::InvalidMode("x").to_string().contains("invalid mode"));
    }
}
