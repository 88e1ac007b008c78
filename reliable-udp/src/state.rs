//! Connection-mode types.
//!
//! A [`crate::reliable_socket::ReliableSocket`] is created in exactly one
//! [`Mode`] and never leaves it.  The mode decides which send/receive calls
//! are legal and how acks and resends are addressed:
//!
//! ```text
//!   Unconnected ── send_to(dest) ──▶ ok         send() ──▶ InvalidMode
//!   Connected   ── send()        ──▶ ok    send_to(dest) ──▶ InvalidMode
//! ```

use std::net::SocketAddr;

use crate::error::{ReliableError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Every send names its destination; receives report the sender.
    #[default]
    Unconnected,
    /// One peer fixed at construction; sends and receives are implicit.
    Connected(SocketAddr),
}

impl Mode {
    pub fn from_peer(peer: Option<SocketAddr>) -> Self {
        peer.map_or(Mode::Unconnected, Mode::Connected)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        match self {
            Mode::Connected(peer) => Some(*peer),
            Mode::Unconnected => None,
        }
    }

    /// The fixed peer, or `InvalidMode` on an unconnected socket.
    pub fn require_connected(&self) -> Result<SocketAddr> {
        self.peer().ok_or(ReliableError::InvalidMode(
            "the operation is not allowed on non-connected sockets",
        ))
    }

    /// `InvalidMode` on a connected socket.
    pub fn require_unconnected(&self) -> Result<()> {
        match self {
            Mode::Unconnected => Ok(()),
            Mode::Connected(_) => Err(ReliableError::InvalidMode(
                "cannot send to an arbitrary host while connected",
            )),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Unconnected => write!(f, "unconnected"),
            Mode::Connected(peer) => write!(f, "connected to {peer}"),
        }
    }
}
