//! `reliable-udp`: acknowledged, retransmitting datagrams over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────┐  send / send_to   ┌────────────────┐
//!  │ ReliableSocket │──────────────────▶│ ReliableSocket │
//!  │   (client)     │◀──────────────────│   (server)     │
//!  └───────┬────────┘       ACKs        └────────────────┘
//!          │
//!  ┌───────▼──────────────────────────────┐
//!  │        ReliabilityController         │
//!  │  framing · receive filter · resends  │
//!  └───────┬───────────────────┬──────────┘
//!          │                   │ PendingKey
//!  ┌───────▼──────┐   ┌────────▼─────────┐
//!  │  Transport   │   │ SequenceRegistry │──▶ RetransmitTimer (per packet)
//!  └──────────────┘   └──────────────────┘
//! ```
//!
//! Each datagram is either best-effort (1-byte header) or reliable (2-byte
//! header with a sequence number).  A reliable datagram is resent at a fixed
//! interval until the peer acks it.  Delivery is at-least-once and unordered:
//! a retransmission whose ack was lost is delivered again.
//!
//! Each module has a single responsibility:
//! - [`packet`]          — wire format (serialise / deserialise)
//! - [`sequence`]        — sequence allocation and in-flight store
//! - [`timer`]           — retransmit timers and their configuration
//! - [`controller`]      — framing, receive filter, acks, resends
//! - [`reliable_socket`] — public socket with future, blocking and callback APIs
//! - [`state`]           — connected / unconnected mode
//! - [`socket`]          — raw datagram transport abstraction
//! - [`simulator`]       — optional lossy network layer for testing
//! - [`error`]           — error taxonomy

pub mod controller;
pub mod error;
pub mod packet;
pub mod reliable_socket;
pub mod sequence;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use error::{ReliableError, Result};
pub use reliable_socket::{Completion, ReliableSocket};
pub use state::Mode;
pub use timer::RetransmitConfig;
