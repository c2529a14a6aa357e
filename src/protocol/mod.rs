//! Protocol module - Defines the wire protocol for duelnet battles
//!
//! The protocol uses a line-oriented text format so captures stay
//! readable during debugging:
//! - one `name: value` pair per line
//! - lines separated by a single newline
//! - every message carries a `message_type` field
//!
//! Reliable messages additionally carry a `sequence_number`; ACKs carry
//! an `ack_number` and no sequence number of their own.

mod codec;
mod message;

pub use codec::*;
pub use message::*;

use std::time::Duration;

/// Maximum size of a single datagram. The protocol assumes no encoded
/// message exceeds this.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// How long a reliable send waits for an ACK before retransmitting.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Total transmission attempts per reliable send, first try included.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Default port for duelnet sessions. Ports at or below 5000 are left
/// to system services.
pub const DEFAULT_PORT: u16 = 5100;
