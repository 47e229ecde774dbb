//! Wire protocol for the wakeup channel.
//!
//! Every channel starts with a [`Handshake`] as its open payload, after which
//! either side may send [`WireMessage`]s:
//! - `Lookup`: ask for something by hash (or anything new)
//! - `Announce`: opaque application payload
//! - `Info`: the sender's current interest in the topic
//!
//! All payloads use a fixed bincode encoding.

pub mod handshake;
pub mod messages;

pub use handshake::{Handshake, PROTOCOL_VERSION};
pub use messages::{Announce, Info, Lookup, ProtocolError, WireMessage, MAX_MESSAGE_SIZE};

/// Protocol name used for channel pairing on a multiplexed connection.
pub const PROTOCOL_NAME: &str = "wakeup";
