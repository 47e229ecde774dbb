//! Transport trait for the multiplexed secure connections underneath the
//! wakeup protocol.
//!
//! The transport owns connections ("streams"), runs their secure handshake,
//! and multiplexes protocol channels over them. The swarm drives it through
//! [`Transport`] and is fed back through [`TransportEvent`]s.
//!
//! Implementations:
//! - [`crate::memory::MemoryTransport`]: in-process queues (tests, simulator)

use crate::capability::{TopicId, TranscriptHash};
use crate::protocol::{Handshake, WireMessage};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Allocate a process-unique stream id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Identifier of one protocol channel on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Inbound activity delivered to the swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The stream's secure handshake completed
    StreamOpen(StreamId),
    /// The stream closed (its channels close individually)
    StreamClose(StreamId),
    /// The remote opened a channel for a topic we have no channel for yet
    Pair { stream: StreamId, id: TopicId },
    /// Both sides opened the channel; carries the remote handshake
    ChannelOpen {
        channel: ChannelId,
        handshake: Handshake,
    },
    /// A message arrived on an open channel
    ChannelMessage {
        channel: ChannelId,
        message: WireMessage,
    },
    /// The channel closed, locally or remotely
    ChannelClose { channel: ChannelId },
}

/// Multiplexing transport consumed by the swarm.
///
/// All sends are fire-and-forget. Failures surface as close events.
pub trait Transport {
    /// Whether the stream's secure handshake has completed.
    fn is_connected(&self, stream: StreamId) -> bool;

    /// Whether we initiated the stream.
    fn is_initiator(&self, stream: StreamId) -> bool;

    /// Transcript hash of the stream's handshake (`None` until connected).
    fn handshake_hash(&self, stream: StreamId) -> Option<TranscriptHash>;

    /// Register the pairing handler for `protocol` on the stream's multiplexer.
    ///
    /// Remote opens for unknown topics then surface as [`TransportEvent::Pair`].
    fn pair(&mut self, stream: StreamId, protocol: &'static str);

    /// Create a channel for `id` on the stream.
    ///
    /// Returns `None` if one already exists for that topic or the stream is gone.
    fn create_channel(
        &mut self,
        stream: StreamId,
        protocol: &'static str,
        id: &TopicId,
    ) -> Option<ChannelId>;

    /// Open a created channel, sending our handshake.
    fn open_channel(&mut self, channel: ChannelId, handshake: &Handshake);

    /// Send a message on a channel.
    fn send(&mut self, channel: ChannelId, message: &WireMessage);

    /// Close a channel.
    fn close_channel(&mut self, channel: ChannelId);
}
