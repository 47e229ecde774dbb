//! One (session, connection) slot.

use crate::transport::{ChannelId, StreamId};
use std::any::Any;
use std::fmt;

/// A remote peer on one connection for one topic.
///
/// Starts pending. Becomes confirmed once its capability proof verifies.
/// Removed is terminal: a removed peer never re-enters either peer list and is
/// never sent anything again.
pub struct WakeupPeer {
    pub(crate) index: usize,
    pub(crate) pending: bool,
    pub(crate) active: bool,
    pub(crate) removed: bool,
    channel: ChannelId,
    stream: StreamId,
    /// Application-maintained counter, e.g. last seen version
    pub clock: u64,
    /// Application-owned data
    pub user_data: Option<Box<dyn Any + Send>>,
}

impl WakeupPeer {
    pub(crate) fn new(channel: ChannelId, stream: StreamId) -> Self {
        Self {
            index: 0,
            pending: true,
            active: false,
            removed: false,
            channel,
            stream,
            clock: 0,
            user_data: None,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// True until the capability proof has been verified.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// The remote's last declared interest in the topic.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Position in the session's pending or confirmed list.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for WakeupPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeupPeer")
            .field("channel", &self.channel)
            .field("stream", &self.stream)
            .field("index", &self.index)
            .field("pending", &self.pending)
            .field("active", &self.active)
            .field("removed", &self.removed)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
