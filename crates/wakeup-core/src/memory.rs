//! In-process transport.
//!
//! Each `MemoryTransport` is one node. Connections are pairs of linked stream
//! ids, one per side; frames travel through the remote side's inbox and are
//! turned into [`TransportEvent`]s by [`MemoryTransport::poll_event`].
//!
//! Channels pair by topic id the way a protocol multiplexer does: a remote
//! open for a topic with no local channel raises [`TransportEvent::Pair`], and
//! the channel counts as open once both sides have opened it.

use crate::capability::{TopicId, TranscriptHash};
use crate::protocol::{Handshake, WireMessage};
use crate::swarm::WakeupSwarm;
use crate::transport::{ChannelId, StreamId, Transport, TransportEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

type Inbox = Arc<Mutex<VecDeque<Frame>>>;

#[derive(Debug)]
struct Frame {
    /// Receiver-side stream id
    stream: StreamId,
    kind: FrameKind,
}

#[derive(Debug)]
enum FrameKind {
    Open { id: TopicId, handshake: Vec<u8> },
    Message { id: TopicId, payload: Vec<u8> },
    Close { id: TopicId },
    Disconnect,
}

struct Link {
    remote: Weak<Mutex<VecDeque<Frame>>>,
    remote_stream: StreamId,
    initiator: bool,
    transcript: Option<TranscriptHash>,
}

struct Channel {
    stream: StreamId,
    id: TopicId,
    local_open: bool,
    remote_open: bool,
}

#[derive(Default)]
pub struct MemoryTransport {
    inbox: Inbox,
    links: HashMap<StreamId, Link>,
    channels: HashMap<ChannelId, Channel>,
    by_topic: HashMap<(StreamId, TopicId), ChannelId>,
    /// Remote opens waiting for a local open
    remote_opens: HashMap<(StreamId, TopicId), Handshake>,
    paired: HashSet<StreamId>,
    events: VecDeque<TransportEvent>,
    next_channel: u64,
}

fn random_transcript() -> TranscriptHash {
    use rand::Rng;
    TranscriptHash::from_bytes(rand::rng().random())
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect two nodes with a completed handshake. `a` is the initiator.
    ///
    /// Returns the stream id on each side.
    pub fn connect(a: &mut Self, b: &mut Self) -> (StreamId, StreamId) {
        let transcript = random_transcript();
        Self::connect_with_transcripts(a, b, transcript, transcript)
    }

    /// Connect two nodes whose handshake has not finished yet.
    pub fn connect_pending(a: &mut Self, b: &mut Self) -> (StreamId, StreamId) {
        Self::link(a, b, None, None)
    }

    /// Connect two nodes that disagree on the transcript hash, as a
    /// man-in-the-middle would make them.
    pub fn connect_with_transcripts(
        a: &mut Self,
        b: &mut Self,
        a_transcript: TranscriptHash,
        b_transcript: TranscriptHash,
    ) -> (StreamId, StreamId) {
        Self::link(a, b, Some(a_transcript), Some(b_transcript))
    }

    fn link(
        a: &mut Self,
        b: &mut Self,
        a_transcript: Option<TranscriptHash>,
        b_transcript: Option<TranscriptHash>,
    ) -> (StreamId, StreamId) {
        let (sa, sb) = (StreamId::next(), StreamId::next());
        a.links.insert(
            sa,
            Link {
                remote: Arc::downgrade(&b.inbox),
                remote_stream: sb,
                initiator: true,
                transcript: a_transcript,
            },
        );
        b.links.insert(
            sb,
            Link {
                remote: Arc::downgrade(&a.inbox),
                remote_stream: sa,
                initiator: false,
                transcript: b_transcript,
            },
        );
        (sa, sb)
    }

    /// Finish the handshake of a pending connection on both sides.
    pub fn complete_handshake(a: &mut Self, sa: StreamId, b: &mut Self, sb: StreamId) {
        let transcript = random_transcript();
        for (node, stream) in [(a, sa), (b, sb)] {
            if let Some(link) = node.links.get_mut(&stream) {
                link.transcript = Some(transcript);
                node.events.push_back(TransportEvent::StreamOpen(stream));
            }
        }
    }

    /// Drop a connection. Both sides see every channel close, then the stream.
    pub fn disconnect(&mut self, stream: StreamId) {
        self.deliver(stream, FrameKind::Disconnect);
        self.drop_stream(stream);
    }

    /// Next inbound event, if any.
    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            let frame = self
                .inbox
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()?;
            self.on_frame(frame);
        }
    }

    /// Whether a channel is open on both sides.
    pub fn is_channel_open(&self, channel: ChannelId) -> bool {
        self.channels
            .get(&channel)
            .is_some_and(|c| c.local_open && c.remote_open)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_paired(&self, stream: StreamId) -> bool {
        self.paired.contains(&stream)
    }

    fn deliver(&self, stream: StreamId, kind: FrameKind) {
        let Some(link) = self.links.get(&stream) else {
            return;
        };
        if let Some(inbox) = link.remote.upgrade() {
            inbox
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(Frame {
                    stream: link.remote_stream,
                    kind,
                });
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        let stream = frame.stream;
        if !self.links.contains_key(&stream) {
            return;
        }
        match frame.kind {
            FrameKind::Open { id, handshake } => self.on_remote_open(stream, id, &handshake),
            FrameKind::Message { id, payload } => {
                let Some(&channel) = self.by_topic.get(&(stream, id)) else {
                    return;
                };
                if !self.is_channel_open(channel) {
                    debug!("Dropping message on half-open {}", channel);
                    return;
                }
                match WireMessage::decode(&payload) {
                    Ok(message) => self
                        .events
                        .push_back(TransportEvent::ChannelMessage { channel, message }),
                    Err(e) => {
                        warn!("Undecodable message on {}: {}", channel, e);
                        self.close_channel(channel);
                    }
                }
            }
            FrameKind::Close { id } => {
                self.remote_opens.remove(&(stream, id));
                if let Some(channel) = self.by_topic.get(&(stream, id)).copied() {
                    self.forget_channel(channel);
                }
            }
            FrameKind::Disconnect => self.drop_stream(stream),
        }
    }

    fn on_remote_open(&mut self, stream: StreamId, id: TopicId, bytes: &[u8]) {
        let handshake = match Handshake::decode(bytes) {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!("Undecodable handshake on {}: {}", stream, e);
                self.deliver(stream, FrameKind::Close { id });
                return;
            }
        };

        match self.by_topic.get(&(stream, id)).copied() {
            Some(channel) => {
                let Some(state) = self.channels.get_mut(&channel) else {
                    return;
                };
                if state.local_open {
                    state.remote_open = true;
                    self.events
                        .push_back(TransportEvent::ChannelOpen { channel, handshake });
                } else {
                    self.remote_opens.insert((stream, id), handshake);
                }
            }
            None if self.paired.contains(&stream) => {
                self.remote_opens.insert((stream, id), handshake);
                self.events.push_back(TransportEvent::Pair { stream, id });
            }
            None => {
                debug!("No pairing handler on {}, rejecting channel", stream);
                self.deliver(stream, FrameKind::Close { id });
            }
        }
    }

    /// Remove a channel locally and report it closed.
    fn forget_channel(&mut self, channel: ChannelId) {
        if let Some(state) = self.channels.remove(&channel) {
            self.by_topic.remove(&(state.stream, state.id));
            self.remote_opens.remove(&(state.stream, state.id));
            self.events.push_back(TransportEvent::ChannelClose { channel });
        }
    }

    fn drop_stream(&mut self, stream: StreamId) {
        if self.links.remove(&stream).is_none() {
            return;
        }
        let mut closing: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|(_, c)| c.stream == stream)
            .map(|(ch, _)| *ch)
            .collect();
        closing.sort();
        for channel in closing {
            self.forget_channel(channel);
        }
        self.remote_opens.retain(|(s, _), _| *s != stream);
        self.paired.remove(&stream);
        self.events.push_back(TransportEvent::StreamClose(stream));
    }
}

impl Transport for MemoryTransport {
    fn is_connected(&self, stream: StreamId) -> bool {
        self.links
            .get(&stream)
            .is_some_and(|l| l.transcript.is_some())
    }

    fn is_initiator(&self, stream: StreamId) -> bool {
        self.links.get(&stream).is_some_and(|l| l.initiator)
    }

    fn handshake_hash(&self, stream: StreamId) -> Option<TranscriptHash> {
        self.links.get(&stream)?.transcript
    }

    fn pair(&mut self, stream: StreamId, _protocol: &'static str) {
        if self.links.contains_key(&stream) {
            self.paired.insert(stream);
        }
    }

    fn create_channel(
        &mut self,
        stream: StreamId,
        _protocol: &'static str,
        id: &TopicId,
    ) -> Option<ChannelId> {
        if !self.links.contains_key(&stream) || self.by_topic.contains_key(&(stream, *id)) {
            return None;
        }
        self.next_channel += 1;
        let channel = ChannelId(self.next_channel);
        self.channels.insert(
            channel,
            Channel {
                stream,
                id: *id,
                local_open: false,
                remote_open: false,
            },
        );
        self.by_topic.insert((stream, *id), channel);
        Some(channel)
    }

    fn open_channel(&mut self, channel: ChannelId, handshake: &Handshake) {
        let Some(state) = self.channels.get_mut(&channel) else {
            return;
        };
        if state.local_open {
            return;
        }
        let bytes = match handshake.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode handshake for {}: {}", channel, e);
                return;
            }
        };
        state.local_open = true;
        let (stream, id) = (state.stream, state.id);

        if let Some(remote) = self.remote_opens.remove(&(stream, id)) {
            state.remote_open = true;
            self.events.push_back(TransportEvent::ChannelOpen {
                channel,
                handshake: remote,
            });
        }
        self.deliver(
            stream,
            FrameKind::Open {
                id,
                handshake: bytes,
            },
        );
    }

    fn send(&mut self, channel: ChannelId, message: &WireMessage) {
        let Some(state) = self.channels.get(&channel) else {
            return;
        };
        if !state.local_open {
            return;
        }
        match message.encode() {
            Ok(payload) => self.deliver(
                state.stream,
                FrameKind::Message {
                    id: state.id,
                    payload,
                },
            ),
            Err(e) => warn!("Failed to encode {} for {}: {}", message.kind(), channel, e),
        }
    }

    fn close_channel(&mut self, channel: ChannelId) {
        if let Some(state) = self.channels.get(&channel) {
            self.deliver(state.stream, FrameKind::Close { id: state.id });
        }
        self.forget_channel(channel);
    }
}

impl WakeupSwarm<MemoryTransport> {
    /// Feed every queued transport event into the swarm.
    ///
    /// Returns the number of events handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.transport_mut().poll_event() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }
}
