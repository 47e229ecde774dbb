//! Per-topic protocol state.
//!
//! A `WakeupSession` tracks local interest in one topic and the peers that
//! opened a channel for it. Peers start in the pending list and move to the
//! confirmed list once their capability proof verifies. `active_peers` counts
//! confirmed peers whose last declared interest was active.

use crate::capability::{Capability, Role, TopicId};
use crate::gc::GcScheduler;
use crate::indexed_list::IndexedList;
use crate::peer::WakeupPeer;
use crate::protocol::{Announce, Handshake, Info, Lookup, WireMessage, PROTOCOL_NAME};
use crate::transport::{ChannelId, StreamId, Transport};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Application callbacks for one session. Every method defaults to a no-op.
///
/// Callbacks get the peer mutably so application fields (`clock`,
/// `user_data`) can be updated, plus a snapshot of the session.
#[allow(unused_variables)]
pub trait SessionHandlers: Send {
    /// A peer proved the capability.
    fn on_peer_add(&mut self, peer: &mut WakeupPeer, session: &SessionInfo) {}

    /// A confirmed peer declared interest.
    fn on_peer_active(&mut self, peer: &mut WakeupPeer, session: &SessionInfo) {}

    /// A confirmed peer dropped interest or went away while active.
    fn on_peer_inactive(&mut self, peer: &mut WakeupPeer, session: &SessionInfo) {}

    /// A confirmed peer's channel closed.
    fn on_peer_remove(&mut self, peer: &mut WakeupPeer, session: &SessionInfo) {}

    fn on_announce(&mut self, announce: &Announce, peer: &mut WakeupPeer, session: &SessionInfo) {}

    fn on_lookup(&mut self, lookup: &Lookup, peer: &mut WakeupPeer, session: &SessionInfo) {}
}

/// No handlers.
impl SessionHandlers for () {}

/// Options for [`crate::WakeupSwarm::session`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Local interest. Only `Some(false)` means inactive.
    pub active: Option<bool>,
    /// Explicit topic id instead of the capability's discovery key
    pub discovery_key: Option<TopicId>,
}

impl SessionOptions {
    pub fn active() -> Self {
        Self {
            active: Some(true),
            ..Self::default()
        }
    }

    pub fn inactive() -> Self {
        Self {
            active: Some(false),
            ..Self::default()
        }
    }

    pub fn with_discovery_key(mut self, id: TopicId) -> Self {
        self.discovery_key = Some(id);
        self
    }

    pub fn is_active(&self) -> bool {
        self.active != Some(false)
    }
}

/// Snapshot of a session handed to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: TopicId,
    pub is_active: bool,
    pub active_peers: usize,
    pub peers: usize,
    pub pending_peers: usize,
}

/// Swarm state a session needs while handling an operation.
pub(crate) struct SwarmCtx<'a, T> {
    pub(crate) transport: &'a mut T,
    pub(crate) gc: &'a mut GcScheduler,
    pub(crate) streams: &'a BTreeSet<StreamId>,
    pub(crate) routes: &'a mut HashMap<ChannelId, TopicId>,
}

/// Protocol state for one topic.
pub struct WakeupSession {
    id: TopicId,
    capability: Capability,
    is_active: bool,
    handlers: Option<Box<dyn SessionHandlers>>,
    /// Owns every live peer, keyed by channel
    slots: HashMap<ChannelId, WakeupPeer>,
    pending_peers: IndexedList<ChannelId>,
    peers: IndexedList<ChannelId>,
    peers_by_stream: HashMap<StreamId, ChannelId>,
    active_peers: usize,
    pub(crate) idle_ticks: u32,
    gcing: bool,
    destroyed: bool,
}

/// Remove the entry at `index`, fixing up the moved peer's stored index.
fn unlink(
    list: &mut IndexedList<ChannelId>,
    slots: &mut HashMap<ChannelId, WakeupPeer>,
    index: usize,
) -> Option<ChannelId> {
    list.remove_at(index, |moved, at| {
        if let Some(peer) = slots.get_mut(moved) {
            peer.index = at;
        }
    })
}

impl WakeupSession {
    pub(crate) fn new(
        id: TopicId,
        capability: Capability,
        active: bool,
        handlers: Box<dyn SessionHandlers>,
    ) -> Self {
        Self {
            id,
            capability,
            is_active: active,
            handlers: Some(handlers),
            slots: HashMap::new(),
            pending_peers: IndexedList::new(),
            peers: IndexedList::new(),
            peers_by_stream: HashMap::new(),
            active_peers: 0,
            idle_ticks: 0,
            gcing: false,
            destroyed: false,
        }
    }

    pub fn id(&self) -> &TopicId {
        &self.id
    }

    /// Local interest in the topic.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Confirmed peers currently declaring interest.
    pub fn active_peers(&self) -> usize {
        self.active_peers
    }

    /// Confirmed peers, in list order.
    pub fn peers(&self) -> impl Iterator<Item = &WakeupPeer> {
        self.peers.iter().filter_map(|ch| self.slots.get(ch))
    }

    /// Peers whose capability proof has not arrived yet, in list order.
    pub fn pending_peers(&self) -> impl Iterator<Item = &WakeupPeer> {
        self.pending_peers.iter().filter_map(|ch| self.slots.get(ch))
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_peers.len()
    }

    /// The peer on a connection, pending or confirmed.
    pub fn get_peer(&self, stream: StreamId) -> Option<&WakeupPeer> {
        self.peers_by_stream
            .get(&stream)
            .and_then(|ch| self.slots.get(ch))
    }

    pub(crate) fn get_peer_mut(&mut self, stream: StreamId) -> Option<&mut WakeupPeer> {
        let ch = self.peers_by_stream.get(&stream)?;
        self.slots.get_mut(ch)
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    /// Whether the session is in the swarm's GC set.
    pub fn is_gcing(&self) -> bool {
        self.gcing
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// No local interest and no active confirmed peer.
    pub fn is_gc_eligible(&self) -> bool {
        !self.is_active && self.active_peers == 0
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            is_active: self.is_active,
            active_peers: self.active_peers,
            peers: self.peers.len(),
            pending_peers: self.pending_peers.len(),
        }
    }

    /// Replace the handler set wholesale.
    pub(crate) fn set_handlers(&mut self, handlers: Box<dyn SessionHandlers>) {
        self.handlers = Some(handlers);
    }

    /// Keep GC membership equal to eligibility.
    pub(crate) fn check_gc(&mut self, gc: &mut GcScheduler) {
        if self.destroyed {
            return;
        }
        if self.is_gc_eligible() {
            if !self.gcing {
                self.gcing = true;
                gc.add(self.id);
            }
        } else if self.gcing {
            self.gcing = false;
            self.idle_ticks = 0;
            gc.remove(&self.id);
        }
    }

    pub(crate) fn activate<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>) {
        if self.is_active {
            return;
        }
        self.idle_ticks = 0;
        self.is_active = true;
        self.update_active(ctx, true);
    }

    pub(crate) fn deactivate<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>) {
        if !self.is_active {
            return;
        }
        self.is_active = false;
        self.update_active(ctx, false);
    }

    fn update_active<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>, active: bool) {
        let info = WireMessage::Info(Info { active });
        for ch in self.pending_peers.iter().chain(self.peers.iter()) {
            ctx.transport.send(*ch, &info);
        }

        self.check_gc(ctx.gc);

        if active {
            self.open_on_all(ctx);
        }
    }

    /// Drop local interest and detach the handlers. The session lingers until
    /// GC or an explicit teardown.
    pub(crate) fn destroy<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>) {
        self.deactivate(ctx);
        self.handlers = None;
    }

    /// Close every channel and leave the GC set. Returns false if already torn down.
    pub(crate) fn teardown<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;
        self.handlers = None;

        for i in (0..self.peers.len()).rev() {
            if let Some(&ch) = self.peers.get(i) {
                self.close_peer(ctx, ch);
            }
        }
        for i in (0..self.pending_peers.len()).rev() {
            if let Some(&ch) = self.pending_peers.get(i) {
                self.close_peer(ctx, ch);
            }
        }

        self.gcing = false;
        ctx.gc.remove(&self.id);
        debug!("Tore down session {:?}", self.id);
        true
    }

    /// Open this session's channel on every live connection lacking one.
    pub(crate) fn open_on_all<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>) {
        let streams: Vec<StreamId> = ctx.streams.iter().copied().collect();
        for stream in streams {
            self.open_on(ctx, stream);
        }
    }

    /// Open a channel on one connection, adding a pending peer.
    pub(crate) fn open_on<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>, stream: StreamId) {
        if self.destroyed || self.peers_by_stream.contains_key(&stream) {
            return;
        }
        let Some(transcript) = ctx.transport.handshake_hash(stream) else {
            debug!("Not opening {:?} on {}: handshake incomplete", self.id, stream);
            return;
        };
        let role = Role::from_initiator(ctx.transport.is_initiator(stream));
        let Some(channel) = ctx.transport.create_channel(stream, PROTOCOL_NAME, &self.id) else {
            return;
        };

        let mut peer = WakeupPeer::new(channel, stream);
        peer.index = self.pending_peers.push(channel);
        self.slots.insert(channel, peer);
        self.peers_by_stream.insert(stream, channel);
        ctx.routes.insert(channel, self.id);

        let handshake = Handshake::new(self.capability.prove(role, &transcript), self.is_active);
        ctx.transport.open_channel(channel, &handshake);
    }

    pub(crate) fn broadcast_lookup<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>, lookup: &Lookup) {
        let msg = WireMessage::Lookup(lookup.clone());
        for ch in self.pending_peers.iter().chain(self.peers.iter()) {
            ctx.transport.send(*ch, &msg);
        }
    }

    pub(crate) fn lookup_by_stream<T: Transport>(
        &mut self,
        ctx: &mut SwarmCtx<'_, T>,
        stream: StreamId,
        lookup: &Lookup,
    ) -> bool {
        match self.peers_by_stream.get(&stream) {
            Some(&ch) => self.lookup_peer(ctx, ch, lookup),
            None => false,
        }
    }

    pub(crate) fn lookup_peer<T: Transport>(
        &mut self,
        ctx: &mut SwarmCtx<'_, T>,
        channel: ChannelId,
        lookup: &Lookup,
    ) -> bool {
        if !self.slots.contains_key(&channel) {
            return false;
        }
        ctx.transport.send(channel, &WireMessage::Lookup(lookup.clone()));
        true
    }

    /// Announce to the confirmed peer on a connection. Pending peers are skipped.
    pub(crate) fn announce_by_stream<T: Transport>(
        &mut self,
        ctx: &mut SwarmCtx<'_, T>,
        stream: StreamId,
        announce: &Announce,
    ) -> bool {
        match self.peers_by_stream.get(&stream) {
            Some(&ch) => self.announce_peer(ctx, ch, announce),
            None => false,
        }
    }

    pub(crate) fn announce_peer<T: Transport>(
        &mut self,
        ctx: &mut SwarmCtx<'_, T>,
        channel: ChannelId,
        announce: &Announce,
    ) -> bool {
        match self.slots.get(&channel) {
            Some(peer) if !peer.pending => {
                ctx.transport.send(channel, &WireMessage::Announce(announce.clone()));
                true
            }
            Some(_) => {
                debug!("Not announcing to unconfirmed peer on {}", channel);
                false
            }
            None => false,
        }
    }

    /// Remote side opened the channel: verify its proof, then confirm the peer.
    pub(crate) fn on_channel_open<T: Transport>(
        &mut self,
        ctx: &mut SwarmCtx<'_, T>,
        channel: ChannelId,
        handshake: &Handshake,
    ) {
        let Some(peer) = self.slots.get(&channel) else {
            return;
        };
        if !peer.pending {
            debug!("Ignoring repeated open on {}", channel);
            return;
        }
        let stream = peer.stream();

        if handshake.should_warn_version() {
            warn!(
                "Peer on {} speaks wakeup version {} (ours: {})",
                stream,
                handshake.version,
                crate::protocol::PROTOCOL_VERSION
            );
        }

        let verified = match ctx.transport.handshake_hash(stream) {
            Some(transcript) => {
                let role = Role::from_initiator(ctx.transport.is_initiator(stream));
                self.capability.verify(role, &transcript, &handshake.capability)
            }
            None => false,
        };

        if !verified {
            warn!(
                "Capability proof mismatch for {:?} on {}, closing channel",
                self.id, stream
            );
            self.close_peer(ctx, channel);
            return;
        }

        let Some(index) = self.slots.get(&channel).map(|p| p.index) else {
            return;
        };
        unlink(&mut self.pending_peers, &mut self.slots, index);
        let index = self.peers.push(channel);

        let active = handshake.active;
        if let Some(peer) = self.slots.get_mut(&channel) {
            peer.index = index;
            peer.pending = false;
            peer.active = active;
        }

        if active {
            self.active_peers += 1;
            self.check_gc(ctx.gc);
        }

        debug!(
            "Confirmed peer on {} for {:?} (active: {})",
            stream, self.id, active
        );

        self.dispatch(channel, |h, peer, info| h.on_peer_add(peer, info));
        if active {
            self.dispatch(channel, |h, peer, info| h.on_peer_active(peer, info));
        }
    }

    pub(crate) fn on_channel_close<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>, channel: ChannelId) {
        self.remove_peer(ctx, channel);
    }

    pub(crate) fn on_message<T: Transport>(
        &mut self,
        ctx: &mut SwarmCtx<'_, T>,
        channel: ChannelId,
        message: WireMessage,
    ) {
        match self.slots.get(&channel) {
            Some(peer) if !peer.pending => {}
            Some(_) => {
                debug!("Dropping {} from unconfirmed peer on {}", message.kind(), channel);
                return;
            }
            None => return,
        }

        match message {
            WireMessage::Info(info) => self.on_info(ctx, channel, info),
            WireMessage::Lookup(lookup) => {
                self.dispatch(channel, |h, peer, info| h.on_lookup(&lookup, peer, info));
            }
            WireMessage::Announce(announce) => {
                self.dispatch(channel, |h, peer, info| h.on_announce(&announce, peer, info));
            }
        }
    }

    fn on_info<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>, channel: ChannelId, info: Info) {
        let Some(peer) = self.slots.get_mut(&channel) else {
            return;
        };
        if peer.active == info.active {
            return;
        }
        peer.active = info.active;

        if info.active {
            self.active_peers += 1;
            self.check_gc(ctx.gc);
            self.dispatch(channel, |h, peer, info| h.on_peer_active(peer, info));
        } else {
            self.active_peers -= 1;
            self.check_gc(ctx.gc);
            self.dispatch(channel, |h, peer, info| h.on_peer_inactive(peer, info));
        }
    }

    fn close_peer<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>, channel: ChannelId) {
        ctx.transport.close_channel(channel);
        self.remove_peer(ctx, channel);
    }

    /// Drop a peer for good. Only confirmed peers raise callbacks.
    fn remove_peer<T: Transport>(&mut self, ctx: &mut SwarmCtx<'_, T>, channel: ChannelId) {
        let Some(mut peer) = self.slots.remove(&channel) else {
            return;
        };
        peer.removed = true;
        ctx.routes.remove(&channel);
        if self.peers_by_stream.get(&peer.stream()) == Some(&channel) {
            self.peers_by_stream.remove(&peer.stream());
        }

        if peer.pending {
            unlink(&mut self.pending_peers, &mut self.slots, peer.index);
            return;
        }

        let was_active = peer.active;
        if was_active {
            peer.active = false;
            self.active_peers -= 1;
            self.check_gc(ctx.gc);
        }

        unlink(&mut self.peers, &mut self.slots, peer.index);
        debug!("Removed peer on {} for {:?}", peer.stream(), self.id);

        let info = self.info();
        if let Some(handlers) = self.handlers.as_deref_mut() {
            if was_active {
                handlers.on_peer_inactive(&mut peer, &info);
            }
            handlers.on_peer_remove(&mut peer, &info);
        }
    }

    /// Invoke a handler for a live peer, if both exist.
    fn dispatch(
        &mut self,
        channel: ChannelId,
        f: impl FnOnce(&mut (dyn SessionHandlers + 'static), &mut WakeupPeer, &SessionInfo),
    ) {
        let info = self.info();
        if let (Some(handlers), Some(peer)) =
            (self.handlers.as_deref_mut(), self.slots.get_mut(&channel))
        {
            f(handlers, peer, &info);
        }
    }
}

impl std::fmt::Debug for WakeupSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeupSession")
            .field("id", &self.id)
            .field("is_active", &self.is_active)
            .field("peers", &self.peers.len())
            .field("pending_peers", &self.pending_peers.len())
            .field("active_peers", &self.active_peers)
            .field("idle_ticks", &self.idle_ticks)
            .field("gcing", &self.gcing)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
