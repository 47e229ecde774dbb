//! Process-wide registry of wakeup sessions.
//!
//! The swarm maps topic ids to sessions, tracks live connections, routes
//! transport events to the owning session and runs the idle GC scheduler.
//! All mutation goes through `&mut self`; callers on a multi-threaded runtime
//! wrap the swarm in one mutex.

use crate::capability::{Capability, TopicId};
use crate::gc::{GcScheduler, GcTimer};
use crate::protocol::{Announce, Lookup, PROTOCOL_NAME};
use crate::session::{SessionHandlers, SessionOptions, SwarmCtx, WakeupSession};
use crate::transport::{ChannelId, StreamId, Transport, TransportEvent};
use crate::peer::WakeupPeer;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Deref;
use std::time::Duration;
use tracing::{debug, info, warn};

/// GC tuning.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Period between GC ticks
    pub gc_interval: Duration,
    /// Consecutive eligible ticks before a session is torn down
    pub gc_idle_ticks: u32,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_secs(2),
            gc_idle_ticks: 5,
        }
    }
}

/// What the application hands back to adopt an unknown topic.
pub struct Adoption {
    pub capability: Capability,
    pub options: SessionOptions,
    pub handlers: Box<dyn SessionHandlers>,
}

impl Adoption {
    pub fn new(capability: Capability, handlers: impl SessionHandlers + 'static) -> Self {
        Self {
            capability,
            options: SessionOptions::default(),
            handlers: Box::new(handlers),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Called when a remote opens a channel for a topic with no local session.
pub trait WakeupHandler: Send {
    fn on_wakeup(&mut self, id: &TopicId, stream: StreamId) -> Option<Adoption>;
}

impl<F> WakeupHandler for F
where
    F: FnMut(&TopicId, StreamId) -> Option<Adoption> + Send,
{
    fn on_wakeup(&mut self, id: &TopicId, stream: StreamId) -> Option<Adoption> {
        self(id, stream)
    }
}

pub struct WakeupSwarm<T: Transport> {
    transport: T,
    config: SwarmConfig,
    sessions: HashMap<TopicId, WakeupSession>,
    /// Connected streams with a pairing handler registered
    streams: BTreeSet<StreamId>,
    /// Streams added before their handshake completed
    awaiting_open: HashSet<StreamId>,
    /// Channel -> owning session
    routes: HashMap<ChannelId, TopicId>,
    gc: GcScheduler,
    on_wakeup: Box<dyn WakeupHandler>,
}

impl<T: Transport> WakeupSwarm<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SwarmConfig::default())
    }

    pub fn with_config(transport: T, config: SwarmConfig) -> Self {
        let gc = GcScheduler::new(config.gc_interval, config.gc_idle_ticks, Box::new(()));
        Self {
            transport,
            config,
            sessions: HashMap::new(),
            streams: BTreeSet::new(),
            awaiting_open: HashSet::new(),
            routes: HashMap::new(),
            gc,
            on_wakeup: Box::new(|_: &TopicId, _: StreamId| -> Option<Adoption> { None }),
        }
    }

    /// Drive GC ticks from `timer` instead of manual [`Self::gc_tick`] calls.
    pub fn with_timer(mut self, timer: impl GcTimer + 'static) -> Self {
        self.gc.set_timer(Box::new(timer));
        self
    }

    /// Handler for inbound channels on unknown topics.
    pub fn on_wakeup(mut self, handler: impl WakeupHandler + 'static) -> Self {
        self.on_wakeup = Box::new(handler);
        self
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Join a topic, or refresh an existing session.
    ///
    /// An existing session gets `handlers` in place of its current set and is
    /// activated unless the options say inactive.
    pub fn session(
        &mut self,
        capability: Capability,
        options: SessionOptions,
        handlers: impl SessionHandlers + 'static,
    ) -> SessionMut<'_, T> {
        let id = self.open_session(capability, options, Box::new(handlers));
        SessionMut { swarm: self, id }
    }

    fn open_session(
        &mut self,
        capability: Capability,
        options: SessionOptions,
        handlers: Box<dyn SessionHandlers>,
    ) -> TopicId {
        let id = options
            .discovery_key
            .unwrap_or_else(|| capability.discovery_key());
        let active = options.is_active();

        if self.sessions.contains_key(&id) {
            self.with_session(&id, |session, ctx| {
                session.set_handlers(handlers);
                if active {
                    session.activate(ctx);
                }
            });
            return id;
        }

        debug!("Creating session {:?} (active: {})", id, active);
        self.sessions
            .insert(id, WakeupSession::new(id, capability, active, handlers));
        self.with_session(&id, |session, ctx| {
            session.open_on_all(ctx);
            session.check_gc(ctx.gc);
        });
        id
    }

    pub fn get_session(&self, id: &TopicId) -> Option<&WakeupSession> {
        self.sessions.get(id)
    }

    pub fn session_mut(&mut self, id: &TopicId) -> Option<SessionMut<'_, T>> {
        if !self.sessions.contains_key(id) {
            return None;
        }
        Some(SessionMut {
            swarm: self,
            id: *id,
        })
    }

    pub fn sessions(&self) -> impl Iterator<Item = &WakeupSession> {
        self.sessions.values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Live connections.
    pub fn streams(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.streams.iter().copied()
    }

    /// Register a connection.
    ///
    /// If its handshake is still running, the stream is parked until
    /// [`TransportEvent::StreamOpen`]. Calling again for a known stream is a
    /// no-op. Only active sessions open channels eagerly.
    pub fn add_stream(&mut self, stream: StreamId) {
        if self.streams.contains(&stream) {
            return;
        }
        if !self.transport.is_connected(stream) {
            if self.awaiting_open.insert(stream) {
                debug!("Deferring {} until its handshake completes", stream);
            }
            return;
        }

        self.awaiting_open.remove(&stream);
        self.streams.insert(stream);
        self.transport.pair(stream, PROTOCOL_NAME);
        debug!("Added {}", stream);

        let mut active: Vec<TopicId> = self
            .sessions
            .values()
            .filter(|s| s.is_active())
            .map(|s| *s.id())
            .collect();
        active.sort();
        for id in active {
            self.with_session(&id, |session, ctx| session.open_on(ctx, stream));
        }
    }

    /// Feed one inbound transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StreamOpen(stream) => {
                if self.awaiting_open.remove(&stream) {
                    self.add_stream(stream);
                }
            }
            TransportEvent::StreamClose(stream) => {
                self.awaiting_open.remove(&stream);
                if self.streams.remove(&stream) {
                    debug!("Removed {}", stream);
                }
            }
            TransportEvent::Pair { stream, id } => self.on_pair(stream, id),
            TransportEvent::ChannelOpen { channel, handshake } => {
                self.with_channel(channel, |session, ctx| {
                    session.on_channel_open(ctx, channel, &handshake)
                });
            }
            TransportEvent::ChannelMessage { channel, message } => {
                self.with_channel(channel, |session, ctx| {
                    session.on_message(ctx, channel, message)
                });
            }
            TransportEvent::ChannelClose { channel } => {
                self.with_channel(channel, |session, ctx| {
                    session.on_channel_close(ctx, channel)
                });
            }
        }
    }

    fn on_pair(&mut self, stream: StreamId, id: TopicId) {
        if !self.streams.contains(&stream) {
            return;
        }
        if !self.sessions.contains_key(&id) {
            let Some(mut adoption) = self.on_wakeup.on_wakeup(&id, stream) else {
                debug!("No session for {:?} on {}", id, stream);
                return;
            };
            // An adopted session always lives under the announced topic.
            if adoption.options.discovery_key.is_none()
                && adoption.capability.discovery_key() != id
            {
                warn!("Adopted capability for {:?} derives a different topic", id);
            }
            adoption.options.discovery_key.get_or_insert(id);
            self.open_session(adoption.capability, adoption.options, adoption.handlers);
        }
        self.with_session(&id, |session, ctx| session.open_on(ctx, stream));
    }

    /// Advance the GC by one tick, tearing down sessions idle long enough.
    ///
    /// Returns how many sessions were reclaimed.
    pub fn gc_tick(&mut self) -> usize {
        let expired = self.gc.tick(&mut self.sessions);
        for id in &expired {
            info!("Reclaiming idle session {:?}", id);
            self.teardown_session(id);
        }
        expired.len()
    }

    /// Whether the GC timer is currently started.
    pub fn is_gc_running(&self) -> bool {
        self.gc.is_running()
    }

    /// Sessions currently in the GC set.
    pub fn gc_pending(&self) -> usize {
        self.gc.len()
    }

    pub fn is_gc_pending(&self, id: &TopicId) -> bool {
        self.gc.contains(id)
    }

    /// Stop the GC timer and tear down every session.
    pub fn destroy(&mut self) {
        self.gc.shutdown();
        let mut ids: Vec<TopicId> = self.sessions.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.teardown_session(&id);
        }
    }

    fn with_session<R>(
        &mut self,
        id: &TopicId,
        f: impl FnOnce(&mut WakeupSession, &mut SwarmCtx<'_, T>) -> R,
    ) -> Option<R> {
        let session = self.sessions.get_mut(id)?;
        let mut ctx = SwarmCtx {
            transport: &mut self.transport,
            gc: &mut self.gc,
            streams: &self.streams,
            routes: &mut self.routes,
        };
        Some(f(session, &mut ctx))
    }

    /// Route a channel event. Channels of torn-down sessions are dropped.
    fn with_channel(
        &mut self,
        channel: ChannelId,
        f: impl FnOnce(&mut WakeupSession, &mut SwarmCtx<'_, T>),
    ) {
        let Some(id) = self.routes.get(&channel).copied() else {
            debug!("Dropping event for unknown {}", channel);
            return;
        };
        self.with_session(&id, f);
    }

    fn teardown_session(&mut self, id: &TopicId) -> bool {
        let torn = self
            .with_session(id, |session, ctx| session.teardown(ctx))
            .unwrap_or(false);
        self.sessions.remove(id);
        torn
    }
}

/// Mutable access to one session of a swarm.
///
/// Dereferences to the session's read-only state.
pub struct SessionMut<'a, T: Transport> {
    swarm: &'a mut WakeupSwarm<T>,
    id: TopicId,
}

impl<T: Transport> Deref for SessionMut<'_, T> {
    type Target = WakeupSession;

    fn deref(&self) -> &WakeupSession {
        // Handles are only built for registered ids and borrow the swarm
        // mutably, and `destroy`/`teardown` consume them before removal.
        self.swarm
            .sessions
            .get(&self.id)
            .expect("session handle outlived its session")
    }
}

impl<T: Transport> SessionMut<'_, T> {
    fn with<R>(&mut self, f: impl FnOnce(&mut WakeupSession, &mut SwarmCtx<'_, T>) -> R) -> Option<R> {
        let id = self.id;
        self.swarm.with_session(&id, f)
    }

    /// Declare interest. Opens the channel on every live connection lacking one.
    pub fn active(&mut self) {
        self.with(|session, ctx| session.activate(ctx));
    }

    /// Drop interest. The session becomes GC-eligible once no peer is active.
    pub fn inactive(&mut self) {
        self.with(|session, ctx| session.deactivate(ctx));
    }

    /// Drop interest and handlers. With `force` the session is torn down now
    /// instead of waiting for GC.
    pub fn destroy(mut self, force: bool) {
        self.with(|session, ctx| session.destroy(ctx));
        if force {
            self.teardown();
        }
    }

    /// Close every channel and remove the session from the swarm.
    pub fn teardown(self) {
        let id = self.id;
        self.swarm.teardown_session(&id);
    }

    /// Open the channel on one live connection regardless of interest.
    pub fn open_stream(&mut self, stream: StreamId) {
        if !self.swarm.streams.contains(&stream) {
            return;
        }
        self.with(|session, ctx| session.open_on(ctx, stream));
    }

    /// Send a lookup to every pending and confirmed peer.
    pub fn broadcast_lookup(&mut self, lookup: Option<Lookup>) {
        let lookup = lookup.unwrap_or_default();
        self.with(|session, ctx| session.broadcast_lookup(ctx, &lookup));
    }

    /// Returns false when no peer exists on the connection.
    pub fn lookup_by_stream(&mut self, stream: StreamId, lookup: Option<Lookup>) -> bool {
        let lookup = lookup.unwrap_or_default();
        self.with(|session, ctx| session.lookup_by_stream(ctx, stream, &lookup))
            .unwrap_or(false)
    }

    /// Returns false unless a confirmed peer exists on the connection.
    pub fn announce_by_stream(&mut self, stream: StreamId, announce: Announce) -> bool {
        self.with(|session, ctx| session.announce_by_stream(ctx, stream, &announce))
            .unwrap_or(false)
    }

    pub fn lookup_peer(&mut self, channel: ChannelId, lookup: Option<Lookup>) -> bool {
        let lookup = lookup.unwrap_or_default();
        self.with(|session, ctx| session.lookup_peer(ctx, channel, &lookup))
            .unwrap_or(false)
    }

    pub fn announce_peer(&mut self, channel: ChannelId, announce: Announce) -> bool {
        self.with(|session, ctx| session.announce_peer(ctx, channel, &announce))
            .unwrap_or(false)
    }

    /// The peer on a connection, for updating application fields.
    pub fn get_peer_mut(&mut self, stream: StreamId) -> Option<&mut WakeupPeer> {
        self.swarm.sessions.get_mut(&self.id)?.get_peer_mut(stream)
    }
}
