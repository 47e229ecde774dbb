//! wakeup-core: topic wake-up and discovery over multiplexed secure connections.
//!
//! This crate provides:
//! - Capability proofs binding a shared secret to one connection and role
//! - Per-topic sessions tracking pending and confirmed peers
//! - A swarm registry routing transport events and reclaiming idle sessions
//! - The `Transport` trait abstraction plus an in-memory implementation

pub mod capability;
pub mod gc;
pub mod indexed_list;
pub mod memory;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod swarm;
pub mod transport;

pub use capability::{Capability, CapabilityProof, KeyError, Role, TopicId, TranscriptHash};
pub use gc::GcTimer;
pub use indexed_list::IndexedList;
pub use memory::MemoryTransport;
pub use peer::WakeupPeer;
pub use protocol::{Announce, Handshake, Info, Lookup, ProtocolError, WireMessage};
pub use session::{SessionHandlers, SessionInfo, SessionOptions, WakeupSession};
pub use swarm::{Adoption, SessionMut, SwarmConfig, WakeupHandler, WakeupSwarm};
pub use transport::{ChannelId, StreamId, Transport, TransportEvent};
