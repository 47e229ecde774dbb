//! Channel messages exchanged after the handshake.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum encoded payload size (1MB). Larger frames are rejected on decode.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Failed to encode message: {0}")]
    Encode(bincode::Error),
    #[error("Failed to decode message: {0}")]
    Decode(bincode::Error),
    #[error("Message too large: {0} > {MAX_MESSAGE_SIZE} bytes")]
    TooLarge(usize),
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let data = bincode::serialize(value).map_err(ProtocolError::Encode)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }
    Ok(data)
}

pub(crate) fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }
    bincode::deserialize(data).map_err(ProtocolError::Decode)
}

/// Ask a peer for something. The hash is opaque to this layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lookup {
    /// `None` means "anything new"
    pub hash: Option<[u8; 32]>,
}

impl Lookup {
    pub fn new(hash: [u8; 32]) -> Self {
        Self { hash: Some(hash) }
    }

    /// Lookup for anything new.
    pub fn any() -> Self {
        Self { hash: None }
    }
}

/// Application-defined "something changed" notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    pub payload: Vec<u8>,
}

impl Announce {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// The sender's current interest in the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub active: bool,
}

/// Messages sent on an open wakeup channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    Lookup(Lookup),
    Announce(Announce),
    Info(Info),
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(data)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lookup(_) => "lookup",
            Self::Announce(_) => "announce",
            Self::Info(_) => "info",
        }
    }
}

impl From<Lookup> for WireMessage {
    fn from(msg: Lookup) -> Self {
        Self::Lookup(msg)
    }
}

impl From<Announce> for WireMessage {
    fn from(msg: Announce) -> Self {
        Self::Announce(msg)
    }
}

impl From<Info> for WireMessage {
    fn from(msg: Info) -> Self {
        Self::Info(msg)
    }
}
