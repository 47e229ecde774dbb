//! Versioned channel-open payload.
//!
//! Sent by both sides when a wakeup channel opens. It carries:
//! - Protocol version for forward compatibility
//! - Capability proof for this connection and the sender's role
//! - Whether the sender is currently interested in the topic

use super::messages::{decode, encode, ProtocolError};
use crate::capability::CapabilityProof;
use serde::{Deserialize, Serialize};

/// Current protocol version.
///
/// Increment when making breaking changes to the protocol.
pub const PROTOCOL_VERSION: u32 = 0;

/// Channel-open payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Protocol version
    pub version: u32,
    /// Proof that the sender holds the topic capability
    pub capability: CapabilityProof,
    /// Sender's interest in the topic at open time
    pub active: bool,
}

impl Handshake {
    /// Create a handshake at the current protocol version.
    pub fn new(capability: CapabilityProof, active: bool) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            capability,
            active,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(data)
    }

    /// Check if we should log a version mismatch warning.
    pub fn should_warn_version(&self) -> bool {
        self.version != PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::KEY_LEN;

    fn proof() -> CapabilityProof {
        CapabilityProof::from_bytes([0x5a; KEY_LEN])
    }

    #[test]
    fn test_new_uses_current_version() {
        let hs = Handshake::new(proof(), true);
        assert_eq!(hs.version, PROTOCOL_VERSION);
        assert_eq!(hs.capability, proof());
        assert!(hs.active);
    }

    #[test]
    fn test_roundtrip() {
        let hs = Handshake::new(proof(), false);
        let parsed = Handshake::decode(&hs.encode().unwrap()).unwrap();
        assert_eq!(hs, parsed);
    }

    #[test]
    fn test_wire_layout() {
        // version (u32 LE) | 32-byte proof | active (u8)
        let bytes = Handshake::new(proof(), true).encode().unwrap();
        assert_eq!(bytes.len(), 4 + KEY_LEN + 1);
        assert_eq!(&bytes[..4], &[0, 0, 0, 0]);
        assert_eq!(&bytes[4..4 + KEY_LEN], &[0x5a; KEY_LEN]);
        assert_eq!(bytes[4 + KEY_LEN], 1);
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = Handshake::new(proof(), true).encode().unwrap();
        assert!(Handshake::decode(&bytes[..10]).is_err());
        assert!(Handshake::decode(&[]).is_err());
    }

    #[test]
    fn test_different_version_decodes_and_warns() {
        let mut hs = Handshake::new(proof(), true);
        hs.version = 7;
        let parsed = Handshake::decode(&hs.encode().unwrap()).unwrap();

        assert_eq!(parsed.version, 7);
        assert!(parsed.should_warn_version());
        assert!(!Handshake::new(proof(), true).should_warn_version());
    }
}
