//! Capabilities, topic ids and capability proofs.
//!
//! A `Capability` is the 32-byte shared secret for one topic. It is never put
//! on the wire. Peers instead exchange a `CapabilityProof`:
//!
//! ```text
//! proof = SHA-256(role_namespace || capability || transcript_hash)
//! ```
//!
//! The transcript hash is produced by the transport's handshake and is unique
//! per connection, so a proof is only valid for one connection and one role.
//! The public routing id (`TopicId`) is a domain-separated hash of the
//! capability.

use sha2::{Digest, Sha256};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::LazyLock;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Length of every key, hash and proof in the protocol.
pub const KEY_LEN: usize = 32;

/// Namespace shared by every derivation in this protocol.
const NAMESPACE: &str = "wakeup";

const NS_INITIATOR: usize = 0;
const NS_RESPONDER: usize = 1;
const NS_DISCOVERY: usize = 2;

/// Role namespaces, derived once per process.
static NAMESPACES: LazyLock<[[u8; KEY_LEN]; 3]> = LazyLock::new(|| namespace(NAMESPACE));

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Derive `N` domain-separated 32-byte constants from a namespace name.
///
/// `ns = H(name)`, then `ids[i] = H(ns || i)`.
fn namespace<const N: usize>(name: &str) -> [[u8; KEY_LEN]; N] {
    let base: [u8; KEY_LEN] = Sha256::digest(name.as_bytes()).into();
    std::array::from_fn(|i| {
        let mut hasher = Sha256::new();
        hasher.update(base);
        hasher.update([i as u8]);
        hasher.finalize().into()
    })
}

fn parse_hex(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    if s.len() != KEY_LEN * 2 {
        return Err(KeyError::InvalidLength(s.len() / 2));
    }
    let mut out = [0u8; KEY_LEN];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

fn from_slice(bytes: &[u8]) -> Result<[u8; KEY_LEN], KeyError> {
    bytes
        .try_into()
        .map_err(|_| KeyError::InvalidLength(bytes.len()))
}

/// Implements the hex text form and byte accessors shared by the 32-byte types.
macro_rules! key_type {
    ($name:ident) => {
        impl $name {
            pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
                from_slice(bytes).map(Self)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = KeyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex(s).map(Self)
            }
        }

        impl From<[u8; KEY_LEN]> for $name {
            fn from(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }
        }
    };
}

/// Hex for human-readable formats, raw bytes for binary ones (the wire).
macro_rules! key_serde {
    ($name:ident) => {
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                if s.is_human_readable() {
                    s.serialize_str(&hex::encode(self.0))
                } else {
                    serde::Serialize::serialize(&self.0, s)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                if d.is_human_readable() {
                    let s = <String as serde::Deserialize>::deserialize(d)?;
                    s.parse().map_err(serde::de::Error::custom)
                } else {
                    <[u8; KEY_LEN] as serde::Deserialize>::deserialize(d).map(Self)
                }
            }
        }
    };
}

/// Which side of the connection we are. Decides the proof namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn from_initiator(is_initiator: bool) -> Self {
        if is_initiator {
            Self::Initiator
        } else {
            Self::Responder
        }
    }

    /// The role the remote side holds on the same connection.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }

    fn namespace(self) -> &'static [u8; KEY_LEN] {
        match self {
            Self::Initiator => &NAMESPACES[NS_INITIATOR],
            Self::Responder => &NAMESPACES[NS_RESPONDER],
        }
    }
}

/// Shared secret for one topic. Never transmitted.
#[derive(Clone, PartialEq, Eq)]
pub struct Capability([u8; KEY_LEN]);

key_type!(Capability);

impl Capability {
    /// Generate a fresh random capability.
    pub fn generate() -> Self {
        use rand::Rng;
        Self(rand::rng().random())
    }

    /// Public routing id for this capability.
    pub fn discovery_key(&self) -> TopicId {
        let mut hasher = Sha256::new();
        hasher.update(NAMESPACES[NS_DISCOVERY]);
        hasher.update(self.0);
        TopicId(hasher.finalize().into())
    }

    /// Proof that we hold this capability, as `role`, on the connection
    /// whose handshake produced `transcript`.
    pub fn prove(&self, role: Role, transcript: &TranscriptHash) -> CapabilityProof {
        let mut hasher = Sha256::new();
        hasher.update(role.namespace());
        hasher.update(self.0);
        hasher.update(transcript.0);
        CapabilityProof(hasher.finalize().into())
    }

    /// Check a proof sent by the remote side of a connection on which we hold
    /// `local_role`. The remote proved as our counterpart.
    pub fn verify(
        &self,
        local_role: Role,
        transcript: &TranscriptHash,
        proof: &CapabilityProof,
    ) -> bool {
        let expected = self.prove(local_role.counterpart(), transcript);
        bool::from(expected.0[..].ct_eq(&proof.0[..]))
    }
}

impl Debug for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Capability(<redacted>)")
    }
}

/// Public topic id used for channel routing (the discovery key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicId([u8; KEY_LEN]);

key_type!(TopicId);
key_serde!(TopicId);

impl Display for TopicId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Debug for TopicId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Short form keeps logs readable
        write!(f, "TopicId({})", &hex::encode(self.0)[..12])
    }
}

/// Per-connection handshake transcript hash, produced by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TranscriptHash([u8; KEY_LEN]);

key_type!(TranscriptHash);

/// Proof of capability possession, bound to one connection and role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityProof([u8; KEY_LEN]);

key_type!(CapabilityProof);
key_serde!(CapabilityProof);

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(byte: u8) -> TranscriptHash {
        TranscriptHash::from_bytes([byte; KEY_LEN])
    }

    #[test]
    fn test_namespaces_distinct() {
        let ns = &*NAMESPACES;
        assert_ne!(ns[NS_INITIATOR], ns[NS_RESPONDER]);
        assert_ne!(ns[NS_INITIATOR], ns[NS_DISCOVERY]);
        assert_ne!(ns[NS_RESPONDER], ns[NS_DISCOVERY]);
    }

    #[test]
    fn test_namespace_deterministic() {
        assert_eq!(namespace::<2>("wakeup"), namespace::<2>("wakeup"));
        assert_ne!(namespace::<2>("wakeup"), namespace::<2>("other"));
    }

    #[test]
    fn test_discovery_key_deterministic() {
        let cap = Capability::from_bytes([7; KEY_LEN]);
        assert_eq!(cap.discovery_key(), cap.discovery_key());
        assert_ne!(cap.discovery_key().as_bytes(), cap.as_bytes());
    }

    #[test]
    fn test_responder_accepts_initiator_proof() {
        let cap = Capability::generate();
        let t = transcript(1);

        let proof = cap.prove(Role::Initiator, &t);
        assert!(cap.verify(Role::Responder, &t, &proof));
    }

    #[test]
    fn test_proof_rejected_in_opposite_role() {
        let cap = Capability::generate();
        let t = transcript(1);

        // Replaying our own proof back at us must fail
        let proof = cap.prove(Role::Initiator, &t);
        assert!(!cap.verify(Role::Initiator, &t, &proof));
    }

    #[test]
    fn test_proof_rejected_on_other_transcript() {
        let cap = Capability::generate();
        let proof = cap.prove(Role::Initiator, &transcript(1));
        assert!(!cap.verify(Role::Responder, &transcript(2), &proof));
    }

    #[test]
    fn test_proofs_differ_across_role_and_transcript() {
        let cap = Capability::generate();
        let a = cap.prove(Role::Initiator, &transcript(1));
        let b = cap.prove(Role::Responder, &transcript(1));
        let c = cap.prove(Role::Initiator, &transcript(2));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn test_wrong_capability_rejected() {
        let t = transcript(9);
        let proof = Capability::generate().prove(Role::Initiator, &t);
        assert!(!Capability::generate().verify(Role::Responder, &t, &proof));
    }

    #[test]
    fn test_topic_id_hex_roundtrip() {
        let id = Capability::generate().discovery_key();
        let parsed: TopicId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            "abcd".parse::<TopicId>(),
            Err(KeyError::InvalidLength(2))
        ));
        assert!(matches!(
            "zz".repeat(KEY_LEN).parse::<Capability>(),
            Err(KeyError::InvalidHex(_))
        ));
        assert!(TopicId::from_slice(&[0; 31]).is_err());
    }

    #[test]
    fn test_capability_debug_redacted() {
        let cap = Capability::from_bytes([0xab; KEY_LEN]);
        let debug = format!("{:?}", cap);
        assert!(!debug.contains("abab"));
    }

    #[test]
    fn test_topic_id_serde_json_is_hex() {
        let id = TopicId::from_bytes([0x11; KEY_LEN]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "11".repeat(KEY_LEN)));
        let parsed: TopicId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_topic_id_bincode_is_raw() {
        let id = TopicId::from_bytes([0x22; KEY_LEN]);
        let bytes = bincode::serialize(&id).unwrap();
        assert_eq!(bytes, vec![0x22; KEY_LEN]);
    }
}
