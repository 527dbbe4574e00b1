use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{PROVIDER_ID_BYTES, RECORD_ID_BYTES};

/// Wall-clock instant, RFC 3339 on the wire.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ── Id ───────────────────────────────────────────────────────────────────────

/// Client-chosen record identifier (appointments, slots, bookings, invitation
/// codes). Hex on the wire; 16 bytes for appointment/slot ids, 16–32 bytes
/// for invitation codes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(Vec<u8>);

impl Id {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Generate a fresh 16-byte random id.
    pub fn random() -> Self {
        let mut bytes = [0u8; RECORD_ID_BYTES];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self)
    }
}

impl Serialize for Id {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex())
    }
}

// ── ProviderId ───────────────────────────────────────────────────────────────

/// 32-byte provider identifier: SHA-256 of the provider's signing public key.
/// Partition key for all per-provider storage. Hex on the wire.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(pub [u8; PROVIDER_ID_BYTES]);

impl ProviderId {
    pub fn from_bytes(b: [u8; PROVIDER_ID_BYTES]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; PROVIDER_ID_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != PROVIDER_ID_BYTES {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; PROVIDER_ID_BYTES];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for ProviderId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ProviderId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderId({}…)", &self.to_hex()[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_hex_round_trip() {
        let id = Id::random();
        assert_eq!(id.len(), RECORD_ID_BYTES);
        let back = Id::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn provider_id_rejects_wrong_length() {
        assert!(ProviderId::from_hex("abcd").is_err());
    }

    #[test]
    fn id_serializes_as_hex_string() {
        let id = Id::new(vec![0xab, 0xcd]);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abcd\"");
    }
}
