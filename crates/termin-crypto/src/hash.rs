use sha2::{Digest, Sha256};

use termin_core::types::ProviderId;

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive the provider id (registry and partition key) from a signing
/// public key.
pub fn provider_id_from_pubkey(pubkey: &[u8]) -> ProviderId {
    ProviderId::from_bytes(sha256(pubkey))
}
