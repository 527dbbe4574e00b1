//! termin-crypto — signing, hashing and envelope encryption.
//!
//! ECDSA P-256 for all actor and server signatures, SHA-256 for provider
//! ids, HMAC-SHA-256 for priority-token derivation, and ECDH +
//! ChaCha20-Poly1305 for the client-side encrypted envelopes the server
//! stores opaquely.

pub mod ecdh;
pub mod ecdsa;
pub mod hash;
pub mod token;

pub use ecdsa::{sign_json, verify_signature, EcdsaKeyPair, SignatureError};
pub use hash::{provider_id_from_pubkey, sha256};
pub use token::derive_priority_token;
