//! ECDH envelope encryption, as used by clients to seal payloads for
//! providers and mediators. The server never opens these; the encrypt and
//! decrypt halves live here for clients and tests.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::RngCore;
use thiserror::Error;

use termin_core::envelope::EcdhEncryptedData;

use crate::hash::sha256;

const NONCE_BYTES: usize = 12;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
}

/// Seal `plaintext` for the holder of `recipient_public_key` (SEC1 bytes).
///
/// An ephemeral keypair is generated per envelope; the AEAD key is the
/// SHA-256 of the raw ECDH shared secret.
pub fn encrypt(
    recipient_public_key: &[u8],
    plaintext: &[u8],
) -> Result<EcdhEncryptedData, EnvelopeError> {
    let recipient = PublicKey::from_sec1_bytes(recipient_public_key)
        .map_err(|_| EnvelopeError::InvalidPublicKey)?;

    let ephemeral = EphemeralSecret::random(&mut rand::thread_rng());
    let ephemeral_public = ephemeral
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();

    let shared = ephemeral.diffie_hellman(&recipient);
    let key = sha256(shared.raw_secret_bytes());

    let mut iv = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let data = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| EnvelopeError::EncryptionFailed)?;

    Ok(EcdhEncryptedData {
        iv: iv.to_vec(),
        data,
        public_key: ephemeral_public,
    })
}

/// Open an envelope with the recipient's raw 32-byte secret scalar.
pub fn decrypt(
    recipient_secret_key: &[u8],
    envelope: &EcdhEncryptedData,
) -> Result<Vec<u8>, EnvelopeError> {
    let secret =
        SecretKey::from_slice(recipient_secret_key).map_err(|_| EnvelopeError::InvalidSecretKey)?;
    let ephemeral = PublicKey::from_sec1_bytes(&envelope.public_key)
        .map_err(|_| EnvelopeError::InvalidPublicKey)?;

    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());
    let key = sha256(shared.raw_secret_bytes());

    if envelope.iv.len() != NONCE_BYTES {
        return Err(EnvelopeError::DecryptionFailed);
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(&envelope.iv), envelope.data.as_slice())
        .map_err(|_| EnvelopeError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open() {
        let recipient = SecretKey::random(&mut rand::thread_rng());
        let recipient_pub = recipient.public_key().to_encoded_point(false);

        let envelope = encrypt(recipient_pub.as_bytes(), b"patient contact data").unwrap();
        let plain = decrypt(&recipient.to_bytes(), &envelope).unwrap();
        assert_eq!(plain, b"patient contact data");
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let recipient = SecretKey::random(&mut rand::thread_rng());
        let recipient_pub = recipient.public_key().to_encoded_point(false);
        let envelope = encrypt(recipient_pub.as_bytes(), b"sealed").unwrap();

        let other = SecretKey::random(&mut rand::thread_rng());
        assert!(decrypt(&other.to_bytes(), &envelope).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let recipient = SecretKey::random(&mut rand::thread_rng());
        let recipient_pub = recipient.public_key().to_encoded_point(false);
        let mut envelope = encrypt(recipient_pub.as_bytes(), b"sealed").unwrap();
        envelope.data[0] ^= 1;
        assert!(decrypt(&recipient.to_bytes(), &envelope).is_err());
    }
}
