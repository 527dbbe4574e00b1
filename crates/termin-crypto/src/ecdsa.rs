use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroizing;

use termin_core::envelope::Signed;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Sign `message` with a P-256 secret key (raw 32-byte scalar).
/// Returns a DER-encoded signature.
pub fn sign(secret_key_bytes: &[u8], message: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let sk =
        SigningKey::from_slice(secret_key_bytes).map_err(|_| SignatureError::InvalidSecretKey)?;
    let sig: Signature = sk.sign(message);
    Ok(sig.to_der().as_bytes().to_vec())
}

/// Verify an ECDSA P-256 signature over `message`.
///
/// `public_key` is SEC1-encoded (compressed or uncompressed); `signature`
/// may be DER or the fixed 64-byte r‖s form.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    let vk =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| SignatureError::InvalidPublicKey)?;
    let sig = Signature::from_der(signature)
        .or_else(|_| Signature::from_slice(signature))
        .map_err(|_| SignatureError::InvalidSignature)?;
    vk.verify(message, &sig)
        .map_err(|_| SignatureError::InvalidSignature)
}

/// A P-256 keypair. The public key is kept in uncompressed SEC1 form, the
/// form every envelope carries on the wire.
pub struct EcdsaKeyPair {
    public_key: Vec<u8>,
    secret: SigningKey,
}

impl EcdsaKeyPair {
    /// Generate a fresh keypair.
    pub fn generate() -> Self {
        let secret = SigningKey::random(&mut rand::thread_rng());
        let public_key = secret
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Self { public_key, secret }
    }

    /// Restore a keypair from the raw 32-byte secret scalar.
    pub fn from_secret_bytes(secret_bytes: &[u8]) -> Result<Self, SignatureError> {
        let secret =
            SigningKey::from_slice(secret_bytes).map_err(|_| SignatureError::InvalidSecretKey)?;
        let public_key = secret
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Ok(Self { public_key, secret })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The raw 32-byte secret scalar, zeroized on drop.
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.secret.to_bytes().to_vec())
    }

    /// Sign `message`, returning a DER-encoded signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sig: Signature = self.secret.sign(message);
        sig.to_der().as_bytes().to_vec()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        verify_signature(&self.public_key, message, signature)
    }
}

impl std::fmt::Debug for EcdsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EcdsaKeyPair({}b public)", self.public_key.len())
    }
}

/// Serialize `value` to JSON, sign the exact bytes, and wrap the result in a
/// [`Signed`] envelope carrying the signer's public key.
pub fn sign_json<T: Serialize>(
    keypair: &EcdsaKeyPair,
    value: &T,
) -> Result<Signed<T>, SignatureError> {
    let json =
        serde_json::to_string(value).map_err(|e| SignatureError::Serialization(e.to_string()))?;
    let signature = keypair.sign(json.as_bytes());
    Ok(Signed::from_parts(
        json,
        signature,
        Some(keypair.public_key().to_vec()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = EcdsaKeyPair::generate();
        let sig = kp.sign(b"an appointment offer");
        assert!(verify_signature(kp.public_key(), b"an appointment offer", &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let kp = EcdsaKeyPair::generate();
        let sig = kp.sign(b"original");
        assert!(verify_signature(kp.public_key(), b"tampered", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let kp = EcdsaKeyPair::generate();
        let other = EcdsaKeyPair::generate();
        let sig = kp.sign(b"message");
        assert!(verify_signature(other.public_key(), b"message", &sig).is_err());
    }

    #[test]
    fn secret_bytes_restore_the_same_key() {
        let kp = EcdsaKeyPair::generate();
        let restored = EcdsaKeyPair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());

        let sig = restored.sign(b"probe");
        assert!(kp.verify(b"probe", &sig).is_ok());
    }

    #[test]
    fn raw_fixed_size_signature_verifies_too() {
        let kp = EcdsaKeyPair::generate();
        let sk = SigningKey::from_slice(&kp.secret_bytes()).unwrap();
        let sig: Signature = sk.sign(b"fixed");
        assert!(verify_signature(kp.public_key(), b"fixed", sig.to_bytes().as_slice()).is_ok());
    }

    #[test]
    fn sign_json_produces_verifiable_envelope() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Payload {
            msg: String,
        }
        let kp = EcdsaKeyPair::generate();
        let signed = sign_json(
            &kp,
            &Payload {
                msg: "hello".into(),
            },
        )
        .unwrap();
        assert!(verify_signature(
            signed.public_key.as_ref().unwrap(),
            signed.signed_bytes(),
            &signed.signature
        )
        .is_ok());
        assert_eq!(signed.parse().unwrap().msg, "hello");
    }
}
