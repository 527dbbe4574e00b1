use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

use crate::error::ApiError;

/// A signed JSON blob: the payload travels as the exact string the client
/// signed, alongside the detached signature and (usually) the signer's
/// public key.
///
/// Signatures validate over the received byte range, so the raw `json`
/// string is carried verbatim through the whole pipeline — re-serializing
/// the parsed payload before verification would break verification for any
/// client whose JSON formatting differs from ours.
#[derive(Clone, Serialize, Deserialize)]
pub struct Signed<T> {
    /// The signed byte range, exactly as received.
    #[serde(rename = "data")]
    pub json: String,
    #[serde(with = "crate::encoding::b64")]
    pub signature: Vec<u8>,
    #[serde(
        rename = "publicKey",
        with = "crate::encoding::b64_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_key: Option<Vec<u8>>,
    #[serde(skip)]
    marker: PhantomData<fn() -> T>,
}

impl<T> Signed<T> {
    pub fn from_parts(json: String, signature: Vec<u8>, public_key: Option<Vec<u8>>) -> Self {
        Self {
            json,
            signature,
            public_key,
            marker: PhantomData,
        }
    }

    /// The signed bytes, for verification.
    pub fn signed_bytes(&self) -> &[u8] {
        self.json.as_bytes()
    }

    /// The embedded public key, or a 400 when the envelope carries none.
    pub fn require_public_key(&self) -> Result<&[u8], ApiError> {
        self.public_key
            .as_deref()
            .ok_or_else(|| ApiError::malformed("missing public key"))
    }
}

impl<T: DeserializeOwned> Signed<T> {
    /// Parse the payload out of the raw JSON string. The string itself stays
    /// untouched for signature checks.
    pub fn parse(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.json)
            .map_err(|e| ApiError::malformed(format!("invalid signed payload: {e}")))
    }
}

impl<T> std::fmt::Debug for Signed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signed")
            .field("json", &self.json)
            .field("signature", &format_args!("{}b", self.signature.len()))
            .field(
                "public_key",
                &format_args!("{:?}b", self.public_key.as_ref().map(|k| k.len())),
            )
            .finish()
    }
}

// ── ECDH envelope ─────────────────────────────────────────────────────────────

/// Client-side encrypted payload. The server stores and returns these
/// verbatim; only the holder of the matching private key can open them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhEncryptedData {
    #[serde(with = "crate::encoding::b64")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub data: Vec<u8>,
    /// Ephemeral public key of the sender.
    #[serde(rename = "publicKey", with = "crate::encoding::b64")]
    pub public_key: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Payload {
        n: i64,
    }

    #[test]
    fn parse_preserves_raw_json() {
        // Whitespace and key order in the signed string must survive.
        let raw = "{ \"n\":  42 }";
        let signed: Signed<Payload> =
            Signed::from_parts(raw.to_string(), vec![1, 2, 3], None);
        assert_eq!(signed.parse().unwrap().n, 42);
        assert_eq!(signed.signed_bytes(), raw.as_bytes());
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let signed: Signed<Payload> = Signed::from_parts(
            "{\"n\":1}".to_string(),
            vec![9; 64],
            Some(vec![7; 65]),
        );
        let wire = serde_json::to_string(&signed).unwrap();
        let back: Signed<Payload> = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.json, signed.json);
        assert_eq!(back.signature, signed.signature);
        assert_eq!(back.public_key, signed.public_key);
    }

    #[test]
    fn missing_public_key_is_a_400() {
        let signed: Signed<Payload> =
            Signed::from_parts("{\"n\":1}".into(), vec![1], None);
        assert_eq!(
            signed.require_public_key().unwrap_err().code(),
            400
        );
    }
}
