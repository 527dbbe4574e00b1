use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::types::Timestamp;

/// A signed actor key as stored in the role registries (`keys/mediators`,
/// `keys/providers`). The `data` string decodes to [`ActorKeyData`] (or
/// [`ProviderKeyData`] for providers) and is kept verbatim so the original
/// signature stays valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorKey {
    pub data: String,
    #[serde(with = "crate::encoding::b64")]
    pub signature: Vec<u8>,
    #[serde(rename = "publicKey", with = "crate::encoding::b64")]
    pub public_key: Vec<u8>,
}

impl ActorKey {
    pub fn key_data(&self) -> Result<ActorKeyData, ApiError> {
        serde_json::from_str(&self.data)
            .map_err(|e| ApiError::malformed(format!("invalid actor key data: {e}")))
    }

    /// Provider registries carry queue metadata alongside the key material;
    /// absent metadata decodes to the default (empty zip, not accessible).
    pub fn provider_key_data(&self) -> Result<ProviderKeyData, ApiError> {
        let mut pkd: ProviderKeyData = serde_json::from_str(&self.data)
            .map_err(|e| ApiError::malformed(format!("invalid provider key data: {e}")))?;
        if pkd.queue_data.is_none() {
            pkd.queue_data = Some(ProviderQueueData::default());
        }
        Ok(pkd)
    }
}

/// Decoded payload of an [`ActorKey`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorKeyData {
    #[serde(with = "crate::encoding::b64")]
    pub encryption: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub signing: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// Decoded payload of a provider [`ActorKey`], including queue metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderKeyData {
    #[serde(with = "crate::encoding::b64")]
    pub encryption: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub signing: Vec<u8>,
    #[serde(rename = "queueData", default, skip_serializing_if = "Option::is_none")]
    pub queue_data: Option<ProviderQueueData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// Queue metadata announced by a provider on confirmation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderQueueData {
    #[serde(rename = "zipCode", default)]
    pub zip_code: String,
    #[serde(default)]
    pub accessible: bool,
}

/// Key payload a mediator signs when confirming a provider
/// (`signedKeyData.data`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyData {
    #[serde(with = "crate::encoding::b64")]
    pub signing: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub encryption: Vec<u8>,
    #[serde(rename = "queueData", default, skip_serializing_if = "Option::is_none")]
    pub queue_data: Option<ProviderQueueData>,
}
