//! Server settings, loaded from a JSON file by the binary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the `secret` option is required")]
    MissingSecret,
    #[error("required key `{0}` is missing")]
    MissingKey(&'static str),
    #[error("key `{0}` has no private part but one is required")]
    MissingPrivateKey(&'static str),
    #[error("invalid key material for `{name}`: {reason}")]
    InvalidKey { name: String, reason: String },
}

/// A named server keypair. Public part always present; the private part is
/// needed only for keys the server signs with (currently `token`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedKey {
    pub name: String,
    #[serde(rename = "publicKey", with = "termin_core::encoding::b64")]
    pub public_key: Vec<u8>,
    #[serde(
        rename = "privateKey",
        with = "termin_core::encoding::b64_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub private_key: Option<Vec<u8>>,
}

/// Recognized configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// HMAC key for priority-token derivation. Required.
    #[serde(with = "termin_core::encoding::b64")]
    pub secret: Vec<u8>,
    #[serde(default)]
    pub keys: Vec<NamedKey>,
    #[serde(rename = "userCodesEnabled", default)]
    pub user_codes_enabled: bool,
    #[serde(rename = "userCodesReuseLimit", default)]
    pub user_codes_reuse_limit: i64,
    #[serde(rename = "providerCodesEnabled", default)]
    pub provider_codes_enabled: bool,
    #[serde(rename = "providerCodesReuseLimit", default)]
    pub provider_codes_reuse_limit: i64,
    /// TTL for the settings sub-service, in days.
    #[serde(rename = "settingsTTLDays", default = "default_settings_ttl_days")]
    pub settings_ttl_days: i64,
}

fn default_settings_ttl_days() -> i64 {
    14
}

impl Settings {
    /// Look up a key by name. `provider` falls back to the legacy
    /// `providerData` name, which older deployments still use.
    pub fn key(&self, name: &str) -> Option<&NamedKey> {
        let found = self.keys.iter().find(|k| k.name == name);
        if found.is_none() && name == "provider" {
            return self.keys.iter().find(|k| k.name == "providerData");
        }
        found
    }
}
