use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use termin_core::error::ApiError;
use termin_crypto::EcdsaKeyPair;
use termin_store::Database;

use crate::config::{ConfigError, Settings};

// ── Storage layout ────────────────────────────────────────────────────────────
//
// Tables and keys as persisted in the KV store. Per-provider tables are keyed
// by the provider id (SHA-256 of the signing public key).

pub(crate) const T_KEYS: &str = "keys";
pub(crate) const K_MEDIATORS: &[u8] = b"mediators";
pub(crate) const K_PROVIDERS: &[u8] = b"providers";

pub(crate) const T_PROVIDER_DATA: &str = "providerData";
pub(crate) const K_UNVERIFIED: &[u8] = b"unverified";
pub(crate) const K_VERIFIED: &[u8] = b"verified";
pub(crate) const K_PUBLIC: &[u8] = b"public";

pub(crate) const T_APPOINTMENTS: &str = "appointments";
pub(crate) const T_BOOKINGS: &str = "bookings";
pub(crate) const K_USED_TOKENS: &[u8] = b"tokens";

pub(crate) const T_CODES: &str = "codes";
pub(crate) const T_CODE_SCORES: &str = "codeScores";

pub(crate) const T_PRIORITY_TOKEN: &str = "priorityToken";
pub(crate) const K_PRIMARY: &[u8] = b"primary";

pub(crate) const T_DISTANCES: &str = "distances";
pub(crate) const T_SETTINGS: &str = "settings";
pub(crate) const T_STATS: &str = "stats";

/// Per-actor invitation-code configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CodePolicy {
    pub enabled: bool,
    pub reuse_limit: i64,
}

/// The broker service. One instance serves all RPC handlers; all shared
/// state lives in the store, so handlers stay request-scoped and stateless.
pub struct Broker {
    pub(crate) db: Arc<dyn Database>,
    pub(crate) secret: Zeroizing<Vec<u8>>,
    pub(crate) root_public_key: Vec<u8>,
    pub(crate) token_keypair: EcdsaKeyPair,
    pub(crate) provider_data_public_key: Vec<u8>,
    pub(crate) user_codes: CodePolicy,
    pub(crate) provider_codes: CodePolicy,
    pub(crate) settings_ttl: chrono::Duration,
    /// Serializes the priority-token counter increment; the counter must
    /// never decrease and is the one hot shared resource.
    pub(crate) token_counter_lock: Mutex<()>,
}

impl Broker {
    /// Build the broker from its settings. Fails fast on missing key
    /// material rather than at first use.
    pub fn new(db: Arc<dyn Database>, settings: &Settings) -> Result<Self, ConfigError> {
        if settings.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        let root = settings
            .key("root")
            .ok_or(ConfigError::MissingKey("root"))?;

        let token = settings
            .key("token")
            .ok_or(ConfigError::MissingKey("token"))?;
        let token_secret = token
            .private_key
            .as_ref()
            .ok_or(ConfigError::MissingPrivateKey("token"))?;
        let token_keypair = EcdsaKeyPair::from_secret_bytes(token_secret).map_err(|e| {
            ConfigError::InvalidKey {
                name: "token".into(),
                reason: e.to_string(),
            }
        })?;

        let provider_data = settings
            .key("provider")
            .ok_or(ConfigError::MissingKey("provider"))?;

        Ok(Self {
            db,
            secret: Zeroizing::new(settings.secret.clone()),
            root_public_key: root.public_key.clone(),
            token_keypair,
            provider_data_public_key: provider_data.public_key.clone(),
            user_codes: CodePolicy {
                enabled: settings.user_codes_enabled,
                reuse_limit: settings.user_codes_reuse_limit,
            },
            provider_codes: CodePolicy {
                enabled: settings.provider_codes_enabled,
                reuse_limit: settings.provider_codes_reuse_limit,
            },
            settings_ttl: chrono::Duration::days(settings.settings_ttl_days),
            token_counter_lock: Mutex::new(()),
        })
    }
}

/// Map any backend failure to a bare 500, logging the detail server-side.
pub(crate) fn internal<E: std::fmt::Display>(err: E) -> ApiError {
    tracing::error!(error = %err, "internal error");
    ApiError::Internal
}
