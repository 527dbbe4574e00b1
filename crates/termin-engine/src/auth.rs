//! Actor authentication: role-membership checks over the key registries and
//! root-key verification for administrative operations.

use chrono::Utc;
use tracing::warn;

use termin_core::actors::ActorKey;
use termin_core::constants::SIGNED_REQUEST_MAX_AGE_SECS;
use termin_core::envelope::Signed;
use termin_core::error::ApiError;
use termin_core::params::{AddMediatorPublicKeysData, KeyLists, Keys};
use termin_core::types::Timestamp;
use termin_crypto::{sha256, verify_signature};

use crate::service::{internal, Broker, K_MEDIATORS, K_PROVIDERS, T_KEYS};

/// The two registry-backed roles. Root is not registry-backed: it is a
/// single configured key restricted to mediator/code/distance management.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Mediator,
    Provider,
}

impl Role {
    pub(crate) fn registry_key(self) -> &'static [u8] {
        match self {
            Role::Mediator => K_MEDIATORS,
            Role::Provider => K_PROVIDERS,
        }
    }
}

impl Broker {
    /// All keys registered for a role. Entries that fail to decode are
    /// skipped with a warning rather than poisoning the whole list.
    pub(crate) fn list_actor_keys(&self, role: Role) -> Result<Vec<ActorKey>, ApiError> {
        let raw = self
            .db
            .map_get_all(T_KEYS, role.registry_key())
            .map_err(internal)?;
        let mut keys = Vec::with_capacity(raw.len());
        for (_, value) in raw {
            match serde_json::from_slice::<ActorKey>(&value) {
                Ok(key) => keys.push(key),
                Err(err) => warn!(%err, "skipping undecodable actor key"),
            }
        }
        Ok(keys)
    }

    /// Authenticate a role-restricted request: the presented key must appear
    /// in the role's registry (403 otherwise) and the signature must verify
    /// over the exact signed bytes (401 otherwise).
    pub(crate) fn authenticate(
        &self,
        role: Role,
        signed_bytes: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<ActorKey, ApiError> {
        let keys = self.list_actor_keys(role)?;
        let actor = keys
            .into_iter()
            .find(|key| {
                key.key_data()
                    .map(|kd| kd.signing == public_key)
                    .unwrap_or(false)
            })
            .ok_or(ApiError::NotOnKeyList)?;

        verify_signature(public_key, signed_bytes, signature)
            .map_err(|_| ApiError::ActorSignatureInvalid)?;

        Ok(actor)
    }

    /// Verify a root-only request against the configured root public key.
    pub(crate) fn verify_root(&self, signed_bytes: &[u8], signature: &[u8]) -> Result<(), ApiError> {
        verify_signature(&self.root_public_key, signed_bytes, signature)
            .map_err(|_| ApiError::RootSignatureInvalid)
    }

    /// Reject requests whose timestamp is more than a minute old. Exactly
    /// sixty seconds still passes.
    pub(crate) fn check_freshness(&self, timestamp: &Timestamp) -> Result<(), ApiError> {
        let age_millis = Utc::now()
            .signed_duration_since(*timestamp)
            .num_milliseconds();
        if age_millis > SIGNED_REQUEST_MAX_AGE_SECS * 1000 {
            return Err(ApiError::SignatureExpired);
        }
        Ok(())
    }

    /// `getKeys` — every public key in the system: both registries plus the
    /// server's own provider-data, root and token keys.
    pub fn get_keys(&self) -> Result<Keys, ApiError> {
        Ok(Keys {
            lists: KeyLists {
                providers: self.list_actor_keys(Role::Provider)?,
                mediators: self.list_actor_keys(Role::Mediator)?,
            },
            provider_data: self.provider_data_public_key.clone(),
            root_key: self.root_public_key.clone(),
            token_key: self.token_keypair.public_key().to_vec(),
        })
    }

    /// `addMediatorPublicKeys` — root-only. Stores the whole signed envelope
    /// as the mediator's registry entry, keyed by the hash of the new
    /// signing key, so the root signature stays verifiable in place.
    pub fn add_mediator_public_keys(
        &self,
        params: &Signed<AddMediatorPublicKeysData>,
    ) -> Result<(), ApiError> {
        params.validate_envelope()?;
        self.verify_root(params.signed_bytes(), &params.signature)?;
        let data = params.parse()?;
        self.check_freshness(&data.timestamp)?;

        let entry = ActorKey {
            data: params.json.clone(),
            signature: params.signature.clone(),
            public_key: params.public_key.clone().unwrap_or_default(),
        };
        let encoded = serde_json::to_vec(&entry).map_err(internal)?;
        self.db
            .map_set(T_KEYS, K_MEDIATORS, &sha256(&data.signing), &encoded)
            .map_err(internal)?;
        Ok(())
    }
}
