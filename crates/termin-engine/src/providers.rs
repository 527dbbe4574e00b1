//! Provider onboarding: unverified → verified → public staging of encrypted
//! provider records, gated by mediators.

use serde_json::Value;

use termin_core::actors::ActorKey;
use termin_core::envelope::Signed;
use termin_core::error::ApiError;
use termin_core::params::{
    ConfirmProviderData, ListProviderDataData, StoreProviderDataData, TimestampedData,
};
use termin_crypto::{provider_id_from_pubkey, sha256, verify_signature};

use crate::auth::Role;
use crate::service::{
    internal, Broker, K_PROVIDERS, K_PUBLIC, K_UNVERIFIED, K_VERIFIED, T_KEYS, T_PROVIDER_DATA,
};

/// Decode stored envelopes into JSON values, skipping undecodable entries,
/// applying an optional limit.
fn decode_entries(
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    limit: Option<usize>,
) -> Vec<Value> {
    let iter = entries
        .into_iter()
        .filter_map(|(_, raw)| serde_json::from_slice::<Value>(&raw).ok());
    match limit {
        Some(n) => iter.take(n).collect(),
        None => iter.collect(),
    }
}

impl Broker {
    /// `storeProviderData` — self-signed by the provider's signing key.
    ///
    /// First-time providers must redeem an invitation code when provider
    /// codes are enabled; providers with an existing verified record may
    /// re-submit without one. The whole signed envelope is stored under
    /// `providerData/unverified`, keyed by the hash of the signing key.
    pub fn store_provider_data(
        &self,
        params: &Signed<StoreProviderDataData>,
    ) -> Result<(), ApiError> {
        params.validate_envelope()?;
        let data = params.parse()?;
        data.validate()?;

        let public_key = params.require_public_key()?;
        verify_signature(public_key, params.signed_bytes(), &params.signature)
            .map_err(|_| ApiError::InvalidSignature)?;

        let provider_id = provider_id_from_pubkey(public_key);
        let envelope = serde_json::to_vec(params).map_err(internal)?;

        let mut txn = self.db.begin().map_err(internal)?;
        txn.watch(T_PROVIDER_DATA, K_UNVERIFIED).map_err(internal)?;
        txn.watch(T_PROVIDER_DATA, K_VERIFIED).map_err(internal)?;

        let verified = txn
            .map_get(T_PROVIDER_DATA, K_VERIFIED, provider_id.as_bytes())
            .map_err(internal)?
            .is_some();
        if self.provider_codes.enabled && !verified {
            let code = data.code.as_ref().ok_or(ApiError::NotAuthorized)?;
            self.redeem_code(&*txn, "provider", code, self.provider_codes.reuse_limit)?;
        }

        // A re-submitting verified provider goes back to pending review: a
        // provider id lives in at most one of the two staging maps.
        txn.map_del(T_PROVIDER_DATA, K_VERIFIED, provider_id.as_bytes())
            .map_err(internal)?;
        txn.map_set(
            T_PROVIDER_DATA,
            K_UNVERIFIED,
            provider_id.as_bytes(),
            &envelope,
        )
        .map_err(internal)?;

        txn.commit().map_err(internal)?;
        Ok(())
    }

    /// `getPendingProviderData` — mediator-only listing of unverified
    /// records.
    pub fn get_pending_provider_data(
        &self,
        params: &Signed<ListProviderDataData>,
    ) -> Result<Vec<Value>, ApiError> {
        self.list_provider_data(params, K_UNVERIFIED)
    }

    /// `getVerifiedProviderData` — mediator-only listing of verified
    /// records.
    pub fn get_verified_provider_data(
        &self,
        params: &Signed<ListProviderDataData>,
    ) -> Result<Vec<Value>, ApiError> {
        self.list_provider_data(params, K_VERIFIED)
    }

    fn list_provider_data(
        &self,
        params: &Signed<ListProviderDataData>,
        stage: &[u8],
    ) -> Result<Vec<Value>, ApiError> {
        params.validate_envelope()?;
        let data = params.parse()?;
        let limit = data.limit()?;
        self.authenticate(
            Role::Mediator,
            params.signed_bytes(),
            &params.signature,
            params.require_public_key()?,
        )?;

        let entries = self
            .db
            .map_get_all(T_PROVIDER_DATA, stage)
            .map_err(internal)?;
        Ok(decode_entries(entries, limit))
    }

    /// `getProviderData` — a provider's read of its own verified record.
    pub fn get_provider_data(&self, params: &Signed<TimestampedData>) -> Result<Value, ApiError> {
        params.validate_envelope()?;
        let public_key = params.require_public_key()?;
        verify_signature(public_key, params.signed_bytes(), &params.signature)
            .map_err(|_| ApiError::InvalidSignature)?;
        let data = params.parse()?;
        self.check_freshness(&data.timestamp)?;

        let provider_id = provider_id_from_pubkey(public_key);
        let raw = self
            .db
            .map_get(T_PROVIDER_DATA, K_VERIFIED, provider_id.as_bytes())
            .map_err(internal)?
            .ok_or(ApiError::NotFound)?;
        serde_json::from_slice(&raw).map_err(internal)
    }

    /// `confirmProvider` — mediator-only. Moves the record out of
    /// `unverified`, writes the verified record, registers the provider's
    /// actor key, and sets or clears the public profile — all in one
    /// transaction. Reconfirming an already-verified provider is idempotent.
    pub fn confirm_provider(&self, params: &Signed<ConfirmProviderData>) -> Result<(), ApiError> {
        params.validate_envelope()?;
        let data = params.parse()?;
        self.authenticate(
            Role::Mediator,
            params.signed_bytes(),
            &params.signature,
            params.require_public_key()?,
        )?;

        let key_data = data.signed_key_data.parse()?;
        let key_hash = sha256(&key_data.signing);
        let actor_key = ActorKey {
            data: data.signed_key_data.json.clone(),
            signature: data.signed_key_data.signature.clone(),
            public_key: data
                .signed_key_data
                .require_public_key()?
                .to_vec(),
        };

        let encrypted = serde_json::to_vec(&data.encrypted_provider_data).map_err(internal)?;
        let actor_encoded = serde_json::to_vec(&actor_key).map_err(internal)?;

        let mut txn = self.db.begin().map_err(internal)?;
        txn.watch(T_PROVIDER_DATA, K_UNVERIFIED).map_err(internal)?;
        txn.watch(T_PROVIDER_DATA, K_VERIFIED).map_err(internal)?;

        txn.map_del(T_PROVIDER_DATA, K_UNVERIFIED, data.id.as_bytes())
            .map_err(internal)?;
        txn.map_set(
            T_PROVIDER_DATA,
            K_VERIFIED,
            data.verified_id.as_bytes(),
            &encrypted,
        )
        .map_err(internal)?;
        txn.map_set(T_KEYS, K_PROVIDERS, &key_hash, &actor_encoded)
            .map_err(internal)?;

        match &data.public_provider_data {
            Some(public) => {
                let encoded = serde_json::to_vec(public).map_err(internal)?;
                txn.map_set(T_PROVIDER_DATA, K_PUBLIC, &key_hash, &encoded)
                    .map_err(internal)?;
            }
            // The public profile is a mediator-controlled annotation:
            // omitting it on reconfirm withdraws a previously public record.
            None => {
                txn.map_del(T_PROVIDER_DATA, K_PUBLIC, &key_hash)
                    .map_err(internal)?;
            }
        }

        txn.commit().map_err(internal)?;
        Ok(())
    }
}
