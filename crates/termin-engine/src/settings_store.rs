//! The settings sub-service: anonymous client-side-encrypted blobs stored
//! by id with a configurable TTL.

use serde_json::Value;

use termin_core::error::ApiError;
use termin_core::params::{SettingsIdParams, StoreSettingsParams};

use crate::service::{internal, Broker, T_SETTINGS};

impl Broker {
    /// `storeSettings` — overwrite the blob at `id`, resetting its TTL.
    pub fn store_settings(&self, params: &StoreSettingsParams) -> Result<(), ApiError> {
        let encoded = serde_json::to_vec(&params.data).map_err(internal)?;
        self.db
            .value_set(
                T_SETTINGS,
                params.id.as_bytes(),
                &encoded,
                Some(self.settings_ttl),
            )
            .map_err(internal)?;
        Ok(())
    }

    /// `getSettings`.
    pub fn get_settings(&self, params: &SettingsIdParams) -> Result<Value, ApiError> {
        let raw = self
            .db
            .value_get(T_SETTINGS, params.id.as_bytes())
            .map_err(internal)?
            .ok_or(ApiError::NotFound)?;
        serde_json::from_slice(&raw).map_err(internal)
    }

    /// `deleteSettings`.
    pub fn delete_settings(&self, params: &SettingsIdParams) -> Result<(), ApiError> {
        self.db
            .value_del(T_SETTINGS, params.id.as_bytes())
            .map_err(internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termin_core::types::Id;

    use crate::tests::test_broker;

    #[test]
    fn settings_round_trip_and_delete() {
        let (broker, _) = test_broker();
        let id = Id::random();
        broker
            .store_settings(&StoreSettingsParams {
                id: id.clone(),
                data: serde_json::json!({"encrypted": "blob"}),
            })
            .unwrap();

        let got = broker.get_settings(&SettingsIdParams { id: id.clone() }).unwrap();
        assert_eq!(got["encrypted"], "blob");

        broker.delete_settings(&SettingsIdParams { id: id.clone() }).unwrap();
        let err = broker.get_settings(&SettingsIdParams { id }).unwrap_err();
        assert_eq!(err, ApiError::NotFound);
    }
}
