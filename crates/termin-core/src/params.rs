//! Request and response payloads for every RPC operation.
//!
//! Mutating operations arrive wrapped in a [`Signed`] envelope whose `data`
//! string parses into one of the `…Data` types below. `validate` methods run
//! before any handler logic and surface 400s with form-specific detail.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::actors::{ActorKey, KeyData};
use crate::appointment::SignedAppointment;
use crate::constants::{
    MAX_CODE_BYTES, MAX_LISTING_LIMIT, MAX_PUBLIC_KEY_BYTES, MAX_SEARCH_RADIUS_KM,
    MAX_SIGNATURE_BYTES, MIN_CODE_BYTES, MIN_PUBLIC_KEY_BYTES, MIN_SEARCH_RADIUS_KM,
    MIN_SIGNATURE_BYTES, ZIP_CODE_LEN,
};
use crate::envelope::{EcdhEncryptedData, Signed};
use crate::error::ApiError;
use crate::provider::SignedProviderData;
use crate::token::SignedTokenData;
use crate::types::{Id, ProviderId, Timestamp};

fn check_signature_len(signature: &[u8]) -> Result<(), ApiError> {
    if signature.len() < MIN_SIGNATURE_BYTES || signature.len() > MAX_SIGNATURE_BYTES {
        return Err(ApiError::malformed("signature length out of range"));
    }
    Ok(())
}

fn check_public_key_len(key: &[u8]) -> Result<(), ApiError> {
    if key.len() < MIN_PUBLIC_KEY_BYTES || key.len() > MAX_PUBLIC_KEY_BYTES {
        return Err(ApiError::malformed("public key length out of range"));
    }
    Ok(())
}

fn check_zip_code(zip: &str) -> Result<(), ApiError> {
    if zip.len() != ZIP_CODE_LEN || !zip.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::malformed("zip code must be five digits"));
    }
    Ok(())
}

fn check_code_len(code: &Id) -> Result<(), ApiError> {
    if code.len() < MIN_CODE_BYTES || code.len() > MAX_CODE_BYTES {
        return Err(ApiError::malformed("code must be 16-32 bytes of hex"));
    }
    Ok(())
}

impl<T> Signed<T> {
    /// Envelope-level size checks shared by every signed operation.
    pub fn validate_envelope(&self) -> Result<(), ApiError> {
        check_signature_len(&self.signature)?;
        if let Some(key) = &self.public_key {
            check_public_key_len(key)?;
        }
        Ok(())
    }
}

// ── Root operations ──────────────────────────────────────────────────────────

/// `addMediatorPublicKeys` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMediatorPublicKeysData {
    pub timestamp: Timestamp,
    #[serde(with = "crate::encoding::b64")]
    pub encryption: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub signing: Vec<u8>,
}

/// `addCodes` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodesData {
    pub actor: String,
    pub timestamp: Timestamp,
    pub codes: Vec<Id>,
}

impl CodesData {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.actor != "provider" && self.actor != "user" {
            return Err(ApiError::malformed("actor must be provider or user"));
        }
        for code in &self.codes {
            check_code_len(code)?;
        }
        Ok(())
    }
}

/// `uploadDistances` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDistancesData {
    pub timestamp: Timestamp,
    #[serde(rename = "type")]
    pub kind: String,
    pub distances: Vec<Distance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distance {
    pub from: String,
    pub to: String,
    pub distance: f64,
}

impl UploadDistancesData {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.kind != "zipCode" && self.kind != "zipArea" {
            return Err(ApiError::malformed("type must be zipCode or zipArea"));
        }
        for d in &self.distances {
            if d.distance < 0.0 || !d.distance.is_finite() {
                return Err(ApiError::malformed("distance must be a non-negative number"));
            }
        }
        Ok(())
    }
}

// ── Public operations ────────────────────────────────────────────────────────

/// `getAppointmentsByZipCode` parameters (unsigned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAppointmentsByZipCodeParams {
    #[serde(rename = "zipCode")]
    pub zip_code: String,
    pub radius: i64,
}

impl GetAppointmentsByZipCodeParams {
    pub fn validate(&self) -> Result<(), ApiError> {
        check_zip_code(&self.zip_code)?;
        if self.radius < MIN_SEARCH_RADIUS_KM || self.radius > MAX_SEARCH_RADIUS_KM {
            return Err(ApiError::malformed("radius out of range"));
        }
        Ok(())
    }
}

/// `getToken` parameters (unsigned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTokenParams {
    #[serde(with = "crate::encoding::b64")]
    pub hash: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Id>,
    #[serde(
        rename = "publicKey",
        with = "crate::encoding::b64_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_key: Option<Vec<u8>>,
}

impl GetTokenParams {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.hash.len() != 32 {
            return Err(ApiError::malformed("hash must be 32 bytes"));
        }
        if let Some(code) = &self.code {
            check_code_len(code)?;
        }
        Ok(())
    }
}

// ── Provider operations ──────────────────────────────────────────────────────

/// `publishAppointments` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAppointmentsData {
    pub timestamp: Timestamp,
    pub offers: Vec<SignedAppointment>,
    #[serde(default)]
    pub reset: bool,
}

/// `getProviderAppointments` / `getBookedAppointments` / `getProviderData`
/// payload: just the freshness timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedData {
    pub timestamp: Timestamp,
}

/// `cancelBooking` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelBookingData {
    pub timestamp: Timestamp,
    pub id: Id,
}

/// `storeProviderData` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreProviderDataData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Id>,
    #[serde(rename = "encryptedData")]
    pub encrypted_data: EcdhEncryptedData,
}

impl StoreProviderDataData {
    pub fn validate(&self) -> Result<(), ApiError> {
        if let Some(code) = &self.code {
            check_code_len(code)?;
        }
        Ok(())
    }
}

// ── User operations ──────────────────────────────────────────────────────────

/// `bookSlot` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotData {
    #[serde(rename = "providerID")]
    pub provider_id: ProviderId,
    pub id: Id,
    pub timestamp: Timestamp,
    #[serde(rename = "signedTokenData")]
    pub signed_token_data: SignedTokenData,
    #[serde(rename = "encryptedData")]
    pub encrypted_data: EcdhEncryptedData,
}

/// `cancelSlot` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSlotData {
    #[serde(rename = "providerID")]
    pub provider_id: ProviderId,
    pub id: Id,
    #[serde(rename = "signedTokenData")]
    pub signed_token_data: SignedTokenData,
}

// ── Mediator operations ──────────────────────────────────────────────────────

/// `confirmProvider` payload. The richer historical shape; unknown fields
/// are ignored and `publicProviderData` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmProviderData {
    pub id: ProviderId,
    #[serde(rename = "verifiedID")]
    pub verified_id: ProviderId,
    #[serde(
        rename = "publicProviderData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_provider_data: Option<SignedProviderData>,
    #[serde(rename = "encryptedProviderData")]
    pub encrypted_provider_data: EcdhEncryptedData,
    #[serde(rename = "signedKeyData")]
    pub signed_key_data: Signed<KeyData>,
}

/// `getPendingProviderData` / `getVerifiedProviderData` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListProviderDataData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
}

impl ListProviderDataData {
    /// Listing cap; absent means "all".
    pub fn limit(&self) -> Result<Option<usize>, ApiError> {
        match self.n {
            None => Ok(None),
            Some(n) if n >= 1 && n <= MAX_LISTING_LIMIT => Ok(Some(n as usize)),
            Some(_) => Err(ApiError::malformed("n out of range")),
        }
    }
}

// ── Stats ────────────────────────────────────────────────────────────────────

/// `getStats` parameters (unsigned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStatsParams {
    /// Metric name, e.g. "bookings" or "open".
    pub name: String,
    /// Window type: "hour" or "day".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Timestamp>,
    /// Last-n-windows shortcut, mutually exclusive with from/to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<i64>,
}

/// One windowed counter sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsValue {
    pub name: String,
    pub from: Timestamp,
    pub to: Timestamp,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub value: i64,
}

// ── Settings sub-service ─────────────────────────────────────────────────────

/// `storeSettings` parameters (unsigned; payloads are client-side encrypted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettingsParams {
    pub id: Id,
    pub data: serde_json::Value,
}

/// `getSettings` / `deleteSettings` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsIdParams {
    pub id: Id,
}

// ── Responses ────────────────────────────────────────────────────────────────

/// `getKeys` response: server public keys plus both actor-key lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keys {
    pub lists: KeyLists,
    #[serde(rename = "providerData", with = "crate::encoding::b64")]
    pub provider_data: Vec<u8>,
    #[serde(rename = "rootKey", with = "crate::encoding::b64")]
    pub root_key: Vec<u8>,
    #[serde(rename = "tokenKey", with = "crate::encoding::b64")]
    pub token_key: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyLists {
    pub providers: Vec<ActorKey>,
    pub mediators: Vec<ActorKey>,
}

/// One provider's offers in a zip-code query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAppointments {
    pub provider: SignedProviderData,
    pub offers: Vec<SignedAppointment>,
    /// Slot ids with a live booking, across all returned offers.
    pub booked: Vec<Id>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_code_params_validate_bounds() {
        let ok = GetAppointmentsByZipCodeParams {
            zip_code: "10115".into(),
            radius: 30,
        };
        assert!(ok.validate().is_ok());

        let bad_zip = GetAppointmentsByZipCodeParams {
            zip_code: "1011".into(),
            radius: 30,
        };
        assert!(bad_zip.validate().is_err());

        let bad_radius = GetAppointmentsByZipCodeParams {
            zip_code: "10115".into(),
            radius: 81,
        };
        assert!(bad_radius.validate().is_err());
    }

    #[test]
    fn codes_data_rejects_unknown_actor() {
        let data = CodesData {
            actor: "admin".into(),
            timestamp: chrono::Utc::now(),
            codes: vec![],
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn codes_data_checks_code_length() {
        let data = CodesData {
            actor: "user".into(),
            timestamp: chrono::Utc::now(),
            codes: vec![Id::new(vec![1; 8])],
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn listing_limit_caps_n() {
        assert_eq!(ListProviderDataData { n: None }.limit().unwrap(), None);
        assert_eq!(
            ListProviderDataData { n: Some(20) }.limit().unwrap(),
            Some(20)
        );
        assert!(ListProviderDataData { n: Some(0) }.limit().is_err());
        assert!(ListProviderDataData { n: Some(1001) }.limit().is_err());
    }

    #[test]
    fn book_slot_payload_parses_camel_case() {
        let json = format!(
            concat!(
                "{{\"providerID\":\"{}\",\"id\":\"{}\",",
                "\"timestamp\":\"2026-05-01T10:00:00Z\",",
                "\"signedTokenData\":{{\"data\":\"{{}}\",\"signature\":\"AAAA\"}},",
                "\"encryptedData\":{{\"iv\":\"AAAA\",\"data\":\"AAAA\",\"publicKey\":\"AAAA\"}}}}"
            ),
            hex::encode([7u8; 32]),
            hex::encode([9u8; 16]),
        );
        let data: BookSlotData = serde_json::from_str(&json).unwrap();
        assert_eq!(data.provider_id.as_bytes(), &[7u8; 32]);
        assert_eq!(data.id.as_bytes(), &[9u8; 16]);
    }
}
