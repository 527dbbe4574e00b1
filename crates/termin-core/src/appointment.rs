use serde::{Deserialize, Serialize};

use crate::constants::{MAX_APPOINTMENT_DURATION_MINUTES, MIN_APPOINTMENT_DURATION_MINUTES};
use crate::envelope::{EcdhEncryptedData, Signed};
use crate::error::ApiError;
use crate::types::{Id, Timestamp};

/// A provider-offered time window containing one or more bookable slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub timestamp: Timestamp,
    /// Duration in minutes.
    pub duration: i64,
    /// Free-form properties (vaccine kind etc.), opaque to the server.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "slotData")]
    pub slot_data: Vec<Slot>,
    pub id: Id,
    #[serde(rename = "publicKey", with = "crate::encoding::b64")]
    pub public_key: Vec<u8>,
}

impl Appointment {
    /// Structural checks applied on publish.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.id.len() != crate::constants::RECORD_ID_BYTES {
            return Err(ApiError::malformed("appointment id must be 16 bytes"));
        }
        if self.duration < MIN_APPOINTMENT_DURATION_MINUTES
            || self.duration > MAX_APPOINTMENT_DURATION_MINUTES
        {
            return Err(ApiError::malformed("appointment duration out of range"));
        }
        for slot in &self.slot_data {
            if slot.id.len() != crate::constants::RECORD_ID_BYTES {
                return Err(ApiError::malformed("slot id must be 16 bytes"));
            }
        }
        Ok(())
    }

    pub fn has_slot(&self, slot_id: &Id) -> bool {
        self.slot_data.iter().any(|s| &s.id == slot_id)
    }
}

/// A single bookable unit within an appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Id,
}

/// A signed appointment as published by a provider and stored verbatim.
/// The server annotates responses with `updatedAt` and, depending on the
/// caller, attached bookings (provider view) or booked slot ids (user view).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedAppointment {
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bookings: Vec<Booking>,
    #[serde(rename = "bookedSlots", default, skip_serializing_if = "Vec::is_empty")]
    pub booked_slots: Vec<Slot>,
    #[serde(flatten)]
    pub signed: Signed<Appointment>,
}

impl SignedAppointment {
    pub fn new(signed: Signed<Appointment>) -> Self {
        Self {
            updated_at: None,
            bookings: Vec::new(),
            booked_slots: Vec::new(),
            signed,
        }
    }
}

/// The binding of a slot to an anonymous user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    /// Slot id.
    pub id: Id,
    #[serde(rename = "publicKey", with = "crate::encoding::b64")]
    pub public_key: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub token: Vec<u8>,
    #[serde(rename = "encryptedData")]
    pub encrypted_data: EcdhEncryptedData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn appointment(duration: i64) -> Appointment {
        Appointment {
            timestamp: Utc::now(),
            duration,
            properties: serde_json::Map::new(),
            slot_data: vec![Slot { id: Id::random() }],
            id: Id::random(),
            public_key: vec![2; 33],
        }
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        assert!(appointment(5).validate().is_ok());
        assert!(appointment(300).validate().is_ok());
        assert!(appointment(4).validate().is_err());
        assert!(appointment(301).validate().is_err());
    }

    #[test]
    fn has_slot_matches_by_id() {
        let appt = appointment(30);
        let slot_id = appt.slot_data[0].id.clone();
        assert!(appt.has_slot(&slot_id));
        assert!(!appt.has_slot(&Id::random()));
    }

    #[test]
    fn signed_appointment_flattens_envelope_fields() {
        let appt = appointment(60);
        let json = serde_json::to_string(&appt).unwrap();
        let signed = SignedAppointment::new(Signed::from_parts(
            json.clone(),
            vec![1; 64],
            Some(vec![2; 33]),
        ));
        let wire = serde_json::to_value(&signed).unwrap();
        assert_eq!(wire["data"].as_str().unwrap(), json);
        assert!(wire.get("signature").is_some());
        // Annotations are absent until the server sets them.
        assert!(wire.get("updatedAt").is_none());
        assert!(wire.get("bookedSlots").is_none());

        let back: SignedAppointment = serde_json::from_value(wire).unwrap();
        assert_eq!(back.signed.parse().unwrap().id, appt.id);
    }
}
