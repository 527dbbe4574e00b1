//! The appointment/slot/booking state engine: publishing offers, booking
//! slots, cancellations, and the public zip-code query.

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, Utc};
use tracing::warn;

use termin_core::appointment::{Booking, SignedAppointment};
use termin_core::constants::APPOINTMENT_IDLE_TTL_DAYS;
use termin_core::envelope::Signed;
use termin_core::error::ApiError;
use termin_core::params::{
    BookSlotData, CancelBookingData, CancelSlotData, GetAppointmentsByZipCodeParams,
    ProviderAppointments, PublishAppointmentsData, TimestampedData,
};
use termin_core::provider::SignedProviderData;
use termin_core::types::Id;
use termin_crypto::{provider_id_from_pubkey, sha256, verify_signature};

use crate::auth::Role;
use crate::service::{
    internal, Broker, K_PUBLIC, K_USED_TOKENS, T_APPOINTMENTS, T_BOOKINGS, T_PROVIDER_DATA,
};

fn idle_ttl() -> Duration {
    Duration::days(APPOINTMENT_IDLE_TTL_DAYS)
}

fn global_scope() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn zip_scope(zip: &str) -> BTreeMap<String, String> {
    let mut scope = BTreeMap::new();
    scope.insert("zipCode".to_string(), zip.to_string());
    scope
}

impl Broker {
    /// `publishAppointments` — provider-only, transactional.
    ///
    /// Offers overwrite by appointment id. With `reset`, appointments absent
    /// from the submission are dropped, and bookings whose slot no longer
    /// exists are removed together with their tokens (the tokens become
    /// redeemable again). Without `reset`, stale appointments and bookings
    /// survive until expiry or the next reset.
    pub fn publish_appointments(
        &self,
        params: &Signed<PublishAppointmentsData>,
    ) -> Result<(), ApiError> {
        params.validate_envelope()?;
        let data = params.parse()?;
        let public_key = params.require_public_key()?;
        let actor = self.authenticate(
            Role::Provider,
            params.signed_bytes(),
            &params.signature,
            public_key,
        )?;
        self.check_freshness(&data.timestamp)?;

        let provider_id = provider_id_from_pubkey(public_key);
        let h = provider_id.as_bytes();
        let now = Utc::now();

        let mut txn = self.db.begin().map_err(internal)?;
        txn.watch(T_APPOINTMENTS, h).map_err(internal)?;
        txn.watch(T_BOOKINGS, h).map_err(internal)?;
        txn.watch(T_BOOKINGS, K_USED_TOKENS).map_err(internal)?;

        let bookings = txn.map_get_all(T_BOOKINGS, h).map_err(internal)?;
        let booked_slots: HashSet<Vec<u8>> =
            bookings.iter().map(|(slot, _)| slot.clone()).collect();

        let mut open = 0i64;
        let mut booked = 0i64;
        let mut submitted_appointments: HashSet<Vec<u8>> = HashSet::new();
        let mut submitted_slots: HashSet<Vec<u8>> = HashSet::new();

        for offer in &data.offers {
            offer.signed.validate_envelope()?;
            let appointment = offer.signed.parse()?;
            appointment.validate()?;

            let mut stored = offer.clone();
            stored.updated_at = Some(now);
            stored.bookings.clear();
            stored.booked_slots.clear();
            let encoded = serde_json::to_vec(&stored).map_err(internal)?;
            txn.map_set(T_APPOINTMENTS, h, appointment.id.as_bytes(), &encoded)
                .map_err(internal)?;

            submitted_appointments.insert(appointment.id.as_bytes().to_vec());
            for slot in &appointment.slot_data {
                submitted_slots.insert(slot.id.as_bytes().to_vec());
                if booked_slots.contains(slot.id.as_bytes()) {
                    booked += 1;
                } else {
                    open += 1;
                }
            }
        }

        if data.reset {
            let existing = txn.map_get_all(T_APPOINTMENTS, h).map_err(internal)?;
            for (appointment_id, _) in existing {
                if !submitted_appointments.contains(&appointment_id) {
                    txn.map_del(T_APPOINTMENTS, h, &appointment_id)
                        .map_err(internal)?;
                }
            }
            for (slot_id, raw) in &bookings {
                if submitted_slots.contains(slot_id) {
                    continue;
                }
                txn.map_del(T_BOOKINGS, h, slot_id).map_err(internal)?;
                match serde_json::from_slice::<Booking>(raw) {
                    Ok(booking) => {
                        txn.set_del(T_BOOKINGS, K_USED_TOKENS, &booking.token)
                            .map_err(internal)?;
                    }
                    Err(err) => warn!(%err, "undecodable booking dropped without token release"),
                }
            }
        }

        txn.expire(T_APPOINTMENTS, h, idle_ttl()).map_err(internal)?;
        txn.expire(T_BOOKINGS, h, idle_ttl()).map_err(internal)?;
        txn.commit().map_err(internal)?;

        // Metering, keyed globally and by the provider's zip code.
        let zip = actor
            .provider_key_data()
            .ok()
            .and_then(|pkd| pkd.queue_data)
            .map(|q| q.zip_code)
            .unwrap_or_default();
        for scope in [global_scope(), zip_scope(&zip)] {
            self.meter_add_once("active", &scope, h);
            self.meter_add("open", &scope, open);
            self.meter_add("booked", &scope, booked);
        }
        Ok(())
    }

    /// `bookSlot` — bind a slot to an anonymous user, consuming a priority
    /// token. Transactional; the check order is fixed and observable through
    /// the distinct error codes.
    pub fn book_slot(&self, params: &Signed<BookSlotData>) -> Result<(), ApiError> {
        params.validate_envelope()?;
        let data = params.parse()?;

        // 1. The token blob must carry a valid server signature.
        let signed_token = &data.signed_token_data;
        verify_signature(
            self.token_keypair.public_key(),
            signed_token.signed_bytes(),
            &signed_token.signature,
        )
        .map_err(|_| ApiError::InvalidSignature)?;
        let token = signed_token.parse()?.token;

        let h = data.provider_id.as_bytes();
        let mut txn = self.db.begin().map_err(internal)?;
        txn.watch(T_APPOINTMENTS, h).map_err(internal)?;
        txn.watch(T_BOOKINGS, h).map_err(internal)?;
        txn.watch(T_BOOKINGS, K_USED_TOKENS).map_err(internal)?;

        // 2. Single use: a consumed token cannot book again.
        if txn
            .set_has(T_BOOKINGS, K_USED_TOKENS, &token)
            .map_err(internal)?
        {
            return Err(ApiError::NotAuthorized);
        }

        // 3. The outer envelope must verify with the user's key.
        let public_key = params.require_public_key()?;
        verify_signature(public_key, params.signed_bytes(), &params.signature)
            .map_err(|_| ApiError::InvalidSignature)?;
        self.check_freshness(&data.timestamp)?;

        // 4. The slot must exist in a live appointment of this provider.
        let appointments = txn.map_get_all(T_APPOINTMENTS, h).map_err(internal)?;
        let slot_exists = appointments.iter().any(|(_, raw)| {
            serde_json::from_slice::<SignedAppointment>(raw)
                .ok()
                .and_then(|sa| sa.signed.parse().ok())
                .map(|appointment| appointment.has_slot(&data.id))
                .unwrap_or(false)
        });
        if !slot_exists {
            return Err(ApiError::NotFound);
        }

        // 5. A held slot can only be rebooked by the same user.
        if let Some(raw) = txn
            .map_get(T_BOOKINGS, h, data.id.as_bytes())
            .map_err(internal)?
        {
            let existing: Booking = serde_json::from_slice(&raw).map_err(internal)?;
            if existing.public_key != public_key {
                return Err(ApiError::PermissionDenied);
            }
        }

        // 6.–7. Write the booking and consume the token.
        let booking = Booking {
            id: data.id.clone(),
            public_key: public_key.to_vec(),
            token: token.clone(),
            encrypted_data: data.encrypted_data.clone(),
        };
        let encoded = serde_json::to_vec(&booking).map_err(internal)?;
        txn.map_set(T_BOOKINGS, h, data.id.as_bytes(), &encoded)
            .map_err(internal)?;
        txn.set_add(T_BOOKINGS, K_USED_TOKENS, &token)
            .map_err(internal)?;
        txn.expire(T_BOOKINGS, h, idle_ttl()).map_err(internal)?;

        txn.commit().map_err(internal)?;

        self.meter_add("bookings", &global_scope(), 1);
        Ok(())
    }

    /// `cancelSlot` — a user releases a held slot; the token becomes
    /// redeemable again.
    pub fn cancel_slot(&self, params: &Signed<CancelSlotData>) -> Result<(), ApiError> {
        params.validate_envelope()?;
        let data = params.parse()?;

        let public_key = params.require_public_key()?;
        verify_signature(public_key, params.signed_bytes(), &params.signature)
            .map_err(|_| ApiError::InvalidSignature)?;

        let h = data.provider_id.as_bytes();
        let mut txn = self.db.begin().map_err(internal)?;
        txn.watch(T_BOOKINGS, h).map_err(internal)?;
        txn.watch(T_BOOKINGS, K_USED_TOKENS).map_err(internal)?;

        let raw = txn
            .map_get(T_BOOKINGS, h, data.id.as_bytes())
            .map_err(internal)?
            .ok_or(ApiError::NotFound)?;
        let booking: Booking = serde_json::from_slice(&raw).map_err(internal)?;
        if booking.public_key != public_key {
            return Err(ApiError::PermissionDenied);
        }
        txn.map_del(T_BOOKINGS, h, data.id.as_bytes())
            .map_err(internal)?;

        let signed_token = &data.signed_token_data;
        verify_signature(
            self.token_keypair.public_key(),
            signed_token.signed_bytes(),
            &signed_token.signature,
        )
        .map_err(|_| ApiError::InvalidSignature)?;
        let token = signed_token.parse()?.token;
        if !txn
            .set_has(T_BOOKINGS, K_USED_TOKENS, &token)
            .map_err(internal)?
        {
            return Err(ApiError::NotAuthorized);
        }
        txn.set_del(T_BOOKINGS, K_USED_TOKENS, &token)
            .map_err(internal)?;

        txn.commit().map_err(internal)?;

        self.meter_add("cancellations", &global_scope(), 1);
        Ok(())
    }

    /// `cancelBooking` — a provider drops a booking. Deliberately does NOT
    /// release the user's token: provider cancellation must not re-issue
    /// the slot-booking right.
    pub fn cancel_booking(&self, params: &Signed<CancelBookingData>) -> Result<(), ApiError> {
        params.validate_envelope()?;
        let data = params.parse()?;
        let public_key = params.require_public_key()?;
        self.authenticate(
            Role::Provider,
            params.signed_bytes(),
            &params.signature,
            public_key,
        )?;
        self.check_freshness(&data.timestamp)?;

        let provider_id = provider_id_from_pubkey(public_key);
        self.db
            .map_del(T_BOOKINGS, provider_id.as_bytes(), data.id.as_bytes())
            .map_err(internal)?;
        Ok(())
    }

    /// `getProviderAppointments` — a provider's own offers with their live
    /// bookings attached.
    pub fn get_provider_appointments(
        &self,
        params: &Signed<TimestampedData>,
    ) -> Result<Vec<SignedAppointment>, ApiError> {
        params.validate_envelope()?;
        let public_key = params.require_public_key()?;
        self.authenticate(
            Role::Provider,
            params.signed_bytes(),
            &params.signature,
            public_key,
        )?;
        let data = params.parse()?;
        self.check_freshness(&data.timestamp)?;

        let provider_id = provider_id_from_pubkey(public_key);
        let h = provider_id.as_bytes();
        let bookings = self.load_bookings(h)?;

        let mut appointments = Vec::new();
        for (_, raw) in self.db.map_get_all(T_APPOINTMENTS, h).map_err(internal)? {
            let Ok(mut sa) = serde_json::from_slice::<SignedAppointment>(&raw) else {
                warn!("undecodable stored appointment skipped");
                continue;
            };
            let Ok(appointment) = sa.signed.parse() else {
                continue;
            };
            sa.bookings = appointment
                .slot_data
                .iter()
                .filter_map(|slot| bookings.get(slot.id.as_bytes()).cloned())
                .collect();
            sa.booked_slots.clear();
            appointments.push(sa);
        }
        Ok(appointments)
    }

    /// `getBookedAppointments` — a provider's live bookings.
    pub fn get_booked_appointments(
        &self,
        params: &Signed<TimestampedData>,
    ) -> Result<Vec<Booking>, ApiError> {
        params.validate_envelope()?;
        let public_key = params.require_public_key()?;
        self.authenticate(
            Role::Provider,
            params.signed_bytes(),
            &params.signature,
            public_key,
        )?;
        let data = params.parse()?;
        self.check_freshness(&data.timestamp)?;

        let provider_id = provider_id_from_pubkey(public_key);
        Ok(self
            .load_bookings(provider_id.as_bytes())?
            .into_values()
            .collect())
    }

    /// `getAppointmentsByZipCode` — the public search: providers in range
    /// with a public profile and their future appointments.
    pub fn get_appointments_by_zip_code(
        &self,
        params: &GetAppointmentsByZipCodeParams,
    ) -> Result<Vec<ProviderAppointments>, ApiError> {
        params.validate()?;
        let now = Utc::now();

        let mut results = Vec::new();
        for key in self.list_actor_keys(Role::Provider)? {
            let Ok(pkd) = key.provider_key_data() else {
                warn!("provider key with undecodable metadata skipped");
                continue;
            };
            let zip = pkd
                .queue_data
                .as_ref()
                .map(|q| q.zip_code.clone())
                .unwrap_or_default();

            if zip != params.zip_code {
                match self.get_distance("zipCode", &params.zip_code, &zip)? {
                    Some(distance) if distance <= params.radius as f64 => {}
                    _ => continue,
                }
            }

            let h = sha256(&pkd.signing);
            let Some(raw_provider) = self
                .db
                .map_get(T_PROVIDER_DATA, K_PUBLIC, &h)
                .map_err(internal)?
            else {
                continue;
            };
            let Ok(provider) = serde_json::from_slice::<SignedProviderData>(&raw_provider) else {
                warn!("undecodable public provider record skipped");
                continue;
            };

            let bookings = self.load_bookings(&h)?;
            let mut offers = Vec::new();
            let mut booked: Vec<Id> = Vec::new();
            for (_, raw) in self.db.map_get_all(T_APPOINTMENTS, &h).map_err(internal)? {
                let Ok(mut sa) = serde_json::from_slice::<SignedAppointment>(&raw) else {
                    continue;
                };
                if sa.signed.json.is_empty()
                    || sa.signed.signature.is_empty()
                    || sa.signed.public_key.as_deref().unwrap_or_default().is_empty()
                {
                    continue;
                }
                let Ok(appointment) = sa.signed.parse() else {
                    continue;
                };
                if appointment.timestamp < now {
                    continue;
                }
                sa.bookings.clear();
                sa.booked_slots = appointment
                    .slot_data
                    .iter()
                    .filter(|slot| bookings.contains_key(slot.id.as_bytes()))
                    .cloned()
                    .collect();
                booked.extend(sa.booked_slots.iter().map(|slot| slot.id.clone()));
                offers.push(sa);
            }

            results.push(ProviderAppointments {
                provider,
                offers,
                booked,
            });
        }
        Ok(results)
    }

    fn load_bookings(&self, h: &[u8]) -> Result<BTreeMap<Vec<u8>, Booking>, ApiError> {
        let mut bookings = BTreeMap::new();
        for (slot_id, raw) in self.db.map_get_all(T_BOOKINGS, h).map_err(internal)? {
            match serde_json::from_slice::<Booking>(&raw) {
                Ok(booking) => {
                    bookings.insert(slot_id, booking);
                }
                Err(err) => warn!(%err, "undecodable stored booking skipped"),
            }
        }
        Ok(bookings)
    }
}
