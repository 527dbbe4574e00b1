//! Anonymous priority-token issuance: a monotonic counter drives an
//! HMAC-derived token the server signs and the user later spends on a
//! booking.

use termin_core::error::ApiError;
use termin_core::params::GetTokenParams;
use termin_core::token::{SignedTokenData, TokenData};
use termin_crypto::{derive_priority_token, sign_json};

use crate::service::{internal, Broker, K_PRIMARY, T_CODES, T_PRIORITY_TOKEN};

impl Broker {
    /// `getToken` — issue one signed priority token.
    ///
    /// With user codes enabled the caller must present a known invitation
    /// code; redemption is counted after successful issuance and the code is
    /// evicted once its count passes the reuse limit.
    pub fn get_token(&self, params: &GetTokenParams) -> Result<SignedTokenData, ApiError> {
        params.validate()?;

        if self.user_codes.enabled {
            let code = params.code.as_ref().ok_or(ApiError::NotAuthorized)?;
            let known = self
                .db
                .set_has(T_CODES, b"user", code.as_bytes())
                .map_err(internal)?;
            if !known {
                return Err(ApiError::NotAuthorized);
            }
        }

        let counter = self.next_counter()?;
        let token = derive_priority_token(&self.secret, counter);

        let token_data = TokenData {
            public_key: params.public_key.clone(),
            token: token.to_vec(),
            hash: params.hash.clone(),
        };
        let signed = sign_json(&self.token_keypair, &token_data).map_err(internal)?;

        if self.user_codes.enabled {
            // Checked above; redemption counts only successful issuance.
            let code = params.code.as_ref().ok_or(ApiError::NotAuthorized)?;
            self.redeem_code(&*self.db, "user", code, self.user_codes.reuse_limit)?;
        }

        Ok(signed)
    }

    /// Increment the 64-bit issuance counter (little-endian, absent = 0).
    /// The read-increment-write runs under a process-wide lock; the counter
    /// must never decrease.
    fn next_counter(&self) -> Result<u64, ApiError> {
        let _guard = self
            .token_counter_lock
            .lock()
            .map_err(|_| ApiError::Internal)?;
        let current = self
            .db
            .value_get(T_PRIORITY_TOKEN, K_PRIMARY)
            .map_err(internal)?
            .map(|raw| {
                raw.as_slice()
                    .try_into()
                    .map(u64::from_le_bytes)
                    .map_err(|_| internal("malformed token counter"))
            })
            .transpose()?
            .unwrap_or(0);
        let next = current + 1;
        self.db
            .value_set(T_PRIORITY_TOKEN, K_PRIMARY, &next.to_le_bytes(), None)
            .map_err(internal)?;
        Ok(next)
    }
}
