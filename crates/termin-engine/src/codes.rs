//! Invitation codes: root-managed code sets per actor kind and the shared
//! redemption counter with reuse-limit eviction.

use termin_core::envelope::Signed;
use termin_core::error::ApiError;
use termin_core::params::CodesData;
use termin_core::types::Id;
use termin_store::StoreOps;

use crate::service::{internal, Broker, T_CODES, T_CODE_SCORES};

impl Broker {
    /// `addCodes` — root-only. Existing codes survive; adding is idempotent.
    pub fn add_codes(&self, params: &Signed<CodesData>) -> Result<(), ApiError> {
        params.validate_envelope()?;
        self.verify_root(params.signed_bytes(), &params.signature)?;
        let data = params.parse()?;
        data.validate()?;
        self.check_freshness(&data.timestamp)?;

        for code in &data.codes {
            self.db
                .set_add(T_CODES, data.actor.as_bytes(), code.as_bytes())
                .map_err(internal)?;
        }
        Ok(())
    }

    /// Redeem a code against an actor's code set: unknown codes are a 401,
    /// each redemption bumps the score, and a code whose score passes the
    /// reuse limit is evicted. A code at exactly the limit is still
    /// redeemable once more.
    pub(crate) fn redeem_code<O: StoreOps + ?Sized>(
        &self,
        ops: &O,
        actor: &str,
        code: &Id,
        reuse_limit: i64,
    ) -> Result<(), ApiError> {
        let known = ops
            .set_has(T_CODES, actor.as_bytes(), code.as_bytes())
            .map_err(internal)?;
        if !known {
            return Err(ApiError::NotAuthorized);
        }

        let score = ops
            .sorted_set_incr(T_CODE_SCORES, actor.as_bytes(), code.as_bytes(), 1)
            .map_err(internal)?;
        if score > reuse_limit {
            ops.set_del(T_CODES, actor.as_bytes(), code.as_bytes())
                .map_err(internal)?;
            ops.sorted_set_del(T_CODE_SCORES, actor.as_bytes(), code.as_bytes())
                .map_err(internal)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::tests::test_broker;

    #[test]
    fn unknown_code_is_rejected() {
        let (broker, db) = test_broker();
        let err = broker
            .redeem_code(db.as_ref(), "user", &Id::new(vec![1; 16]), 3)
            .unwrap_err();
        assert_eq!(err, ApiError::NotAuthorized);
    }

    #[test]
    fn code_at_limit_still_redeemable_then_evicted() {
        let (broker, db) = test_broker();
        let code = Id::new(vec![2; 16]);
        db.set_add(T_CODES, b"user", code.as_bytes()).unwrap();

        // Limit 2: redemptions 1 and 2 keep the code, the score now equals
        // the limit; redemption 3 pushes it over and evicts.
        for _ in 0..2 {
            broker.redeem_code(db.as_ref(), "user", &code, 2).unwrap();
            assert!(db.set_has(T_CODES, b"user", code.as_bytes()).unwrap());
        }
        broker.redeem_code(db.as_ref(), "user", &code, 2).unwrap();
        assert!(!db.set_has(T_CODES, b"user", code.as_bytes()).unwrap());

        // And the next attempt fails.
        let err = broker.redeem_code(db.as_ref(), "user", &code, 2).unwrap_err();
        assert_eq!(err, ApiError::NotAuthorized);
    }
}
