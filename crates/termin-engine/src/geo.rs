//! Zip-code geo index: a `from:to` distance map plus symmetric per-zip
//! neighbor sorted-sets scored by integer distance.

use termin_core::envelope::Signed;
use termin_core::error::ApiError;
use termin_core::params::UploadDistancesData;

use crate::service::{internal, Broker, T_DISTANCES};

fn neighbors_table(kind: &str) -> String {
    format!("distances::neighbors::{kind}")
}

fn pair_field(from: &str, to: &str) -> Vec<u8> {
    format!("{from}:{to}").into_bytes()
}

impl Broker {
    /// `uploadDistances` — root-only bulk upload of the distance matrix.
    pub fn upload_distances(&self, params: &Signed<UploadDistancesData>) -> Result<(), ApiError> {
        params.validate_envelope()?;
        self.verify_root(params.signed_bytes(), &params.signature)?;
        let data = params.parse()?;
        data.validate()?;
        self.check_freshness(&data.timestamp)?;

        let neighbors = neighbors_table(&data.kind);
        for d in &data.distances {
            self.db
                .map_set(
                    T_DISTANCES,
                    data.kind.as_bytes(),
                    &pair_field(&d.from, &d.to),
                    &d.distance.to_le_bytes(),
                )
                .map_err(internal)?;

            let score = d.distance.floor() as i64;
            self.db
                .sorted_set_add(&neighbors, d.from.as_bytes(), d.to.as_bytes(), score)
                .map_err(internal)?;
            self.db
                .sorted_set_add(&neighbors, d.to.as_bytes(), d.from.as_bytes(), score)
                .map_err(internal)?;
        }
        Ok(())
    }

    /// Distance between two zips, checking both key orders.
    pub(crate) fn get_distance(
        &self,
        kind: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<f64>, ApiError> {
        let forward = self
            .db
            .map_get(T_DISTANCES, kind.as_bytes(), &pair_field(from, to))
            .map_err(internal)?;
        let raw = match forward {
            Some(raw) => Some(raw),
            None => self
                .db
                .map_get(T_DISTANCES, kind.as_bytes(), &pair_field(to, from))
                .map_err(internal)?,
        };
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| internal("malformed distance value"))?;
                Ok(Some(f64::from_le_bytes(arr)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::{sign_root, test_broker};
    use chrono::Utc;
    use termin_core::params::{Distance, UploadDistancesData};

    #[test]
    fn distances_are_symmetric() {
        let (broker, _) = test_broker();
        let params = sign_root(&UploadDistancesData {
            timestamp: Utc::now(),
            kind: "zipCode".into(),
            distances: vec![Distance {
                from: "10115".into(),
                to: "10117".into(),
                distance: 3.0,
            }],
        });
        broker.upload_distances(&params).unwrap();

        assert_eq!(
            broker.get_distance("zipCode", "10115", "10117").unwrap(),
            Some(3.0)
        );
        assert_eq!(
            broker.get_distance("zipCode", "10117", "10115").unwrap(),
            Some(3.0)
        );
        assert_eq!(broker.get_distance("zipCode", "10115", "99999").unwrap(), None);
    }
}
