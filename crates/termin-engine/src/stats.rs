//! Time-windowed metering. Handlers emit anonymous usage samples (slot
//! counts, bookings, cancellations) into hour and day windows persisted in
//! the store; `getStats` reads them back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use termin_core::error::ApiError;
use termin_core::params::{GetStatsParams, StatsValue};

use crate::service::{internal, Broker, T_STATS};

const WINDOWS: &[(&str, i64)] = &[("hour", 3600), ("day", 86400)];

fn window_secs(kind: &str) -> Result<i64, ApiError> {
    WINDOWS
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, secs)| *secs)
        .ok_or_else(|| ApiError::malformed("type must be hour or day"))
}

fn series_key(name: &str, window: &str) -> Vec<u8> {
    format!("{name}::{window}").into_bytes()
}

fn sample_field(start: i64, scope: &BTreeMap<String, String>) -> Result<Vec<u8>, ApiError> {
    let scope_json = serde_json::to_string(scope).map_err(internal)?;
    Ok(format!("{start}:{scope_json}").into_bytes())
}

fn parse_field(field: &[u8]) -> Option<(i64, BTreeMap<String, String>)> {
    let text = std::str::from_utf8(field).ok()?;
    let (start, scope_json) = text.split_once(':')?;
    Some((start.parse().ok()?, serde_json::from_str(scope_json).ok()?))
}

fn decode_value(raw: &[u8]) -> i64 {
    raw.try_into().map(i64::from_le_bytes).unwrap_or(0)
}

impl Broker {
    /// Add `value` to the counter for every window. Metering is a
    /// side-effect; failures are logged and never fail the request.
    pub(crate) fn meter_add(&self, name: &str, scope: &BTreeMap<String, String>, value: i64) {
        if let Err(err) = self.try_meter_add(name, scope, value) {
            warn!(name, %err, "metering sample dropped");
        }
    }

    /// Like [`meter_add`](Self::meter_add) with a one-per-uid-per-window
    /// guarantee, used for activity flags.
    pub(crate) fn meter_add_once(
        &self,
        name: &str,
        scope: &BTreeMap<String, String>,
        uid: &[u8],
    ) {
        if let Err(err) = self.try_meter_add_once(name, scope, uid) {
            warn!(name, %err, "metering sample dropped");
        }
    }

    fn try_meter_add(
        &self,
        name: &str,
        scope: &BTreeMap<String, String>,
        value: i64,
    ) -> Result<(), ApiError> {
        let now = Utc::now().timestamp();
        for (window, secs) in WINDOWS {
            let start = now - now.rem_euclid(*secs);
            let key = series_key(name, window);
            let field = sample_field(start, scope)?;
            let current = self
                .db
                .map_get(T_STATS, &key, &field)
                .map_err(internal)?
                .map(|raw| decode_value(&raw))
                .unwrap_or(0);
            self.db
                .map_set(T_STATS, &key, &field, &(current + value).to_le_bytes())
                .map_err(internal)?;
        }
        Ok(())
    }

    fn try_meter_add_once(
        &self,
        name: &str,
        scope: &BTreeMap<String, String>,
        uid: &[u8],
    ) -> Result<(), ApiError> {
        let now = Utc::now().timestamp();
        for (window, secs) in WINDOWS {
            let start = now - now.rem_euclid(*secs);
            let seen_key = {
                let mut k = series_key(name, window);
                k.extend_from_slice(b"::seen");
                k
            };
            let mut member = sample_field(start, scope)?;
            member.push(b'#');
            member.extend_from_slice(uid);
            if self
                .db
                .set_has(T_STATS, &seen_key, &member)
                .map_err(internal)?
            {
                continue;
            }
            self.db
                .set_add(T_STATS, &seen_key, &member)
                .map_err(internal)?;

            let key = series_key(name, window);
            let field = sample_field(start, scope)?;
            let current = self
                .db
                .map_get(T_STATS, &key, &field)
                .map_err(internal)?
                .map(|raw| decode_value(&raw))
                .unwrap_or(0);
            self.db
                .map_set(T_STATS, &key, &field, &(current + 1).to_le_bytes())
                .map_err(internal)?;
        }
        Ok(())
    }

    /// `getStats` — windowed counters for one metric, filtered by scope.
    pub fn get_stats(&self, params: &GetStatsParams) -> Result<Vec<StatsValue>, ApiError> {
        let secs = window_secs(&params.kind)?;
        let now = Utc::now().timestamp();

        let (from_ts, to_ts) = match (params.n, &params.from, &params.to) {
            (Some(n), _, _) => {
                if n < 1 {
                    return Err(ApiError::malformed("n must be positive"));
                }
                let end = now - now.rem_euclid(secs) + secs;
                (end - n * secs, end)
            }
            (None, Some(from), to) => (
                from.timestamp(),
                to.as_ref().map(|t| t.timestamp()).unwrap_or(now + secs),
            ),
            (None, None, _) => {
                return Err(ApiError::malformed("either n or from is required"));
            }
        };

        let entries = self
            .db
            .map_get_all(T_STATS, &series_key(&params.name, &params.kind))
            .map_err(internal)?;

        let mut values = Vec::new();
        for (field, raw) in entries {
            let Some((start, scope)) = parse_field(&field) else {
                continue;
            };
            if start < from_ts || start >= to_ts {
                continue;
            }
            if let Some(filter) = &params.filter {
                let matches = filter.iter().all(|(k, v)| scope.get(k) == Some(v));
                if !matches {
                    continue;
                }
            }
            let from = DateTime::<Utc>::from_timestamp(start, 0).ok_or(ApiError::Internal)?;
            let to = DateTime::<Utc>::from_timestamp(start + secs, 0).ok_or(ApiError::Internal)?;
            values.push(StatsValue {
                name: params.name.clone(),
                from,
                to,
                data: scope,
                value: decode_value(&raw),
            });
        }
        values.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.data.cmp(&b.data)));
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::test_broker;

    fn scope(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn samples_accumulate_within_a_window() {
        let (broker, _) = test_broker();
        broker.meter_add("bookings", &scope(&[]), 1);
        broker.meter_add("bookings", &scope(&[]), 2);

        let values = broker
            .get_stats(&GetStatsParams {
                name: "bookings".into(),
                kind: "hour".into(),
                filter: None,
                from: None,
                to: None,
                n: Some(1),
            })
            .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, 3);
    }

    #[test]
    fn scope_filter_selects_matching_samples() {
        let (broker, _) = test_broker();
        broker.meter_add("open", &scope(&[("zipCode", "10115")]), 5);
        broker.meter_add("open", &scope(&[("zipCode", "20095")]), 7);

        let values = broker
            .get_stats(&GetStatsParams {
                name: "open".into(),
                kind: "day".into(),
                filter: Some(scope(&[("zipCode", "10115")])),
                from: None,
                to: None,
                n: Some(1),
            })
            .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, 5);
    }

    #[test]
    fn add_once_dedupes_per_uid() {
        let (broker, _) = test_broker();
        broker.meter_add_once("active", &scope(&[]), b"provider-a");
        broker.meter_add_once("active", &scope(&[]), b"provider-a");
        broker.meter_add_once("active", &scope(&[]), b"provider-b");

        let values = broker
            .get_stats(&GetStatsParams {
                name: "active".into(),
                kind: "hour".into(),
                filter: None,
                from: None,
                to: None,
                n: Some(1),
            })
            .unwrap();
        assert_eq!(values[0].value, 2);
    }

    #[test]
    fn unknown_window_kind_is_rejected() {
        let (broker, _) = test_broker();
        let err = broker
            .get_stats(&GetStatsParams {
                name: "bookings".into(),
                kind: "week".into(),
                filter: None,
                from: None,
                to: None,
                n: Some(1),
            })
            .unwrap_err();
        assert_eq!(err.code(), 400);
    }
}
