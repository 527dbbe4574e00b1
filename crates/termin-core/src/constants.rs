//! Protocol constants.

/// Signed requests carry a timestamp and are valid for one minute.
pub const SIGNED_REQUEST_MAX_AGE_SECS: i64 = 60;

/// Idle TTL for per-provider appointment and booking maps, reset on every
/// write.
pub const APPOINTMENT_IDLE_TTL_DAYS: i64 = 120;

/// Appointment duration bounds, in minutes.
pub const MIN_APPOINTMENT_DURATION_MINUTES: i64 = 5;
pub const MAX_APPOINTMENT_DURATION_MINUTES: i64 = 300;

/// Zip-code search radius bounds, in kilometers.
pub const MIN_SEARCH_RADIUS_KM: i64 = 5;
pub const MAX_SEARCH_RADIUS_KM: i64 = 80;

/// Invitation codes are 16–32 raw bytes, hex on the wire.
pub const MIN_CODE_BYTES: usize = 16;
pub const MAX_CODE_BYTES: usize = 32;

/// Signature and public-key size bounds (raw bytes, base64 on the wire).
pub const MIN_SIGNATURE_BYTES: usize = 30;
pub const MAX_SIGNATURE_BYTES: usize = 1000;
pub const MIN_PUBLIC_KEY_BYTES: usize = 30;
pub const MAX_PUBLIC_KEY_BYTES: usize = 1000;

/// German zip codes are exactly five digits.
pub const ZIP_CODE_LEN: usize = 5;

/// Appointment/slot/booking ids are 16 bytes (32 hex chars).
pub const RECORD_ID_BYTES: usize = 16;

/// Provider ids are SHA-256 hashes of the signing public key.
pub const PROVIDER_ID_BYTES: usize = 32;

/// Priority tokens are HMAC-SHA-256 outputs.
pub const PRIORITY_TOKEN_BYTES: usize = 32;

/// Cap on `n` for pending/verified provider listings.
pub const MAX_LISTING_LIMIT: i64 = 1000;
