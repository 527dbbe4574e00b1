use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Derive the priority token for a counter value:
/// HMAC-SHA-256(secret, little-endian u64).
///
/// Tokens are monotonically ordered by counter on the server side but
/// unlinkable for clients, which only ever see the MAC output.
pub fn derive_priority_token(secret: &[u8], counter: u64) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&counter.to_le_bytes());
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_deterministic_per_counter() {
        let a = derive_priority_token(b"secret", 1);
        let b = derive_priority_token(b"secret", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn tokens_differ_across_counters_and_secrets() {
        let a = derive_priority_token(b"secret", 1);
        assert_ne!(a, derive_priority_token(b"secret", 2));
        assert_ne!(a, derive_priority_token(b"other", 1));
    }

    #[test]
    fn counter_bytes_are_little_endian() {
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(&[1, 0, 0, 0, 0, 0, 0, 0]);
        let expected: [u8; 32] = mac.finalize().into_bytes().into();
        assert_eq!(derive_priority_token(b"secret", 1), expected);
    }
}
