use serde::{Deserialize, Serialize};

use crate::envelope::Signed;

/// Payload of a server-issued priority token. The server signs the JSON of
/// this record with its token key; users present the signed blob when
/// booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    #[serde(
        rename = "publicKey",
        with = "crate::encoding::b64_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_key: Option<Vec<u8>>,
    #[serde(with = "crate::encoding::b64")]
    pub token: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub hash: Vec<u8>,
}

pub type SignedTokenData = Signed<TokenData>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_data_round_trips() {
        let td = TokenData {
            public_key: Some(vec![1; 33]),
            token: vec![2; 32],
            hash: vec![3; 32],
        };
        let json = serde_json::to_string(&td).unwrap();
        let back: TokenData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token, td.token);
        assert_eq!(back.hash, td.hash);
    }
}
