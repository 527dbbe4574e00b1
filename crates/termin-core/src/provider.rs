use serde::{Deserialize, Serialize};

use crate::envelope::Signed;

/// Public provider profile, signed by the provider. Stored only for
/// providers whose mediator published a public record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(rename = "zipCode", default)]
    pub zip_code: String,
    #[serde(default)]
    pub description: String,
}

pub type SignedProviderData = Signed<ProviderData>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_provider_data_parses_payload() {
        let data = ProviderData {
            name: "Praxis Mitte".into(),
            zip_code: "10115".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&data).unwrap();
        let signed: SignedProviderData =
            Signed::from_parts(json, vec![1; 64], Some(vec![2; 33]));
        let parsed = signed.parse().unwrap();
        assert_eq!(parsed.name, "Praxis Mitte");
        assert_eq!(parsed.zip_code, "10115");
    }
}
