//! keygen — generate a settings-file skeleton with fresh server key
//! material: the root, token and provider-data ECDSA keypairs plus the
//! 32-byte HMAC secret.
//!
//! The output contains private keys; store it accordingly. The server
//! itself only needs the token private key, the root/provider-data private
//! keys belong to the operator's offline tooling.

use clap::Parser;
use rand::RngCore;

use termin_engine::{NamedKey, Settings};
use termin_crypto::EcdsaKeyPair;

#[derive(Parser, Debug)]
#[command(name = "keygen", version, about = "Generate termin server keys")]
struct Args {
    /// Emit compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,
}

fn named_key(name: &str, keypair: &EcdsaKeyPair) -> NamedKey {
    NamedKey {
        name: name.into(),
        public_key: keypair.public_key().to_vec(),
        private_key: Some(keypair.secret_bytes().to_vec()),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);

    let settings = Settings {
        secret,
        keys: vec![
            named_key("root", &EcdsaKeyPair::generate()),
            named_key("token", &EcdsaKeyPair::generate()),
            named_key("provider", &EcdsaKeyPair::generate()),
        ],
        user_codes_enabled: false,
        user_codes_reuse_limit: 0,
        provider_codes_enabled: false,
        provider_codes_reuse_limit: 0,
        settings_ttl_days: 14,
    };

    let out = if args.compact {
        serde_json::to_string(&settings)?
    } else {
        serde_json::to_string_pretty(&settings)?
    };
    println!("{out}");
    Ok(())
}
