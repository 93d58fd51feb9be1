use nostr_sdk::prelude::{FromBech32, PublicKey as NostrPublicKey, ToBech32};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublicKeyError {
    #[error("invalid hex public key: {0}")]
    Hex(String),

    #[error("invalid npub: {0}")]
    Npub(String),
}

/// 32 byte x-only public key identifying a nostr user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(NostrPublicKey);

impl PublicKey {
    pub fn from_hex(value: &str) -> Result<Self, PublicKeyError> {
        NostrPublicKey::from_hex(value.trim())
            .map(Self)
            .map_err(|err| PublicKeyError::Hex(err.to_string()))
    }

    pub fn from_npub(value: &str) -> Result<Self, PublicKeyError> {
        NostrPublicKey::from_bech32(value.trim())
            .map(Self)
            .map_err(|err| PublicKeyError::Npub(err.to_string()))
    }

    pub fn hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn npub(&self) -> Option<String> {
        self.0.to_bech32().ok()
    }
}

impl From<NostrPublicKey> for PublicKey {
    fn from(value: NostrPublicKey) -> Self {
        Self(value)
    }
}

/// Accepts either encoding used at the boundary.
impl FromStr for PublicKey {
    type Err = PublicKeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().starts_with("npub") {
            Self::from_npub(value)
        } else {
            Self::from_hex(value)
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_sdk::prelude::Keys;

    #[test]
    fn hex_and_npub_decode_to_the_same_key() {
        let keys = Keys::generate();
        let hex = keys.public_key().to_hex();
        let npub = keys.public_key().to_bech32().unwrap();

        let from_hex = PublicKey::from_hex(&hex).unwrap();
        let from_npub = PublicKey::from_npub(&npub).unwrap();

        assert_eq!(from_hex, from_npub);
        assert_eq!(from_hex.hex(), hex);
        assert_eq!(from_hex.npub().unwrap(), npub);
    }

    #[test]
    fn from_str_detects_encoding() {
        let keys = Keys::generate();
        let npub = keys.public_key().to_bech32().unwrap();
        let parsed: PublicKey = npub.parse().unwrap();
        assert_eq!(parsed.hex(), keys.public_key().to_hex());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(PublicKey::from_hex("abcd").is_err());
        assert!(PublicKey::from_hex(&"zz".repeat(32)).is_err());
        assert!(PublicKey::from_npub("npub1notreally").is_err());
    }
}
