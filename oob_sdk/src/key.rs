use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

pub(crate) const DID_KEY_PREFIX: &str = "did:key:";

/// Multibase prefix for base58btc
const MULTIBASE_BASE58BTC: char = 'z';

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum KeyError {
    #[error("invalid did:key '{0}'")]
    InvalidDidKey(String),
    #[error("invalid key fingerprint '{0}'")]
    InvalidFingerprint(String),
    #[error("unsupported multicodec prefix in '{0}'")]
    UnsupportedMulticodec(String),
    #[error("invalid base58 key '{0}'")]
    InvalidBase58(String),
    #[error("invalid key length {0} for {1}")]
    InvalidLength(usize, KeyType),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Ed25519,
    X25519,
}

impl KeyType {
    /// Unsigned varint encoding of the multicodec for this key type
    fn multicodec(&self) -> [u8; 2] {
        match self {
            // ed25519-pub
            KeyType::Ed25519 => [0xed, 0x01],
            // x25519-pub
            KeyType::X25519 => [0xec, 0x01],
        }
    }

    fn from_multicodec(prefix: &[u8]) -> Option<Self> {
        match prefix {
            [0xed, 0x01] => Some(KeyType::Ed25519),
            [0xec, 0x01] => Some(KeyType::X25519),
            _ => None,
        }
    }

    fn key_length(&self) -> usize {
        32
    }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Ed25519 => write!(f, "Ed25519"),
            KeyType::X25519 => write!(f, "X25519"),
        }
    }
}

/// A public key, identified by its fingerprint.
///
/// The fingerprint is the multibase (base58btc) encoding of the
/// multicodec-prefixed public key, as used by `did:key`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    public_key: Vec<u8>,
    key_type: KeyType,
}

impl Key {
    pub fn from_public_key(public_key: impl Into<Vec<u8>>, key_type: KeyType) -> Result<Self, KeyError> {
        let public_key = public_key.into();

        if public_key.len() != key_type.key_length() {
            return Err(KeyError::InvalidLength(public_key.len(), key_type));
        }

        Ok(Self {
            public_key,
            key_type,
        })
    }

    /// Decode a raw base58 public key, as found in legacy invitations
    pub fn from_public_key_base58(encoded: &str, key_type: KeyType) -> Result<Self, KeyError> {
        let public_key = bs58::decode(encoded)
            .with_alphabet(bs58::Alphabet::BITCOIN)
            .into_vec()
            .map_err(|_| KeyError::InvalidBase58(encoded.to_string()))?;

        Self::from_public_key(public_key, key_type)
    }

    pub fn from_fingerprint(fingerprint: &str) -> Result<Self, KeyError> {
        let Some(encoded) = fingerprint.strip_prefix(MULTIBASE_BASE58BTC) else {
            return Err(KeyError::InvalidFingerprint(fingerprint.to_string()));
        };

        let bytes = bs58::decode(encoded)
            .with_alphabet(bs58::Alphabet::BITCOIN)
            .into_vec()
            .map_err(|_| KeyError::InvalidFingerprint(fingerprint.to_string()))?;

        if bytes.len() < 2 {
            return Err(KeyError::InvalidFingerprint(fingerprint.to_string()));
        }

        let (prefix, public_key) = bytes.split_at(2);
        let key_type = KeyType::from_multicodec(prefix)
            .ok_or_else(|| KeyError::UnsupportedMulticodec(fingerprint.to_string()))?;

        Self::from_public_key(public_key, key_type)
    }

    /// Parse a `did:key`, optionally followed by a `#fragment` key reference
    pub fn from_did_key(did: &str) -> Result<Self, KeyError> {
        let Some(rest) = did.strip_prefix(DID_KEY_PREFIX) else {
            return Err(KeyError::InvalidDidKey(did.to_string()));
        };

        let fingerprint = rest.split('#').next().unwrap_or(rest);

        Self::from_fingerprint(fingerprint).map_err(|_| KeyError::InvalidDidKey(did.to_string()))
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key_base58(&self) -> String {
        bs58::encode(&self.public_key)
            .with_alphabet(bs58::Alphabet::BITCOIN)
            .into_string()
    }

    pub fn fingerprint(&self) -> String {
        let mut v = Vec::with_capacity(2 + self.public_key.len());
        v.extend_from_slice(&self.key_type.multicodec());
        v.extend_from_slice(&self.public_key);

        let encoded = bs58::encode(&v)
            .with_alphabet(bs58::Alphabet::BITCOIN)
            .into_string();

        format!("{MULTIBASE_BASE58BTC}{encoded}")
    }

    pub fn did_key(&self) -> String {
        format!("{DID_KEY_PREFIX}{}", self.fingerprint())
    }

    /// The `did:key` with the key itself as fragment, used as key reference
    pub fn did_key_reference(&self) -> String {
        let fingerprint = self.fingerprint();
        format!("{DID_KEY_PREFIX}{fingerprint}#{fingerprint}")
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

impl From<&ed25519_dalek::VerifyingKey> for Key {
    fn from(key: &ed25519_dalek::VerifyingKey) -> Self {
        Key {
            public_key: key.as_bytes().to_vec(),
            key_type: KeyType::Ed25519,
        }
    }
}

impl Serialize for Key {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.fingerprint())
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fingerprint = String::deserialize(deserializer)?;
        Key::from_fingerprint(&fingerprint).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // key from the did:key method specification test vectors
    const DID_KEY: &str = "did:key:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK";
    const FINGERPRINT: &str = "z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK";

    #[test]
    fn test_did_key_fingerprint() {
        let key = Key::from_did_key(DID_KEY).unwrap();

        assert_eq!(key.key_type(), KeyType::Ed25519);
        assert_eq!(key.fingerprint(), FINGERPRINT);
        assert_eq!(key.did_key(), DID_KEY);
    }

    #[test]
    fn test_did_key_reference() {
        let key = Key::from_did_key(&format!("{DID_KEY}#{FINGERPRINT}")).unwrap();

        assert_eq!(key.fingerprint(), FINGERPRINT);
        assert_eq!(key.did_key_reference(), format!("{DID_KEY}#{FINGERPRINT}"));
    }

    #[test]
    fn test_base58_key() {
        let key = Key::from_fingerprint(FINGERPRINT).unwrap();
        let base58 = key.public_key_base58();

        let decoded = Key::from_public_key_base58(&base58, KeyType::Ed25519).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            Key::from_did_key("did:peer:2.Vz123"),
            Err(KeyError::InvalidDidKey(_))
        ));
        assert!(matches!(
            Key::from_fingerprint("6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK"),
            Err(KeyError::InvalidFingerprint(_))
        ));
        assert!(matches!(
            Key::from_public_key(vec![1, 2, 3], KeyType::Ed25519),
            Err(KeyError::InvalidLength(3, KeyType::Ed25519))
        ));
    }
}
