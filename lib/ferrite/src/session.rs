//! The symmetric session key shared by two peers after a completed
//! handshake. All bulk traffic protection is keyed by this value.

use crate::crypto;
use crate::encoding::base64;
use serde::{de, Deserializer};
use serde_derive::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

const SESSION_KEY_SIZE: usize = 16;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SessionKey(
    #[serde(
        serialize_with = "base64::serialize",
        deserialize_with = "deserialize_b64_key"
    )]
    [u8; SESSION_KEY_SIZE],
);

#[inline]
fn deserialize_b64_key<'de, D>(deserializer: D) -> Result<[u8; SESSION_KEY_SIZE], D::Error>
where
    D: Deserializer<'de>,
{
    let decoded_raw = base64::deserialize(deserializer)?;

    if decoded_raw.len() != SESSION_KEY_SIZE {
        return Err(de::Error::custom("session key must be 16 bytes"));
    }

    let mut decoded = [0u8; SESSION_KEY_SIZE];
    decoded.copy_from_slice(&decoded_raw);

    Ok(decoded)
}

impl SessionKey {
    pub const SIZE: usize = SESSION_KEY_SIZE;

    #[inline]
    pub fn new(key: [u8; Self::SIZE]) -> SessionKey {
        SessionKey(key)
    }

    /// Generates a fresh random session key.
    #[inline]
    pub fn generate() -> SessionKey {
        let mut key = [0u8; Self::SIZE];
        crypto::random_bytes(&mut key);
        SessionKey(key)
    }

    /// Builds a key from raw bytes, rejecting any length other than 16.
    #[inline]
    pub fn from_slice(data: &[u8]) -> Option<SessionKey> {
        if data.len() != Self::SIZE {
            return None;
        }

        let mut key = [0u8; Self::SIZE];
        key.copy_from_slice(data);
        Some(SessionKey(key))
    }
}

impl Deref for SessionKey {
    type Target = [u8; SessionKey::SIZE];

    #[inline]
    fn deref(&self) -> &[u8; SessionKey::SIZE] {
        &self.0
    }
}

impl DerefMut for SessionKey {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8; SessionKey::SIZE] {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let first = SessionKey::generate();
        let second = SessionKey::generate();

        assert_ne!(*first, *second);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(SessionKey::from_slice(&[1u8; 15]).is_none());
        assert!(SessionKey::from_slice(&[1u8; 17]).is_none());
        assert!(SessionKey::from_slice(&[1u8; 16]).is_some());
    }

    #[test]
    fn test_serde_roundtrip() {
        let key = SessionKey::new([7u8; SessionKey::SIZE]);

        let encoded = serde_json::to_string(&key).unwrap();
        let decoded: SessionKey = serde_json::from_str(&encoded).unwrap();

        assert_eq!(*decoded, *key);
    }

    #[test]
    fn test_serde_rejects_short_key() {
        // 8 bytes of key material instead of 16
        let encoded = format!("\"{}\"", ::base64::encode([7u8; 8]));
        assert!(serde_json::from_str::<SessionKey>(&encoded).is_err());
    }
}
