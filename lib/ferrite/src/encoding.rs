/// Serde helpers for base64 encoded byte fields, for use with
/// `#[serde(with = "base64")]` and friends.
pub mod base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    #[inline]
    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&::base64::encode(bytes))
    }

    #[inline]
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        ::base64::decode(s).map_err(serde::de::Error::custom)
    }
}
