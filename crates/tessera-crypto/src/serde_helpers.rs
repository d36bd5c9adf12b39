//! Hex-string encodings for key bytes, so stored key files stay readable
//! JSON instead of integer arrays.

/// `Vec<u8>` as a lowercase hex string.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

/// `Zeroizing<Vec<u8>>` as a lowercase hex string.
pub mod hex_secret {
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S>(bytes: &Zeroizing<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = Zeroizing::new(hex::encode(bytes.as_slice()));
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Zeroizing<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = Zeroizing::new(String::deserialize(deserializer)?);
        hex::decode(text.as_str())
            .map(Zeroizing::new)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use zeroize::Zeroizing;

    #[derive(Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "super::hex_bytes")]
        public: Vec<u8>,
        #[serde(with = "super::hex_secret")]
        secret: Zeroizing<Vec<u8>>,
    }

    #[test]
    fn bytes_are_hex_strings() {
        let sample = Sample {
            public: vec![0xde, 0xad],
            secret: Zeroizing::new(vec![0xbe, 0xef]),
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"public":"dead","secret":"beef"}"#);
    }

    #[test]
    fn invalid_hex_rejected() {
        let result: Result<Sample, _> =
            serde_json::from_str(r#"{"public":"zz","secret":"00"}"#);
        assert!(result.is_err());
    }
}
