//! Serde field adapters shared across the API surface.

/// Serialize a byte vec as a base64 string and back.
/// Usage: `#[serde(with = "lumen_common::serde_helpers::b64")]`.
pub mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const ENGINE: base64::engine::GeneralPurpose =
        base64::engine::general_purpose::STANDARD;

    pub fn serialize<S: Serializer>(
        bytes: &Vec<u8>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ENGINE.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        ENGINE.decode(s.as_bytes()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super::b64")]
        data: Vec<u8>,
    }

    #[test]
    fn b64_roundtrip() {
        let value = Wrapper {
            data: vec![0x00, 0x01, 0xfe, 0xff],
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"data":"AAH+/w=="}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn b64_rejects_garbage() {
        let result =
            serde_json::from_str::<Wrapper>(r#"{"data":"!!not-base64!!"}"#);
        assert!(result.is_err());
    }
}
