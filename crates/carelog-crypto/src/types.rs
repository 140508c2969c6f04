use serde::{Deserialize, Serialize};

/// Envelope format version.
///
/// Version 1: AES-256-GCM under the session key.
/// Payload is UTF-8 JSON; binary fields are base64 in the serialized form.
pub const CURRENT_VERSION: u8 = 1;

/// Supported envelope versions (for decryption).
pub const SUPPORTED_VERSIONS: &[u8] = &[1];

/// Algorithm tag written into every envelope.
pub const ENVELOPE_ALGORITHM: &str = "AES-256-GCM";

/// AES-GCM IV length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// Per-account salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// HMAC-SHA256 record signature length in bytes.
pub const SIGNATURE_LENGTH: usize = 32;

/// The only at-rest representation of a record payload.
///
/// `iv` is fresh random bytes on every encryption call. `version` allows
/// future envelope-format migration without breaking old rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    pub algorithm: String,
    pub version: u8,
}

/// Serde helper: byte vectors as standard base64 strings.
mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_json_round_trip() {
        let envelope = Envelope {
            ciphertext: vec![1, 2, 3, 255],
            iv: vec![0; AES_GCM_IV_LENGTH],
            algorithm: ENVELOPE_ALGORITHM.to_string(),
            version: CURRENT_VERSION,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn binary_fields_are_base64_strings() {
        let envelope = Envelope {
            ciphertext: vec![0xde, 0xad],
            iv: vec![0xbe, 0xef],
            algorithm: ENVELOPE_ALGORITHM.to_string(),
            version: 1,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value["ciphertext"].is_string());
        assert!(value["iv"].is_string());
    }

    #[test]
    fn rejects_invalid_base64() {
        let json = r#"{"ciphertext":"!!!","iv":"AAAA","algorithm":"AES-256-GCM","version":1}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }
}
