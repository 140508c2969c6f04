use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid IV length: expected {expected} bytes, got {got}")]
    InvalidIvLength { expected: usize, got: usize },

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unsupported envelope algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
