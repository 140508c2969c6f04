//! Stateless envelope encrypt/decrypt for record payloads.
//!
//! Encrypt: serialize to JSON -> fresh 12-byte IV -> AES-256-GCM -> Envelope.
//! Decrypt: check version/algorithm -> AES-256-GCM open -> deserialize.
//!
//! The codec knows nothing about record schemas. Instants inside payloads
//! round-trip to the millisecond as epoch-millisecond integers when record
//! types tag them with `chrono::serde::ts_milliseconds`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CryptoError;
use crate::types::{
    Envelope, AES_GCM_IV_LENGTH, AES_KEY_LENGTH, CURRENT_VERSION, ENVELOPE_ALGORITHM,
    SUPPORTED_VERSIONS,
};

/// Generate a random 12-byte IV for AES-GCM.
pub fn generate_iv() -> Result<[u8; AES_GCM_IV_LENGTH], CryptoError> {
    let mut iv = [0u8; AES_GCM_IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Encrypt raw plaintext bytes into an envelope.
///
/// Two calls with identical plaintext and the same key produce different
/// IVs and different ciphertext.
pub fn encrypt_bytes(plaintext: &[u8], key: &[u8]) -> Result<Envelope, CryptoError> {
    let cipher = cipher_for(key)?;
    let iv = generate_iv()?;
    let nonce = Nonce::from_slice(&iv);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(Envelope {
        ciphertext,
        iv: iv.to_vec(),
        algorithm: ENVELOPE_ALGORITHM.to_string(),
        version: CURRENT_VERSION,
    })
}

/// Decrypt an envelope into the original plaintext bytes.
///
/// Fails with `DecryptionFailed` when the GCM tag does not verify (wrong
/// key, corrupted ciphertext, or tampered IV). Never returns partial or
/// default data.
pub fn decrypt_bytes(envelope: &Envelope, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if !SUPPORTED_VERSIONS.contains(&envelope.version) {
        return Err(CryptoError::UnsupportedVersion(envelope.version));
    }
    if envelope.algorithm != ENVELOPE_ALGORITHM {
        return Err(CryptoError::UnsupportedAlgorithm(envelope.algorithm.clone()));
    }
    if envelope.iv.len() != AES_GCM_IV_LENGTH {
        return Err(CryptoError::InvalidIvLength {
            expected: AES_GCM_IV_LENGTH,
            got: envelope.iv.len(),
        });
    }

    let cipher = cipher_for(key)?;
    let nonce = Nonce::from_slice(&envelope.iv);
    cipher
        .decrypt(nonce, envelope.ciphertext.as_slice())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Encrypt a serializable value into an envelope.
pub fn encrypt_value<T: Serialize>(value: &T, key: &[u8]) -> Result<Envelope, CryptoError> {
    let plaintext =
        serde_json::to_vec(value).map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    encrypt_bytes(&plaintext, key)
}

/// Decrypt an envelope back into a value.
pub fn decrypt_value<T: DeserializeOwned>(
    envelope: &Envelope,
    key: &[u8],
) -> Result<T, CryptoError> {
    let plaintext = decrypt_bytes(envelope, key)?;
    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::SerializationError(e.to_string()))
}
