//! Session-key derivation.
//!
//! Password -> PBKDF2-HMAC-SHA256 (310,000 iterations, per-account salt)
//! -> 256-bit session key. The signing key is derived from the session key
//! via HKDF-SHA256 with a distinct info string, so record signatures never
//! share key material with record encryption.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::types::{AES_KEY_LENGTH, SALT_LENGTH};

/// PBKDF2 iteration count. Deliberately slow to resist offline brute force.
pub const PBKDF2_ITERATIONS: u32 = 310_000;

const SIGNING_SALT: &[u8] = b"carelog:mac-salt:v1";
const SIGNING_INFO: &[u8] = b"carelog:record-mac:v1";

/// Generate a random per-account salt.
///
/// The salt is stored server-side and must stay stable for the life of the
/// account; records encrypted under one salt cannot be decrypted after it
/// changes.
pub fn generate_salt() -> Result<[u8; SALT_LENGTH], CryptoError> {
    let mut salt = [0u8; SALT_LENGTH];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(salt)
}

/// Derive the 256-bit session key from a password and the account salt.
pub fn derive_session_key(password: &str, salt: &[u8]) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::KdfFailed("empty password".to_string()));
    }
    if salt.is_empty() {
        return Err(CryptoError::KdfFailed("empty salt".to_string()));
    }

    let mut key = [0u8; AES_KEY_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    Ok(key)
}

/// Derive the record-signing key from the session key.
pub fn derive_signing_key(session_key: &[u8]) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    if session_key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: session_key.len(),
        });
    }

    let hk = Hkdf::<Sha256>::new(Some(SIGNING_SALT), session_key);
    let mut okm = [0u8; AES_KEY_LENGTH];
    hk.expand(SIGNING_INFO, &mut okm)
        .map_err(|e| CryptoError::KdfFailed(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let a = derive_session_key("correct horse", b"salt-0123456789a").unwrap();
        let b = derive_session_key("correct horse", b"salt-0123456789a").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_salts_different_keys() {
        let a = derive_session_key("correct horse", b"salt-a").unwrap();
        let b = derive_session_key("correct horse", b"salt-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_passwords_different_keys() {
        let a = derive_session_key("password-a", b"same-salt").unwrap();
        let b = derive_session_key("password-b", b"same-salt").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_empty_inputs() {
        assert!(derive_session_key("", b"salt").is_err());
        assert!(derive_session_key("password", b"").is_err());
    }

    #[test]
    fn signing_key_differs_from_session_key() {
        let session = derive_session_key("correct horse", b"salt-0123456789a").unwrap();
        let signing = derive_signing_key(&session).unwrap();
        assert_ne!(session, signing);
    }

    #[test]
    fn signing_key_is_deterministic() {
        let session = [0x42u8; 32];
        let a = derive_signing_key(&session).unwrap();
        let b = derive_signing_key(&session).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn signing_key_rejects_short_input() {
        assert!(derive_signing_key(&[0u8; 16]).is_err());
    }

    #[test]
    fn generated_salts_are_unique() {
        let a = generate_salt().unwrap();
        let b = generate_salt().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), SALT_LENGTH);
    }
}
