//! Keyed record signatures for tamper evidence.
//!
//! HMAC-SHA256 over the canonical plaintext bytes, computed at write time
//! and checked on read. Independent of AEAD authentication so on-disk
//! corruption is detectable even if the envelope itself is replaced.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::types::{AES_KEY_LENGTH, SIGNATURE_LENGTH};

type HmacSha256 = Hmac<Sha256>;

fn mac_for(key: &[u8]) -> Result<HmacSha256, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        });
    }
    HmacSha256::new_from_slice(key).map_err(|e| CryptoError::SigningFailed(e.to_string()))
}

/// Sign record bytes with the signing key.
pub fn sign_record(key: &[u8], data: &[u8]) -> Result<[u8; SIGNATURE_LENGTH], CryptoError> {
    let mut mac = mac_for(key)?;
    mac.update(data);
    let out = mac.finalize().into_bytes();
    let mut signature = [0u8; SIGNATURE_LENGTH];
    signature.copy_from_slice(&out);
    Ok(signature)
}

/// Verify a record signature. Constant-time comparison via the MAC itself.
pub fn verify_record(key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
    let mut mac = mac_for(key)?;
    mac.update(data);
    Ok(mac.verify_slice(signature).is_ok())
}
