pub mod envelope;
pub mod error;
pub mod kdf;
pub mod signature;
pub mod types;

pub use envelope::{decrypt_bytes, decrypt_value, encrypt_bytes, encrypt_value, generate_iv};
pub use error::CryptoError;
pub use kdf::{derive_session_key, derive_signing_key, generate_salt, PBKDF2_ITERATIONS};
pub use signature::{sign_record, verify_record};
pub use types::{
    Envelope, AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, CURRENT_VERSION,
    ENVELOPE_ALGORITHM, SALT_LENGTH, SIGNATURE_LENGTH, SUPPORTED_VERSIONS,
};
