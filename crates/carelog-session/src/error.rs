use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session key unavailable: session is locked")]
    KeyUnavailable,

    #[error("Key derivation already in progress")]
    DerivationInProgress,

    #[error("Key derivation failed: {0}")]
    Kdf(#[from] carelog_crypto::CryptoError),
}
