use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session key unavailable: session is locked")]
    KeyUnavailable,

    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("Record timestamp out of range: {0}")]
    TimestampOutOfRange(i64),

    #[error("Crypto error: {0}")]
    Crypto(#[from] carelog_crypto::CryptoError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
