use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Authentication required: sync attempted without a verified identity")]
    AuthenticationRequired,

    #[error("Session key unavailable: session is locked")]
    KeyUnavailable,

    #[error("Network error: sync endpoint unreachable: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(#[from] carelog_db::StorageError),
}
