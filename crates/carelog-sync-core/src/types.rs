//! Sync-specific types: transport trait, storage interface, and the wire
//! shape of documents pushed to the cloud endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use carelog_db::{EncryptedStore, EntityKind, StorageError, UnsyncedRecord};

// ============================================================================
// SyncDocument — wire shape
// ============================================================================

/// One decrypted record tagged for upload.
///
/// Tenant fields (`org_id`, `synced_by`, `synced_by_email`) always come from
/// the authenticated identity, never from locally stored data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDocument {
    /// Stable server-side id, derived from the local row.
    pub id: String,
    pub session_id: String,
    pub entity_type: String,
    pub data: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub synced_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub org_id: String,
    pub synced_by: String,
    pub synced_by_email: String,
}

/// Server acknowledgement for one upserted document.
#[derive(Debug, Clone)]
pub struct UpsertAck {
    pub id: String,
}

/// Aggregated outcome of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}

// ============================================================================
// SyncTransport — user-provided network layer
// ============================================================================

/// Why a transport call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The endpoint could not be reached at all. Aborts the run; every
    /// unconfirmed document stays unsynced for the next trigger.
    Unreachable,
    /// The server processed the request and refused this document.
    /// Counted and logged, never fatal to sibling documents.
    Rejected,
}

/// Transport-level error for a single upsert.
#[derive(Debug, Clone)]
pub struct SyncTransportError {
    pub message: String,
    pub kind: TransportErrorKind,
}

impl SyncTransportError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TransportErrorKind::Unreachable,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TransportErrorKind::Rejected,
        }
    }
}

impl std::fmt::Display for SyncTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SyncTransportError {}

/// User-implemented transport for the cloud batch-sync endpoint.
/// Implementations own the HTTP (or other) plumbing.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn upsert(&self, document: &SyncDocument)
        -> Result<UpsertAck, SyncTransportError>;
}

// ============================================================================
// SyncStore — narrow storage interface
// ============================================================================

/// The slice of the record store the sync engine needs.
///
/// Methods are synchronous and may block on storage I/O.
pub trait SyncStore: Send + Sync {
    fn unsynced(&self, kinds: &[EntityKind]) -> Result<Vec<UnsyncedRecord>, StorageError>;
    fn mark_synced(&self, ids: &[i64]) -> Result<usize, StorageError>;
}

impl SyncStore for EncryptedStore {
    fn unsynced(&self, kinds: &[EntityKind]) -> Result<Vec<UnsyncedRecord>, StorageError> {
        EncryptedStore::unsynced(self, kinds)
    }

    fn mark_synced(&self, ids: &[i64]) -> Result<usize, StorageError> {
        EncryptedStore::mark_synced(self, ids)
    }
}
