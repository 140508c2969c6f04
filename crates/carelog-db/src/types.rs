use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use carelog_crypto::Envelope;

/// Clinical record collections tracked by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "behavior")]
    Behavior,
    #[serde(rename = "skillTrial")]
    SkillTrial,
    #[serde(rename = "note")]
    Note,
    #[serde(rename = "incident")]
    Incident,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Behavior,
        EntityKind::SkillTrial,
        EntityKind::Note,
        EntityKind::Incident,
    ];

    /// Wire and storage tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Behavior => "behavior",
            EntityKind::SkillTrial => "skillTrial",
            EntityKind::Note => "note",
            EntityKind::Incident => "incident",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        match s {
            "behavior" => Some(EntityKind::Behavior),
            "skillTrial" => Some(EntityKind::SkillTrial),
            "note" => Some(EntityKind::Note),
            "incident" => Some(EntityKind::Incident),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plaintext input for a clinical write. Encrypted before it touches disk.
///
/// Instants serialize as epoch milliseconds so they round-trip exactly
/// through the envelope codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    /// Clinical session this record belongs to.
    pub session_id: String,
    /// When the documented event happened.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Opaque structured payload from the documentation layer.
    pub data: Value,
}

/// A decrypted row returned by `list_decrypted`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedRecord {
    pub id: i64,
    pub kind: EntityKind,
    pub session_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub data: Value,
}

/// A row that could not be decrypted or failed its signature check.
/// Reported alongside the readable rows instead of aborting the listing.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub id: i64,
    pub reason: String,
}

/// Result of a batch read: readable rows plus isolated failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecryptedBatch {
    pub records: Vec<DecryptedRecord>,
    pub skipped: Vec<SkippedRecord>,
}

/// An unsynced row handed to the sync engine, payload still encrypted.
#[derive(Debug, Clone)]
pub struct UnsyncedRecord {
    pub id: i64,
    pub kind: EntityKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub encrypted_data: Envelope,
}
