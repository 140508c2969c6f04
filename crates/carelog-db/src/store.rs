//! Encrypted record store over SQLite.
//!
//! Write: plaintext -> JSON bytes -> HMAC signature -> AES-256-GCM envelope
//! -> row. Read: row -> decrypt -> verify signature -> JSON value.
//!
//! This store is the single choke point for encryption-at-rest: no code
//! path outside it persists a plaintext clinical field. All methods are
//! synchronous and block the calling thread on SQLite I/O; async callers
//! should treat them accordingly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;

use carelog_crypto::{decrypt_bytes, encrypt_bytes, sign_record, verify_record, Envelope};
use carelog_session::KeyLifecycle;

use crate::error::{Result, StorageError};
use crate::types::{
    DecryptedBatch, DecryptedRecord, EntityKind, NewRecord, SkippedRecord, UnsyncedRecord,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    entity      TEXT    NOT NULL,
    session_id  TEXT    NOT NULL,
    timestamp   INTEGER NOT NULL,
    created_at  INTEGER NOT NULL,
    synced      INTEGER NOT NULL DEFAULT 0,
    envelope    TEXT    NOT NULL,
    signature   BLOB    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_entity ON records (entity, id);
CREATE INDEX IF NOT EXISTS idx_records_unsynced ON records (synced, entity);
CREATE TABLE IF NOT EXISTS legacy_records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    entity      TEXT    NOT NULL,
    session_id  TEXT    NOT NULL,
    timestamp   INTEGER NOT NULL,
    created_at  INTEGER NOT NULL,
    payload     TEXT    NOT NULL
);
";

struct RawRow {
    id: i64,
    session_id: String,
    timestamp: i64,
    created_at: i64,
    synced: bool,
    envelope_json: String,
    signature: Vec<u8>,
}

/// Durable, per-entity-collection storage of envelopes plus integrity
/// signatures and sync metadata.
pub struct EncryptedStore {
    conn: Mutex<Connection>,
    lifecycle: Arc<KeyLifecycle>,
}

impl EncryptedStore {
    pub fn open(path: &std::path::Path, lifecycle: Arc<KeyLifecycle>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lifecycle,
        })
    }

    pub fn open_in_memory(lifecycle: Arc<KeyLifecycle>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lifecycle,
        })
    }

    /// Encrypt and persist one clinical record. Returns the local id.
    ///
    /// Fails with `KeyUnavailable` unless the key lifecycle is Ready.
    pub fn add(&self, kind: EntityKind, record: &NewRecord) -> Result<i64> {
        let keys = self
            .lifecycle
            .keys()
            .map_err(|_| StorageError::KeyUnavailable)?;

        let plaintext = serde_json::to_vec(&record.data)?;
        let signature = sign_record(&keys.signing, &plaintext)?;
        let envelope = encrypt_bytes(&plaintext, &keys.encryption)?;
        let envelope_json = serde_json::to_string(&envelope)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO records (entity, session_id, timestamp, created_at, synced, envelope, signature)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
            params![
                kind.as_str(),
                record.session_id,
                record.timestamp.timestamp_millis(),
                Utc::now().timestamp_millis(),
                envelope_json,
                signature.as_slice(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(kind = kind.as_str(), id, "encrypted record stored");
        Ok(id)
    }

    /// Decrypt all rows of one kind in insertion order.
    ///
    /// A row that fails decryption or its signature check is skipped and
    /// reported; one corrupt row never hides the rest of a session's data.
    pub fn list_decrypted(&self, kind: EntityKind) -> Result<DecryptedBatch> {
        let keys = self
            .lifecycle
            .keys()
            .map_err(|_| StorageError::KeyUnavailable)?;

        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, session_id, timestamp, created_at, synced, envelope, signature
                 FROM records WHERE entity = ?1 ORDER BY id ASC",
            )?;
            let mapped = stmt.query_map(params![kind.as_str()], |row| {
                Ok(RawRow {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    created_at: row.get(3)?,
                    synced: row.get::<_, i64>(4)? != 0,
                    envelope_json: row.get(5)?,
                    signature: row.get(6)?,
                })
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut batch = DecryptedBatch::default();
        for row in rows {
            match decrypt_row(&row, kind, &keys.encryption, &keys.signing) {
                Ok(record) => batch.records.push(record),
                Err(reason) => {
                    tracing::warn!(id = row.id, %reason, "skipping unreadable record");
                    batch.skipped.push(SkippedRecord { id: row.id, reason });
                }
            }
        }
        Ok(batch)
    }

    /// All unsynced rows across the given kinds, payloads still encrypted.
    pub fn unsynced(&self, kinds: &[EntityKind]) -> Result<Vec<UnsyncedRecord>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            "SELECT id, entity, session_id, timestamp, envelope
             FROM records WHERE synced = 0 AND entity IN ({}) ORDER BY id ASC",
            placeholders
        );

        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let mapped = stmt.query_map(
                params_from_iter(kinds.iter().map(|k| k.as_str())),
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut records = Vec::with_capacity(rows.len());
        for (id, entity, session_id, timestamp, envelope_json) in rows {
            let kind = EntityKind::parse(&entity)
                .ok_or_else(|| StorageError::UnknownEntityKind(entity.clone()))?;
            let envelope: Envelope = serde_json::from_str(&envelope_json)?;
            records.push(UnsyncedRecord {
                id,
                kind,
                session_id,
                timestamp: millis_to_datetime(timestamp)?,
                encrypted_data: envelope,
            });
        }
        Ok(records)
    }

    /// Flip `synced` to true for confirmed ids. Returns rows updated.
    pub fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut updated = 0;
        for id in ids {
            updated += tx.execute("UPDATE records SET synced = 1 WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        tracing::debug!(updated, "records marked synced");
        Ok(updated)
    }

    /// One-time upgrade path for pre-encryption plaintext rows.
    ///
    /// Re-writes each legacy row as an encrypted record and consumes the
    /// source in the same transaction, so re-running is a no-op and can
    /// never duplicate records. Returns how many rows were migrated.
    pub fn migrate_legacy_plaintext(&self) -> Result<usize> {
        let keys = self
            .lifecycle
            .keys()
            .map_err(|_| StorageError::KeyUnavailable)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let legacy = {
            let mut stmt = tx.prepare(
                "SELECT id, entity, session_id, timestamp, created_at, payload
                 FROM legacy_records ORDER BY id ASC",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut migrated = 0;
        for (legacy_id, entity, session_id, timestamp, created_at, payload) in legacy {
            let data: Value = serde_json::from_str(&payload)?;
            let plaintext = serde_json::to_vec(&data)?;
            let signature = sign_record(&keys.signing, &plaintext)?;
            let envelope = encrypt_bytes(&plaintext, &keys.encryption)?;
            let envelope_json = serde_json::to_string(&envelope)?;

            tx.execute(
                "INSERT INTO records (entity, session_id, timestamp, created_at, synced, envelope, signature)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                params![
                    entity,
                    session_id,
                    timestamp,
                    created_at,
                    envelope_json,
                    signature.as_slice(),
                ],
            )?;
            tx.execute(
                "DELETE FROM legacy_records WHERE id = ?1",
                params![legacy_id],
            )?;
            migrated += 1;
        }

        tx.commit()?;
        if migrated > 0 {
            tracing::info!(migrated, "legacy plaintext rows re-encrypted");
        }
        Ok(migrated)
    }

    /// Number of rows for one kind.
    pub fn count(&self, kind: EntityKind) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE entity = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Number of unsynced rows across all kinds. Cheap metadata read used
    /// by callers to decide whether to trigger a sync.
    pub fn unsynced_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    #[cfg(test)]
    fn insert_legacy_for_test(
        &self,
        kind: EntityKind,
        session_id: &str,
        timestamp: i64,
        payload: &str,
    ) {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO legacy_records (entity, session_id, timestamp, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![kind.as_str(), session_id, timestamp, timestamp, payload],
        )
        .unwrap();
    }

    #[cfg(test)]
    fn execute_for_test(&self, sql: &str) {
        self.conn.lock().execute(sql, []).unwrap();
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(StorageError::TimestampOutOfRange(millis))
}

fn decrypt_row(
    row: &RawRow,
    kind: EntityKind,
    encryption_key: &[u8],
    signing_key: &[u8],
) -> std::result::Result<DecryptedRecord, String> {
    let envelope: Envelope =
        serde_json::from_str(&row.envelope_json).map_err(|e| format!("bad envelope: {}", e))?;
    let plaintext =
        decrypt_bytes(&envelope, encryption_key).map_err(|e| format!("decryption failed: {}", e))?;

    let valid = verify_record(signing_key, &plaintext, &row.signature)
        .map_err(|e| format!("signature check failed: {}", e))?;
    if !valid {
        return Err("signature mismatch: record tampered or corrupted".to_string());
    }

    let data: Value =
        serde_json::from_slice(&plaintext).map_err(|e| format!("bad payload JSON: {}", e))?;

    Ok(DecryptedRecord {
        id: row.id,
        kind,
        session_id: row.session_id.clone(),
        timestamp: millis_to_datetime(row.timestamp).map_err(|e| e.to_string())?,
        created_at: millis_to_datetime(row.created_at).map_err(|e| e.to_string())?,
        synced: row.synced,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SALT: &[u8] = b"salt-0123456789a";

    async fn ready_lifecycle() -> Arc<KeyLifecycle> {
        let lifecycle = Arc::new(KeyLifecycle::new());
        lifecycle
            .initialize_with_password("correct horse", SALT)
            .await
            .unwrap();
        lifecycle
    }

    fn record(session: &str, millis: i64, data: Value) -> NewRecord {
        NewRecord {
            session_id: session.to_string(),
            timestamp: DateTime::from_timestamp_millis(millis).unwrap(),
            data,
        }
    }

    #[tokio::test]
    async fn add_then_list_round_trip() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(Arc::clone(&lifecycle)).unwrap();

        let data = json!({ "behavior": "elopement", "intensity": 3 });
        let id = store
            .add(EntityKind::Behavior, &record("s-1", 1_700_000_123_456, data.clone()))
            .unwrap();
        assert!(id > 0);

        let batch = store.list_decrypted(EntityKind::Behavior).unwrap();
        assert!(batch.skipped.is_empty());
        assert_eq!(batch.records.len(), 1);
        let row = &batch.records[0];
        assert_eq!(row.data, data);
        assert_eq!(row.session_id, "s-1");
        assert_eq!(row.timestamp.timestamp_millis(), 1_700_000_123_456);
        assert!(!row.synced);
    }

    #[tokio::test]
    async fn add_fails_closed_when_locked() {
        let lifecycle = Arc::new(KeyLifecycle::new());
        let store = EncryptedStore::open_in_memory(Arc::clone(&lifecycle)).unwrap();

        let err = store
            .add(EntityKind::Note, &record("s-1", 0, json!({})))
            .unwrap_err();
        assert!(matches!(err, StorageError::KeyUnavailable));
    }

    #[tokio::test]
    async fn list_fails_closed_when_locked() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(Arc::clone(&lifecycle)).unwrap();
        store
            .add(EntityKind::Note, &record("s-1", 0, json!({ "n": 1 })))
            .unwrap();

        lifecycle.clear();
        assert!(matches!(
            store.list_decrypted(EntityKind::Note),
            Err(StorageError::KeyUnavailable)
        ));
    }

    #[tokio::test]
    async fn no_plaintext_on_disk() {
        let lifecycle = ready_lifecycle().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        let store = EncryptedStore::open(&path, Arc::clone(&lifecycle)).unwrap();

        store
            .add(
                EntityKind::Note,
                &record("s-1", 0, json!({ "note": "client disclosed sensitive detail" })),
            )
            .unwrap();
        drop(store);

        let raw = std::fs::read(&path).unwrap();
        let haystack = String::from_utf8_lossy(&raw);
        assert!(!haystack.contains("sensitive detail"));
    }

    #[tokio::test]
    async fn insertion_order_is_preserved() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();

        for i in 0..5 {
            store
                .add(EntityKind::SkillTrial, &record("s-1", i, json!({ "trial": i })))
                .unwrap();
        }

        let batch = store.list_decrypted(EntityKind::SkillTrial).unwrap();
        let trials: Vec<i64> = batch
            .records
            .iter()
            .map(|r| r.data["trial"].as_i64().unwrap())
            .collect();
        assert_eq!(trials, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn corrupt_row_is_isolated() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();

        for i in 0..3 {
            store
                .add(EntityKind::Behavior, &record("s-1", i, json!({ "n": i })))
                .unwrap();
        }
        // Corrupt the middle row's envelope
        store.execute_for_test("UPDATE records SET envelope = '{\"broken\": true}' WHERE id = 2");

        let batch = store.list_decrypted(EntityKind::Behavior).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].id, 2);
    }

    #[tokio::test]
    async fn tampered_signature_is_detected() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();

        store
            .add(EntityKind::Incident, &record("s-1", 0, json!({ "severity": 1 })))
            .unwrap();
        store.execute_for_test("UPDATE records SET signature = x'00' WHERE id = 1");

        let batch = store.list_decrypted(EntityKind::Incident).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.skipped.len(), 1);
        assert!(batch.skipped[0].reason.contains("signature"));
    }

    #[tokio::test]
    async fn wrong_key_fails_closed_for_every_row() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(Arc::clone(&lifecycle)).unwrap();
        store
            .add(EntityKind::Note, &record("s-1", 0, json!({ "n": 1 })))
            .unwrap();

        // Re-authenticate with a different password: old rows must not
        // decrypt into plaintext-looking garbage.
        lifecycle.clear();
        lifecycle
            .initialize_with_password("wrong password", SALT)
            .await
            .unwrap();

        let batch = store.list_decrypted(EntityKind::Note).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.skipped.len(), 1);
    }

    #[tokio::test]
    async fn unsynced_and_mark_synced() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();

        let a = store
            .add(EntityKind::Behavior, &record("s-1", 0, json!({ "n": 0 })))
            .unwrap();
        let b = store
            .add(EntityKind::Note, &record("s-1", 1, json!({ "n": 1 })))
            .unwrap();
        let c = store
            .add(EntityKind::Incident, &record("s-1", 2, json!({ "n": 2 })))
            .unwrap();

        assert_eq!(store.unsynced(&EntityKind::ALL).unwrap().len(), 3);
        assert_eq!(store.unsynced_count().unwrap(), 3);

        assert_eq!(store.mark_synced(&[a, c]).unwrap(), 2);
        let remaining = store.unsynced(&EntityKind::ALL).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);

        // Filter by kind
        assert!(store.unsynced(&[EntityKind::Behavior]).unwrap().is_empty());
        assert_eq!(store.unsynced(&[EntityKind::Note]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_synced_empty_is_noop() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();
        assert_eq!(store.mark_synced(&[]).unwrap(), 0);
    }

    #[tokio::test]
    async fn migration_re_encrypts_and_consumes() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();

        store.insert_legacy_for_test(
            EntityKind::Behavior,
            "s-1",
            1_000,
            r#"{"behavior":"tantrum","intensity":2}"#,
        );
        store.insert_legacy_for_test(EntityKind::Note, "s-2", 2_000, r#"{"note":"good session"}"#);

        assert_eq!(store.migrate_legacy_plaintext().unwrap(), 2);
        assert_eq!(store.count(EntityKind::Behavior).unwrap(), 1);
        assert_eq!(store.count(EntityKind::Note).unwrap(), 1);

        let batch = store.list_decrypted(EntityKind::Behavior).unwrap();
        assert_eq!(batch.records[0].data["behavior"], "tantrum");
        assert_eq!(batch.records[0].timestamp.timestamp_millis(), 1_000);
        assert!(!batch.records[0].synced);
    }

    #[tokio::test]
    async fn migration_is_idempotent() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();

        store.insert_legacy_for_test(EntityKind::Note, "s-1", 0, r#"{"note":"x"}"#);

        assert_eq!(store.migrate_legacy_plaintext().unwrap(), 1);
        assert_eq!(store.migrate_legacy_plaintext().unwrap(), 0);
        assert_eq!(store.count(EntityKind::Note).unwrap(), 1);
    }

    #[tokio::test]
    async fn migration_with_nothing_to_do_is_noop() {
        let lifecycle = ready_lifecycle().await;
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();
        assert_eq!(store.migrate_legacy_plaintext().unwrap(), 0);
    }

    #[tokio::test]
    async fn migration_requires_key() {
        let lifecycle = Arc::new(KeyLifecycle::new());
        let store = EncryptedStore::open_in_memory(lifecycle).unwrap();
        assert!(matches!(
            store.migrate_legacy_plaintext(),
            Err(StorageError::KeyUnavailable)
        ));
    }
}
