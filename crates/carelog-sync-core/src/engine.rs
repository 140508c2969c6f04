//! Sync engine: drains unsynced records, pushes them in paced batches,
//! and reconciles per-document outcomes.
//!
//! Batches run strictly in order; within a batch every upsert runs
//! concurrently and resolves independently, so one document's failure
//! never fails its batch-siblings. Only documents the server confirmed
//! are flipped to synced.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use carelog_crypto::decrypt_value;
use carelog_db::EntityKind;
use carelog_session::{AuthContext, KeyLifecycle};

use crate::audit::{AuditEmitter, AuditEvent};
use crate::error::SyncError;
use crate::types::{SyncDocument, SyncReport, SyncStore, SyncTransport, TransportErrorKind};

/// Default batch size: caps request fan-out and peak outbound connections.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default flat pacing delay between batches. Not adaptive backoff; a
/// fixed guard against server-side rate limiting.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(500);

/// Configuration for `SyncEngine`.
#[derive(Clone)]
pub struct SyncEngineOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
    /// Optional device identifier stamped onto every document.
    pub client_id: Option<String>,
    /// Collections drained by a sync run.
    pub kinds: Vec<EntityKind>,
}

impl Default for SyncEngineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            client_id: None,
            kinds: EntityKind::ALL.to_vec(),
        }
    }
}

pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    lifecycle: Arc<KeyLifecycle>,
    transport: Arc<dyn SyncTransport>,
    audit: Option<AuditEmitter>,
    options: SyncEngineOptions,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn SyncStore>,
        lifecycle: Arc<KeyLifecycle>,
        transport: Arc<dyn SyncTransport>,
        audit: Option<AuditEmitter>,
        options: SyncEngineOptions,
    ) -> Self {
        Self {
            store,
            lifecycle,
            transport,
            audit,
            options,
        }
    }

    /// Push every unsynced record to the cloud endpoint.
    ///
    /// Zero unsynced records is a valid, cheap no-op. A whole-endpoint
    /// network failure aborts the run and leaves unconfirmed documents
    /// unsynced for the next trigger; per-document rejections are counted
    /// and logged without blocking siblings or later batches.
    pub async fn sync_unsynced_records(&self, auth: &AuthContext) -> Result<SyncReport, SyncError> {
        if !auth.has_identity() {
            return Err(SyncError::AuthenticationRequired);
        }
        let keys = self
            .lifecycle
            .keys()
            .map_err(|_| SyncError::KeyUnavailable)?;

        let records = self.store.unsynced(&self.options.kinds)?;
        let total = records.len();
        if records.is_empty() {
            return Ok(SyncReport::default());
        }

        let run_id = Uuid::new_v4().to_string();
        tracing::info!(%run_id, total, "sync run started");

        let mut failed = 0usize;
        let mut documents: Vec<(i64, SyncDocument)> = Vec::with_capacity(total);
        for record in records {
            match decrypt_value::<Value>(&record.encrypted_data, &keys.encryption) {
                Ok(data) => {
                    documents.push((
                        record.id,
                        SyncDocument {
                            id: format!("{}-{}", record.kind.as_str(), record.id),
                            session_id: record.session_id,
                            entity_type: record.kind.as_str().to_string(),
                            data,
                            synced_at: Utc::now(),
                            client_id: self.options.client_id.clone(),
                            // Server-verified identity only; locally stored
                            // tenant fields are never trusted.
                            org_id: auth.org_id.clone(),
                            synced_by: auth.user_id.clone(),
                            synced_by_email: auth.email.clone(),
                        },
                    ));
                }
                Err(e) => {
                    tracing::warn!(id = record.id, error = %e, "record undecryptable; left unsynced");
                    failed += 1;
                }
            }
        }

        let entity_types: Vec<String> = documents
            .iter()
            .map(|(_, d)| d.entity_type.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut confirmed: Vec<i64> = Vec::new();
        let mut network_failure: Option<String> = None;

        for (index, batch) in documents.chunks(self.options.batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.options.batch_delay).await;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for (local_id, document) in batch.to_vec() {
                let transport = Arc::clone(&self.transport);
                handles.push(tokio::spawn(async move {
                    let outcome = transport.upsert(&document).await;
                    (local_id, document.id, outcome)
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok((local_id, _, Ok(_ack))) => confirmed.push(local_id),
                    Ok((_, doc_id, Err(e))) => match e.kind {
                        TransportErrorKind::Unreachable => {
                            network_failure.get_or_insert(e.message);
                        }
                        TransportErrorKind::Rejected => {
                            tracing::warn!(%doc_id, reason = %e.message, "document upsert rejected");
                            failed += 1;
                        }
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "upsert task failed");
                        failed += 1;
                    }
                }
            }

            if network_failure.is_some() {
                break;
            }
        }

        // Server-confirmed documents are durable remotely; flip them even
        // when the run is about to surface a network error.
        self.store.mark_synced(&confirmed)?;
        let success = confirmed.len();

        if let Some(message) = network_failure {
            tracing::warn!(%run_id, success, "sync run aborted: endpoint unreachable");
            self.emit_audit(AuditEvent::sync_run(
                auth,
                &run_id,
                success,
                failed,
                total,
                entity_types,
                Some(message.clone()),
            ));
            return Err(SyncError::Network(message));
        }

        tracing::info!(%run_id, success, failed, total, "sync run finished");
        self.emit_audit(AuditEvent::sync_run(
            auth,
            &run_id,
            success,
            failed,
            total,
            entity_types,
            None,
        ));

        Ok(SyncReport {
            success,
            failed,
            total,
        })
    }

    fn emit_audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.emit(event);
        }
    }
}
