//! Best-effort audit emission.
//!
//! Events flow through a bounded queue into an append-only sink. A full
//! queue or a sink failure is logged and swallowed; audit problems must
//! never block or fail the sync or authentication flow that produced the
//! event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use carelog_session::AuthContext;

/// Bounded queue depth before events are dropped.
pub const AUDIT_QUEUE_CAPACITY: usize = 64;

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub user_id: String,
    pub user_email: String,
    pub action: String,
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub org_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub details: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Summary of one sync run.
    pub fn sync_run(
        auth: &AuthContext,
        run_id: &str,
        success: usize,
        failed: usize,
        total: usize,
        entity_types: Vec<String>,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            user_id: auth.user_id.clone(),
            user_email: auth.email.clone(),
            action: "sync".to_string(),
            entity_type: "syncBatch".to_string(),
            entity_id: None,
            org_id: auth.org_id.clone(),
            ip_address: None,
            user_agent: None,
            success: failure_reason.is_none() && failed == 0,
            failure_reason,
            details: json!({
                "runId": run_id,
                "success": success,
                "failed": failed,
                "total": total,
                "entityTypes": entity_types,
            }),
            timestamp: Utc::now(),
        }
    }

    /// One authentication attempt.
    pub fn authentication(
        user_id: &str,
        email: &str,
        org_id: &str,
        success: bool,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            user_email: email.to_string(),
            action: "authentication".to_string(),
            entity_type: "session".to_string(),
            entity_id: None,
            org_id: org_id.to_string(),
            ip_address: None,
            user_agent: None,
            success,
            failure_reason,
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }
}

/// Sink error, opaque to callers.
#[derive(Debug, Clone)]
pub struct AuditSinkError {
    pub message: String,
}

impl std::fmt::Display for AuditSinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AuditSinkError {}

/// Append-only destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

/// Fire-and-forget front end over an `AuditSink`.
#[derive(Clone)]
pub struct AuditEmitter {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditEmitter {
    /// Spawn the drain task. Requires a tokio runtime.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(AUDIT_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.append(&event).await {
                    tracing::warn!(error = %e, action = %event.action, "audit append failed; event dropped");
                }
            }
        });
        Self { tx }
    }

    /// Enqueue an event. Never blocks; drops (with a log line) when full.
    pub fn emit(&self, event: AuditEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::warn!("audit queue full; event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct MemorySink {
        events: Mutex<Vec<AuditEvent>>,
    }

    #[async_trait]
    impl AuditSink for MemorySink {
        async fn append(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _event: &AuditEvent) -> Result<(), AuditSinkError> {
            Err(AuditSinkError {
                message: "sink down".to_string(),
            })
        }
    }

    fn auth() -> AuthContext {
        AuthContext {
            user_id: "user-1".to_string(),
            email: "rbt@clinic.example".to_string(),
            org_id: "org-1".to_string(),
            encryption_salt: vec![0u8; 16],
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn events_reach_the_sink() {
        let sink = Arc::new(MemorySink {
            events: Mutex::new(Vec::new()),
        });
        let emitter = AuditEmitter::new(Arc::clone(&sink) as Arc<dyn AuditSink>);

        emitter.emit(AuditEvent::sync_run(
            &auth(),
            "run-1",
            3,
            0,
            3,
            vec!["behavior".to_string()],
            None,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "sync");
        assert!(events[0].success);
        assert_eq!(events[0].details["total"], 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sink_failure_is_swallowed() {
        let emitter = AuditEmitter::new(Arc::new(FailingSink));
        emitter.emit(AuditEvent::authentication(
            "user-1",
            "rbt@clinic.example",
            "org-1",
            false,
            Some("bad password".to_string()),
        ));
        // Nothing to assert beyond "does not panic or block"
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn failed_run_is_not_marked_success() {
        let event = AuditEvent::sync_run(&auth(), "run-1", 23, 2, 25, vec![], None);
        assert!(!event.success);
        assert_eq!(event.details["failed"], 2);
    }

    #[test]
    fn serializes_camel_case_and_omits_empty_optionals() {
        let event = AuditEvent::authentication("u", "e", "o", true, None);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["userId"], "u");
        assert_eq!(value["userEmail"], "e");
        assert_eq!(value["orgId"], "o");
        assert!(value.get("failureReason").is_none());
    }
}
