pub mod audit;
pub mod engine;
pub mod error;
pub mod types;

pub use audit::{AuditEmitter, AuditEvent, AuditSink, AuditSinkError, AUDIT_QUEUE_CAPACITY};
pub use engine::{SyncEngine, SyncEngineOptions, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE};
pub use error::SyncError;
pub use types::{
    SyncDocument, SyncReport, SyncStore, SyncTransport, SyncTransportError, TransportErrorKind,
    UpsertAck,
};
