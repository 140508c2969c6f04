pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StorageError};
pub use store::EncryptedStore;
pub use types::{
    DecryptedBatch, DecryptedRecord, EntityKind, NewRecord, SkippedRecord, UnsyncedRecord,
};
