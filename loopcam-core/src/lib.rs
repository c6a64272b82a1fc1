//! # loopcam core
//!
//! Shared state for the loopcam virtual camera: the durable store every
//! execution context opens independently, content fingerprints that tie a
//! saved playback offset to the media it belongs to, and the best-effort
//! sync bus that carries playback commands between contexts.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod command;
pub mod error;
pub mod fingerprint;
pub mod records;
pub mod resume;
pub mod store;

// Re-export main types
pub use bus::{BusEndpoint, Delivery, SyncBus, DEFAULT_CHANNEL};
pub use command::Command;
pub use error::{ErrorCategory, StoreError, StoreResult};
pub use fingerprint::{digest, Fingerprint};
pub use records::{CurrentSource, MediaRecord, PlaybackCheckpoint, Repository};
pub use resume::{
    now_epoch_ms, resolve_resume_offset, ResumeDecision, ResumePolicy, ResumeReason,
};
pub use store::{
    DurableStore, FileEngine, MemoryEngine, Partition, Schema, StorageEngine, Transaction,
    TxMode, WriteOp, DEFAULT_DB_NAME, SCHEMA_VERSION,
};
