//! # riskledger-store
//!
//! Durable, atomically-mutable bucket counters and the append-only audit stream.
//!
//! - **Bucket store**: conditional debit, credit, limit raise, snapshot, reset; each
//!   one indivisible operation per key.
//! - **Audit stream**: immutable records keyed by execution id.
//!
//! Two backends: an in-process [`MemoryBucketStore`] / [`MemoryAuditLog`] pair and a
//! SQLite-backed [`SqliteStore`] implementing both contracts.

pub mod audit;
pub mod bucket;
pub mod clock;
pub mod memory;
pub mod sqlite;

pub use audit::{AuditKind, AuditRecord, AuditSink, MemoryAuditLog};
pub use bucket::{
    BucketKey, BucketRecord, BucketStore, DebitOutcome, ExtensionWindow, LimitSpec, RaiseOutcome,
    spend_fraction,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryBucketStore;
pub use sqlite::{DEFAULT_BUSY_TIMEOUT, SqliteStore};
