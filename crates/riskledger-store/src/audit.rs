use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use riskledger_core::{Band, Result, VerdictKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What an audit record documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditKind {
    /// The outcome of one charge against one bucket.
    Charge,
    /// A severity band change caused by a charge.
    Transition { from: Band, to: Band },
    /// An automatic or administrative limit raise.
    Extension { granted: u64 },
    /// An explicit bucket reset.
    Reset,
}

impl AuditKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Transition { .. } => "transition",
            Self::Extension { .. } => "extension",
            Self::Reset => "reset",
        }
    }
}

/// Immutable, append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub execution_id: String,
    pub bucket_key: String,
    pub kind: AuditKind,
    /// Risk units charged (0 when the charge was refused).
    pub cost: u64,
    pub remaining: u64,
    pub limit: u64,
    pub band: Band,
    pub verdict: VerdictKind,
}

/// Append-only audit stream keyed by execution id.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<()>;

    /// Records for one execution, oldest first, at most `limit`.
    async fn for_execution(&self, execution_id: &str, limit: usize) -> Result<Vec<AuditRecord>>;

    /// Most recent records across all executions, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>>;
}

/// In-process audit log.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Copy of every record, oldest first.
    pub fn all(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }

    async fn for_execution(&self, execution_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.execution_id == execution_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        Ok(self.records.read().iter().rev().take(limit).cloned().collect())
    }
}
