use thiserror::Error;

/// Unified error type for the riskledger workspace.
#[derive(Error, Debug)]
pub enum LedgerError {
    // ── Configuration errors ───────────────────────────────────
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Validation errors ──────────────────────────────────────
    #[error("validation error: {0}")]
    Validation(String),

    // ── Store errors ───────────────────────────────────────────
    #[error("bucket store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("bucket store timed out after {after_ms}ms, outcome unknown")]
    StoreTimeout { after_ms: u64 },

    // ── Governance outcomes ────────────────────────────────────
    #[error("bucket insolvent: {bucket}: requested {requested}, remaining {remaining}")]
    Insolvent {
        bucket: String,
        requested: u64,
        remaining: u64,
    },

    #[error("charge rejected by governance policy: {bucket}: {reason}")]
    Rejected { bucket: String, reason: String },

    // ── Notification errors ────────────────────────────────────
    #[error("notification channel error: {channel}: {reason}")]
    Notification { channel: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LedgerError {
    /// Whether this error means the store could not give a definite answer.
    pub fn is_store_fault(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::StoreTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
