//! # riskledger-config
//!
//! Configuration system for riskledger. Reads from `riskledger.toml` and environment
//! variables, in that precedence order, and validates profiles before any charge runs.

pub mod loader;
pub mod schema;
pub mod template;

pub use loader::ConfigLoader;
pub use schema::RiskLedgerConfig;
pub use schema::{
    AutoExtendSpec, BucketSpec, ChannelConfig, ConfigWarning, EmitMode, Exhaustion, FailMode,
    LoggingConfig, MAX_DURATION_SECS, NotificationRule, Policy, PolicyTable, ProfileConfig, StoreBackend, StoreConfig,
    Threshold, WarningSeverity, check_thresholds, default_thresholds,
};
pub use template::KeyTemplate;
