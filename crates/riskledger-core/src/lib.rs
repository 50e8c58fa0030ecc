//! # riskledger-core
//!
//! Core types and primitives for the riskledger budget governor.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! severity bands, scope kinds, the execution context, the error taxonomy, and the event bus.

pub mod context;
pub mod error;
pub mod event;
pub mod types;

pub use context::{ContextToken, ExecutionContext};
pub use error::{LedgerError, Result};
pub use event::{Event, EventBus};
pub use types::*;
