use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::types::{Band, ExecutionId};

/// Fields a bucket key template may reference, besides `attr.<name>`.
pub const CONTEXT_FIELDS: &[&str] = &["execution_id", "agent_id", "group_id", "team_id"];

/// Prefix for free-form context attributes in key templates.
pub const ATTRIBUTE_PREFIX: &str = "attr.";

/// Identity of one logical call graph, propagated through nested calls.
///
/// Clones share the same mutable state (accumulated cost, band hints, cancellation),
/// so a context handed to a nested call observes the charges made by its parent.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution_id: ExecutionId,
    agent_id: Option<String>,
    group_id: Option<String>,
    attributes: BTreeMap<String, String>,
    state: Arc<RwLock<ContextState>>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct ContextState {
    accumulated_cost: u64,
    band_hints: HashMap<String, Band>,
}

/// Serializable identity part of an [`ExecutionContext`], for crossing process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextToken {
    pub execution_id: ExecutionId,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ExecutionContext {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            agent_id: None,
            group_id: None,
            attributes: BTreeMap::new(),
            state: Arc::new(RwLock::new(ContextState::default())),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a context with a fresh random execution id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Whether a key template may reference `name`.
    pub fn is_known_field(name: &str) -> bool {
        CONTEXT_FIELDS.contains(&name)
            || name
                .strip_prefix(ATTRIBUTE_PREFIX)
                .is_some_and(|attr| !attr.is_empty())
    }

    /// Look up a template field. `Ok(None)` means the field is known but unset.
    pub fn field(&self, name: &str) -> Result<Option<&str>> {
        match name {
            "execution_id" => Ok(Some(self.execution_id.as_str())),
            "agent_id" => Ok(self.agent_id.as_deref()),
            "group_id" | "team_id" => Ok(self.group_id.as_deref()),
            other => match other.strip_prefix(ATTRIBUTE_PREFIX) {
                Some(attr) if !attr.is_empty() => Ok(self.attributes.get(attr).map(String::as_str)),
                _ => Err(LedgerError::Configuration(format!(
                    "unknown execution context field '{other}'"
                ))),
            },
        }
    }

    /// Reject contexts that cannot be charged at all.
    pub fn validate(&self) -> Result<()> {
        if self.execution_id.trim().is_empty() {
            return Err(LedgerError::Validation("execution id is empty".into()));
        }
        Ok(())
    }

    /// Add an authorized charge to the running total kept for audit.
    pub fn record_charge(&self, cost: u64) {
        let mut state = self.state.write();
        state.accumulated_cost = state.accumulated_cost.saturating_add(cost);
    }

    pub fn accumulated_cost(&self) -> u64 {
        self.state.read().accumulated_cost
    }

    /// Cache the last observed band of a bucket. Only a hint; the ledger never trusts it.
    pub fn set_band_hint(&self, bucket: &str, band: Band) {
        self.state.write().band_hints.insert(bucket.to_string(), band);
    }

    pub fn band_hint(&self, bucket: &str) -> Option<Band> {
        self.state.read().band_hints.get(bucket).copied()
    }

    /// Mark the execution cancelled. The interception layer checks this before charging.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> ContextToken {
        ContextToken {
            execution_id: self.execution_id.clone(),
            agent_id: self.agent_id.clone(),
            group_id: self.group_id.clone(),
            attributes: self.attributes.clone(),
        }
    }

    /// Rebuild a context on the receiving side of a cross-service call.
    /// Accumulated cost and band hints start empty there.
    pub fn from_token(token: ContextToken) -> Self {
        Self {
            execution_id: token.execution_id,
            agent_id: token.agent_id,
            group_id: token.group_id,
            attributes: token.attributes,
            state: Arc::new(RwLock::new(ContextState::default())),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }
}
