use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{Band, VerdictKind};

/// Events emitted by the governor for dashboards and other observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Charge lifecycle ───────────────────────────────────────
    ChargeEvaluated {
        execution_id: String,
        profile: String,
        action: String,
        cost: u64,
        verdict: VerdictKind,
    },
    CompensationApplied {
        execution_id: String,
        bucket_key: String,
        amount: u64,
    },

    // ── Bucket lifecycle ───────────────────────────────────────
    BandTransition {
        execution_id: String,
        bucket_key: String,
        from: Band,
        to: Band,
        remaining: u64,
        limit: u64,
    },
    BudgetExtended {
        execution_id: String,
        bucket_key: String,
        granted: u64,
        limit: u64,
    },
    BucketReset {
        bucket_key: String,
    },

    // ── Notifications ──────────────────────────────────────────
    Notification {
        channel: String,
        payload: serde_json::Value,
        include_options: bool,
    },
}

/// A broadcast-based event bus for governor events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
