use async_trait::async_trait;
use riskledger_core::{ExecutionContext, RiskLevel};

/// Execution-health signals supplied by the host. The engine never computes them.
#[async_trait]
pub trait HealthSignals: Send + Sync {
    async fn error_rate(&self, ctx: &ExecutionContext) -> f64;
    async fn risk_level(&self, ctx: &ExecutionContext) -> RiskLevel;
    /// Whether a blocked action was attempted within the trailing window.
    async fn has_blocked_actions(&self, ctx: &ExecutionContext) -> bool;
}

/// Fixed signals, for hosts without a health feed and for the CLI.
#[derive(Debug, Clone, Copy)]
pub struct StaticHealth {
    pub error_rate: f64,
    pub risk_level: RiskLevel,
    pub has_blocked_actions: bool,
}

impl Default for StaticHealth {
    fn default() -> Self {
        Self {
            error_rate: 0.0,
            risk_level: RiskLevel::Low,
            has_blocked_actions: false,
        }
    }
}

#[async_trait]
impl HealthSignals for StaticHealth {
    async fn error_rate(&self, _ctx: &ExecutionContext) -> f64 {
        self.error_rate
    }

    async fn risk_level(&self, _ctx: &ExecutionContext) -> RiskLevel {
        self.risk_level
    }

    async fn has_blocked_actions(&self, _ctx: &ExecutionContext) -> bool {
        self.has_blocked_actions
    }
}
