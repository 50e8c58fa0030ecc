//! Audit emission and band-transition notifications.
//!
//! Neither path can fail a charge: audit errors are logged inline, notification
//! delivery runs on a spawned task and only ever logs. Short-lived hosts call
//! [`TransitionNotifier::flush`] before shutting down the runtime.

use async_trait::async_trait;
use chrono::Utc;
use riskledger_config::ChannelConfig;
use riskledger_core::{Event, EventBus, ExecutionContext, LedgerError, Result};
use riskledger_store::{AuditKind, AuditRecord, AuditSink};
use serde_json::{Value, json};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::ledger::BucketState;
use crate::profile::Profile;
use crate::verdict::Verdict;

/// Delivers a notification payload to a named channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel: &str, payload: &Value, include_options: bool) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, channel: &str, payload: &Value, include_options: bool) -> Result<()> {
        info!(channel, include_options, payload = %payload, "band notification");
        Ok(())
    }
}

/// Publishes notifications on the event bus.
#[derive(Clone)]
pub struct EventBusSink {
    events: EventBus,
}

impl EventBusSink {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

#[async_trait]
impl NotificationSink for EventBusSink {
    async fn send(&self, channel: &str, payload: &Value, include_options: bool) -> Result<()> {
        self.events.publish(Event::Notification {
            channel: channel.to_string(),
            payload: payload.clone(),
            include_options,
        });
        Ok(())
    }
}

/// POSTs the payload as JSON to a fixed URL.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, channel: &str, payload: &Value, include_options: bool) -> Result<()> {
        let body = json!({
            "channel": channel,
            "include_options": include_options,
            "payload": payload,
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Notification {
                channel: channel.to_string(),
                reason: format!("HTTP error: {e}"),
            })?;
        if !resp.status().is_success() {
            return Err(LedgerError::Notification {
                channel: channel.to_string(),
                reason: format!("webhook returned {}", resp.status()),
            });
        }
        Ok(())
    }
}

/// Dispatches by channel name to the sink configured for it.
#[derive(Clone, Default)]
pub struct ChannelRouter {
    channels: HashMap<String, Arc<dyn NotificationSink>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, name: impl Into<String>, sink: Arc<dyn NotificationSink>) -> Self {
        self.channels.insert(name.into(), sink);
        self
    }

    /// Build sinks for every enabled channel. `event_bus` channels need `events`.
    pub fn from_config(channels: &HashMap<String, ChannelConfig>, events: Option<&EventBus>) -> Result<Self> {
        let mut router = Self::new();
        for (name, channel) in channels {
            if !channel.enabled {
                debug!(channel = %name, "channel disabled, skipping");
                continue;
            }
            let sink: Arc<dyn NotificationSink> = match channel.channel_type.as_str() {
                "log" => Arc::new(LogSink),
                "webhook" => {
                    let url = channel.url.as_deref().ok_or_else(|| {
                        LedgerError::Configuration(format!("channel '{name}': webhook needs a url"))
                    })?;
                    Arc::new(WebhookSink::new(url))
                }
                "event_bus" => {
                    let events = events.ok_or_else(|| {
                        LedgerError::Configuration(format!("channel '{name}': no event bus available"))
                    })?;
                    Arc::new(EventBusSink::new(events.clone()))
                }
                other => {
                    return Err(LedgerError::Configuration(format!(
                        "channel '{name}': unknown type '{other}'"
                    )));
                }
            };
            router.channels.insert(name.clone(), sink);
        }
        Ok(router)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl NotificationSink for ChannelRouter {
    async fn send(&self, channel: &str, payload: &Value, include_options: bool) -> Result<()> {
        let sink = self.channels.get(channel).ok_or_else(|| LedgerError::Notification {
            channel: channel.to_string(),
            reason: "no such channel".into(),
        })?;
        sink.send(channel, payload, include_options).await
    }
}

/// Emits audit records, transition events and notifications for finished charges.
#[derive(Clone)]
pub struct TransitionNotifier {
    audit: Arc<dyn AuditSink>,
    sink: Option<Arc<dyn NotificationSink>>,
    events: Option<EventBus>,
    deliveries: Arc<Mutex<JoinSet<()>>>,
}

impl TransitionNotifier {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            audit,
            sink: None,
            events: None,
            deliveries: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Notification sends still in flight.
    pub fn pending(&self) -> usize {
        let mut deliveries = self.deliveries.lock();
        while deliveries.try_join_next().is_some() {}
        deliveries.len()
    }

    /// Wait up to `timeout` for in-flight notification sends. Sends still running at
    /// the deadline are aborted; returns how many were.
    pub async fn flush(&self, timeout: Duration) -> usize {
        let mut pending = std::mem::take(&mut *self.deliveries.lock());
        if pending.is_empty() {
            return 0;
        }
        let drained = tokio::time::timeout(timeout, async {
            while pending.join_next().await.is_some() {}
        })
        .await;
        if drained.is_ok() {
            return 0;
        }
        let abandoned = pending.len();
        warn!(abandoned, timeout_ms = timeout.as_millis() as u64, "notification flush timed out");
        pending.shutdown().await;
        abandoned
    }

    /// One charge record per touched bucket, then one transition record and the
    /// matching notifications per band change.
    pub async fn record(&self, ctx: &ExecutionContext, profile: &Profile, verdict: &Verdict) {
        let now = Utc::now();
        for state in &verdict.buckets {
            self.append(AuditRecord {
                timestamp: now,
                execution_id: ctx.execution_id().to_string(),
                bucket_key: state.key.to_string(),
                kind: AuditKind::Charge,
                cost: verdict.charged,
                remaining: state.remaining,
                limit: state.limit,
                band: state.band,
                verdict: verdict.kind,
            })
            .await;
        }

        for ext in &verdict.extensions {
            self.append(AuditRecord {
                timestamp: now,
                execution_id: ctx.execution_id().to_string(),
                bucket_key: ext.bucket_key.clone(),
                kind: AuditKind::Extension {
                    granted: ext.granted,
                },
                cost: 0,
                remaining: ext.remaining,
                limit: ext.limit,
                band: verdict
                    .buckets
                    .iter()
                    .find(|b| b.key.to_string() == ext.bucket_key)
                    .map(|b| b.band)
                    .unwrap_or(verdict.band),
                verdict: verdict.kind,
            })
            .await;
            if let Some(events) = &self.events {
                events.publish(Event::BudgetExtended {
                    execution_id: ctx.execution_id().to_string(),
                    bucket_key: ext.bucket_key.clone(),
                    granted: ext.granted,
                    limit: ext.limit,
                });
            }
        }

        for state in verdict.buckets.iter().filter(|s| s.transitioned()) {
            info!(
                execution_id = %ctx.execution_id(),
                bucket = %state.key,
                from = %state.band_before,
                to = %state.band,
                remaining = state.remaining,
                limit = state.limit,
                "band transition"
            );
            self.append(AuditRecord {
                timestamp: now,
                execution_id: ctx.execution_id().to_string(),
                bucket_key: state.key.to_string(),
                kind: AuditKind::Transition {
                    from: state.band_before,
                    to: state.band,
                },
                cost: verdict.charged,
                remaining: state.remaining,
                limit: state.limit,
                band: state.band,
                verdict: verdict.kind,
            })
            .await;
            if let Some(events) = &self.events {
                events.publish(Event::BandTransition {
                    execution_id: ctx.execution_id().to_string(),
                    bucket_key: state.key.to_string(),
                    from: state.band_before,
                    to: state.band,
                    remaining: state.remaining,
                    limit: state.limit,
                });
            }
            self.notify(ctx, profile, state);
        }
    }

    async fn append(&self, record: AuditRecord) {
        let bucket = record.bucket_key.clone();
        if let Err(e) = self.audit.append(record).await {
            warn!(bucket = %bucket, error = %e, "audit append failed");
        }
    }

    fn notify(&self, ctx: &ExecutionContext, profile: &Profile, state: &BucketState) {
        let Some(sink) = &self.sink else {
            return;
        };
        for rule in profile.notifications.iter().filter(|r| r.to == state.band) {
            let payload = transition_payload(ctx, profile, state, rule.include_options);
            let sink = Arc::clone(sink);
            let channel = rule.channel.clone();
            let include_options = rule.include_options;
            let mut deliveries = self.deliveries.lock();
            while deliveries.try_join_next().is_some() {}
            deliveries.spawn(async move {
                if let Err(e) = sink.send(&channel, &payload, include_options).await {
                    warn!(channel = %channel, error = %e, "notification delivery failed");
                }
            });
        }
    }
}

fn transition_payload(ctx: &ExecutionContext, profile: &Profile, state: &BucketState, include_options: bool) -> Value {
    let mut payload = json!({
        "execution_id": ctx.execution_id(),
        "profile": profile.name,
        "bucket": state.name,
        "bucket_key": state.key.to_string(),
        "from": state.band_before,
        "to": state.band,
        "remaining": state.remaining,
        "limit": state.limit,
    });
    if include_options {
        let mut options = vec!["continue", "halt", "reset"];
        if profile.auto_extend.is_some() {
            options.push("extend");
        }
        payload["options"] = json!(options);
    }
    payload
}
