use riskledger_config::{RiskLedgerConfig, StoreBackend};
use riskledger_core::{Band, EventBus, ExecutionContext, Result, VerdictKind};
use riskledger_engine::{BucketSelector, ChannelRouter, Governor, ProfileRegistry, StaticHealth, Verdict};
use riskledger_store::{AuditSink, BucketStore, MemoryAuditLog, MemoryBucketStore, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// How long `charge` waits for notification sends before exiting.
const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub(super) struct ChargeRequest {
    pub profile: String,
    pub bucket: String,
    pub action: String,
    pub cost: i64,
}

/// Open the configured bucket store and audit sink.
pub(super) fn open_backends(config: &RiskLedgerConfig) -> Result<(Arc<dyn BucketStore>, Arc<dyn AuditSink>)> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            if let Some(parent) = config.store.db_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            let store = Arc::new(
                SqliteStore::open(&config.store.db_path)?
                    .with_busy_timeout(Duration::from_millis(config.store.timeout_ms))?,
            );
            let buckets: Arc<dyn BucketStore> = store.clone();
            let audit: Arc<dyn AuditSink> = store;
            Ok((buckets, audit))
        }
        StoreBackend::Memory => {
            warn!("memory store backend: balances are discarded when this command exits");
            let buckets: Arc<dyn BucketStore> = Arc::new(MemoryBucketStore::new());
            let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditLog::new());
            Ok((buckets, audit))
        }
    }
}

pub(super) fn open_governor(config: &RiskLedgerConfig) -> Result<Governor> {
    let registry = ProfileRegistry::from_config(config)?;
    let (store, audit) = open_backends(config)?;
    let events = EventBus::default();
    let router = ChannelRouter::from_config(&config.channels, Some(&events))?;
    Ok(Governor::new(registry, store, audit)
        .with_sink(Arc::new(router))
        .with_events(events)
        .with_timeout(Duration::from_millis(config.store.timeout_ms))
        .with_fail_mode(config.store.fail_mode))
}

pub(super) async fn cmd_charge(
    config: &RiskLedgerConfig,
    request: ChargeRequest,
    ctx: ExecutionContext,
    health: StaticHealth,
    json: bool,
) -> Result<()> {
    let governor = open_governor(config)?.with_health(Arc::new(health));
    let selector = BucketSelector::parse(&request.bucket);
    let verdict = governor
        .charge(&ctx, &request.profile, &selector, &request.action, request.cost)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }

    let abandoned = governor.flush_notifications(NOTIFY_FLUSH_TIMEOUT).await;
    if abandoned > 0 {
        warn!(abandoned, "notifications not delivered before exit");
    }

    verdict.into_result().map(|_| ())
}

pub(super) async fn cmd_band(
    config: &RiskLedgerConfig,
    profile: &str,
    bucket: &str,
    ctx: ExecutionContext,
    json: bool,
) -> Result<()> {
    let governor = open_governor(config)?;
    let reading = governor.current_band(&ctx, profile, bucket).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reading)?);
        return Ok(());
    }
    let state = if reading.exists { "" } else { " (not created yet)" };
    println!(
        "{} {}  {}  {}/{} remaining{state}",
        band_color(reading.band),
        reading.band,
        reading.key,
        reading.remaining,
        reading.limit
    );
    Ok(())
}

pub(super) async fn cmd_reset(config: &RiskLedgerConfig, profile: &str, bucket: &str, ctx: ExecutionContext) -> Result<()> {
    let governor = open_governor(config)?;
    if governor.reset_bucket(&ctx, profile, bucket).await? {
        println!("✅ {bucket} reset for execution {}", ctx.execution_id());
    } else {
        println!("{bucket} has no live instance for execution {}", ctx.execution_id());
    }
    Ok(())
}

pub(super) async fn cmd_extend(
    config: &RiskLedgerConfig,
    profile: &str,
    bucket: &str,
    amount: u64,
    ctx: ExecutionContext,
) -> Result<()> {
    let governor = open_governor(config)?;
    let outcome = governor.raise_limit(&ctx, profile, bucket, amount).await?;
    println!(
        "✅ {bucket}: +{} → limit {}, remaining {}",
        outcome.granted, outcome.limit, outcome.remaining
    );
    Ok(())
}

fn print_verdict(verdict: &Verdict) {
    let icon = match verdict.kind {
        VerdictKind::Proceed => "✅",
        VerdictKind::Blocked => "🚫",
        VerdictKind::Halted => "⏸ ",
        VerdictKind::Rejected => "❌",
    };
    println!(
        "{icon} {}  band {}{}\x1b[0m",
        verdict.kind,
        band_color(verdict.band),
        verdict.band
    );
    if verdict.outcome_unknown {
        println!("   \x1b[33moutcome unknown\x1b[0m: store did not answer");
    }
    for state in &verdict.buckets {
        println!(
            "   {:<12} {}{:<6}\x1b[0m {}/{}",
            state.name,
            band_color(state.band),
            state.band.to_string(),
            state.remaining,
            state.limit
        );
    }
    for (key, value) in &verdict.directives.degrade {
        println!("   degrade {key} = {value}");
    }
    if let Some(ms) = verdict.directives.throttle_ms {
        println!("   throttle {ms}ms");
    }
    if let Some(retries) = verdict.directives.max_retries {
        println!("   max retries {retries}");
    }
    for ext in &verdict.extensions {
        println!("   extended {} by {} (limit {})", ext.bucket_key, ext.granted, ext.limit);
    }
    if let Some(fallback) = &verdict.fallback_strategy {
        println!("   fallback {fallback}");
    }
    if let Some(reason) = &verdict.reason {
        println!("   \x1b[90m{reason}\x1b[0m");
    }
}

pub(super) fn band_color(band: Band) -> &'static str {
    match band {
        Band::Green => "\x1b[32m",
        Band::Yellow => "\x1b[33m",
        Band::Orange => "\x1b[38;5;208m",
        Band::Red => "\x1b[31m",
    }
}
