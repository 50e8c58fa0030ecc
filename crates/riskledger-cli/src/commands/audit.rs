use riskledger_config::RiskLedgerConfig;
use riskledger_core::Result;
use riskledger_store::AuditKind;

use super::ledger::{band_color, open_backends};

pub(super) async fn cmd_audit(
    config: &RiskLedgerConfig,
    execution: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let (_, audit) = open_backends(config)?;
    let records = match execution {
        Some(id) => audit.for_execution(id, limit).await?,
        None => audit.recent(limit).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!(
            "No audit records{}",
            execution
                .map(|id| format!(" for execution '{id}'"))
                .unwrap_or_default()
        );
        return Ok(());
    }

    println!("\x1b[1mAudit Log\x1b[0m ({} entries)", records.len());
    println!("{}", "-".repeat(80));

    for record in &records {
        let ts = record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        let detail = match &record.kind {
            AuditKind::Charge => format!("cost {}", record.cost),
            AuditKind::Transition { from, to } => format!("{from} → {to}"),
            AuditKind::Extension { granted } => format!("+{granted}"),
            AuditKind::Reset => String::new(),
        };
        println!(
            "\x1b[90m{ts}\x1b[0m  {:<10} {:<28} {}{:<6}\x1b[0m {:>8}/{:<8} {:<8} {detail}",
            record.kind.label(),
            record.bucket_key,
            band_color(record.band),
            record.band.to_string(),
            record.remaining,
            record.limit,
            record.verdict.to_string(),
        );
        if execution.is_none() {
            println!("   \x1b[90mexecution {}\x1b[0m", record.execution_id);
        }
    }

    Ok(())
}
