use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use riskledger_core::{LedgerError, Result};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::audit::{AuditKind, AuditRecord, AuditSink};
use crate::bucket::{
    BucketKey, BucketRecord, BucketStore, DebitOutcome, ExtensionWindow, LimitSpec, RaiseOutcome,
};
use crate::clock::{Clock, SystemClock};

/// How long a writer waits on another connection's lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed bucket store and audit stream.
///
/// Every bucket operation runs as one `BEGIN IMMEDIATE` transaction, so the
/// read-modify-write is serialized against other connections to the same file
/// as well as other tasks in this process. Statements run on the blocking pool,
/// never on an executor thread.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

fn unavailable(e: rusqlite::Error) -> LedgerError {
    LedgerError::StoreUnavailable(e.to_string())
}

fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        info!(?path, "opening bucket store");

        let conn = Connection::open(path).map_err(unavailable)?;

        // WAL for concurrent readers.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(unavailable)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT).map_err(unavailable)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS buckets (
                key TEXT PRIMARY KEY,
                remaining INTEGER NOT NULL,
                lim INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                extended_this_window INTEGER NOT NULL DEFAULT 0,
                window_expires_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                execution_id TEXT NOT NULL,
                bucket_key TEXT NOT NULL,
                kind TEXT NOT NULL,
                cost INTEGER NOT NULL,
                remaining INTEGER NOT NULL,
                lim INTEGER NOT NULL,
                band TEXT NOT NULL,
                verdict TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_execution ON audit_log(execution_id);
            ",
        )
        .map_err(unavailable)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    /// Bound how long a locked database is waited on. Set it to the store timeout so a
    /// contended write fails instead of outliving the caller.
    pub fn with_busy_timeout(self, timeout: Duration) -> Result<Self> {
        self.db.lock().busy_timeout(timeout).map_err(unavailable)?;
        Ok(self)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, DateTime<Utc>) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let clock = self.clock.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock();
            f(&mut *conn, clock.now())
        })
        .await
        .map_err(|e| LedgerError::StoreUnavailable(format!("store task failed: {e}")))?
    }

    /// Run `f` inside one immediate transaction.
    async fn atomically<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>, DateTime<Utc>) -> Result<T> + Send + 'static,
    {
        self.with_conn(move |conn, now| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(unavailable)?;
            let out = f(&tx, now)?;
            tx.commit().map_err(unavailable)?;
            Ok(out)
        })
        .await
    }
}

fn load(tx: &Transaction<'_>, key: &str) -> Result<Option<BucketRecord>> {
    tx.query_row(
        "SELECT remaining, lim, created_at, expires_at, extended_this_window, window_expires_at
         FROM buckets WHERE key = ?1",
        rusqlite::params![key],
        |row| {
            Ok(BucketRecord {
                remaining: row.get::<_, i64>(0)? as u64,
                limit: row.get::<_, i64>(1)? as u64,
                created_at: from_ms(row.get(2)?),
                expires_at: row.get::<_, Option<i64>>(3)?.map(from_ms),
                extended_this_window: row.get::<_, i64>(4)? as u64,
                window_expires_at: row.get::<_, Option<i64>>(5)?.map(from_ms),
            })
        },
    )
    .optional()
    .map_err(unavailable)
}

fn save(tx: &Transaction<'_>, key: &str, record: &BucketRecord) -> Result<()> {
    tx.execute(
        "INSERT INTO buckets (key, remaining, lim, created_at, expires_at, extended_this_window, window_expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(key) DO UPDATE SET
            remaining = excluded.remaining,
            lim = excluded.lim,
            created_at = excluded.created_at,
            expires_at = excluded.expires_at,
            extended_this_window = excluded.extended_this_window,
            window_expires_at = excluded.window_expires_at",
        rusqlite::params![
            key,
            record.remaining as i64,
            record.limit as i64,
            to_ms(record.created_at),
            record.expires_at.map(to_ms),
            record.extended_this_window as i64,
            record.window_expires_at.map(to_ms),
        ],
    )
    .map_err(unavailable)?;
    Ok(())
}

/// Load the live record, seeding a fresh one when absent or expired.
fn load_or_seed(
    tx: &Transaction<'_>,
    key: &str,
    spec: &LimitSpec,
    now: DateTime<Utc>,
) -> Result<BucketRecord> {
    match load(tx, key)? {
        Some(record) if !record.is_expired(now) => Ok(record),
        _ => {
            debug!(bucket = key, limit = spec.initial_limit, "seeding bucket");
            BucketRecord::fresh(spec, now)
        }
    }
}

#[async_trait]
impl BucketStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn conditional_debit(&self, key: &BucketKey, cost: u64, spec: &LimitSpec) -> Result<DebitOutcome> {
        let storage_key = key.storage_key();
        let spec = spec.clone();
        self.atomically(move |tx, now| {
            let mut record = load_or_seed(tx, &storage_key, &spec, now)?;
            let outcome = record.try_debit(cost, spec.red_cutoff);
            // A refused debit still persists a freshly seeded bucket.
            save(tx, &storage_key, &record)?;
            Ok(outcome)
        })
        .await
    }

    async fn credit(&self, key: &BucketKey, amount: u64) -> Result<u64> {
        let storage_key = key.storage_key();
        self.atomically(move |tx, now| match load(tx, &storage_key)? {
            Some(mut record) if !record.is_expired(now) => {
                let remaining = record.credit(amount);
                save(tx, &storage_key, &record)?;
                Ok(remaining)
            }
            _ => Ok(0),
        })
        .await
    }

    async fn raise_limit(
        &self,
        key: &BucketKey,
        amount: u64,
        spec: &LimitSpec,
        window: Option<&ExtensionWindow>,
    ) -> Result<RaiseOutcome> {
        let storage_key = key.storage_key();
        let spec = spec.clone();
        let window = window.copied();
        self.atomically(move |tx, now| {
            let mut record = load_or_seed(tx, &storage_key, &spec, now)?;
            let outcome = record.raise(amount, window.as_ref(), now)?;
            save(tx, &storage_key, &record)?;
            Ok(outcome)
        })
        .await
    }

    async fn snapshot(&self, key: &BucketKey) -> Result<Option<BucketRecord>> {
        let storage_key = key.storage_key();
        self.atomically(move |tx, now| Ok(load(tx, &storage_key)?.filter(|r| !r.is_expired(now))))
            .await
    }

    async fn reset(&self, key: &BucketKey) -> Result<bool> {
        let storage_key = key.storage_key();
        self.atomically(move |tx, _now| {
            let rows = tx
                .execute("DELETE FROM buckets WHERE key = ?1", rusqlite::params![storage_key])
                .map_err(unavailable)?;
            Ok(rows > 0)
        })
        .await
    }
}

type AuditRow = (i64, String, String, String, i64, i64, i64, String, String);

fn audit_from_row(row: AuditRow) -> Result<AuditRecord> {
    let (timestamp, execution_id, bucket_key, kind, cost, remaining, limit, band, verdict) = row;
    Ok(AuditRecord {
        timestamp: from_ms(timestamp),
        execution_id,
        bucket_key,
        kind: serde_json::from_str::<AuditKind>(&kind)?,
        cost: cost as u64,
        remaining: remaining as u64,
        limit: limit as u64,
        band: band.parse()?,
        verdict: verdict.parse()?,
    })
}

impl SqliteStore {
    async fn query_audit(&self, sql: &'static str, execution_id: Option<String>, limit: usize) -> Result<Vec<AuditRecord>> {
        let rows = self
            .with_conn(move |conn, _now| {
                let mut stmt = conn.prepare(sql).map_err(unavailable)?;
                let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<AuditRow> {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                };
                let rows = match &execution_id {
                    Some(id) => stmt.query_map(rusqlite::params![id, limit as i64], map_row),
                    None => stmt.query_map(rusqlite::params![limit as i64], map_row),
                }
                .map_err(unavailable)?
                .collect::<rusqlite::Result<Vec<AuditRow>>>()
                .map_err(unavailable)?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(audit_from_row).collect()
    }
}

#[async_trait]
impl AuditSink for SqliteStore {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        let kind = serde_json::to_string(&record.kind)?;
        self.with_conn(move |conn, _now| {
            conn.execute(
                "INSERT INTO audit_log (timestamp, execution_id, bucket_key, kind, cost, remaining, lim, band, verdict)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    to_ms(record.timestamp),
                    record.execution_id,
                    record.bucket_key,
                    kind,
                    record.cost as i64,
                    record.remaining as i64,
                    record.limit as i64,
                    record.band.as_str(),
                    record.verdict.as_str(),
                ],
            )
            .map_err(unavailable)?;
            Ok(())
        })
        .await
    }

    async fn for_execution(&self, execution_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        self.query_audit(
            "SELECT timestamp, execution_id, bucket_key, kind, cost, remaining, lim, band, verdict
             FROM audit_log WHERE execution_id = ?1 ORDER BY id ASC LIMIT ?2",
            Some(execution_id.to_string()),
            limit,
        )
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        self.query_audit(
            "SELECT timestamp, execution_id, bucket_key, kind, cost, remaining, lim, band, verdict
             FROM audit_log ORDER BY id DESC LIMIT ?1",
            None,
            limit,
        )
        .await
    }
}
