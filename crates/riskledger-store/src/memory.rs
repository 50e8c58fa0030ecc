use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use riskledger_core::Result;
use std::sync::Arc;
use tracing::debug;

use crate::bucket::{
    BucketKey, BucketRecord, BucketStore, DebitOutcome, ExtensionWindow, LimitSpec, RaiseOutcome,
};
use crate::clock::{Clock, SystemClock};

/// In-process bucket store. Each key's shard lock is held for the whole
/// read-modify-write, which makes every operation atomic per key.
#[derive(Clone)]
pub struct MemoryBucketStore {
    buckets: Arc<DashMap<String, BucketRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryBucketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of live (possibly expired but not yet evicted) buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Evict expired buckets. Call periodically in a background task.
    pub fn cleanup(&self) {
        let now = self.clock.now();
        self.buckets.retain(|_key, record| !record.is_expired(now));
    }

    /// Fetch the live record for `key`, seeding (or re-seeding after expiry) from `spec`.
    fn live_entry<'a>(
        &'a self,
        key: &BucketKey,
        spec: &LimitSpec,
    ) -> Result<dashmap::mapref::one::RefMut<'a, String, BucketRecord>> {
        let now = self.clock.now();
        match self.buckets.entry(key.storage_key()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    debug!(bucket = %key, "bucket expired, reseeding");
                    occupied.insert(BucketRecord::fresh(spec, now)?);
                }
                Ok(occupied.into_ref())
            }
            Entry::Vacant(vacant) => {
                debug!(bucket = %key, limit = spec.initial_limit, "creating bucket");
                let record = BucketRecord::fresh(spec, now)?;
                Ok(vacant.insert(record))
            }
        }
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn conditional_debit(&self, key: &BucketKey, cost: u64, spec: &LimitSpec) -> Result<DebitOutcome> {
        let mut record = self.live_entry(key, spec)?;
        Ok(record.try_debit(cost, spec.red_cutoff))
    }

    async fn credit(&self, key: &BucketKey, amount: u64) -> Result<u64> {
        let now = self.clock.now();
        match self.buckets.get_mut(&key.storage_key()) {
            Some(mut record) if !record.is_expired(now) => Ok(record.credit(amount)),
            _ => Ok(0),
        }
    }

    async fn raise_limit(
        &self,
        key: &BucketKey,
        amount: u64,
        spec: &LimitSpec,
        window: Option<&ExtensionWindow>,
    ) -> Result<RaiseOutcome> {
        let now = self.clock.now();
        let mut record = self.live_entry(key, spec)?;
        record.raise(amount, window, now)
    }

    async fn snapshot(&self, key: &BucketKey) -> Result<Option<BucketRecord>> {
        let now = self.clock.now();
        Ok(self
            .buckets
            .get(&key.storage_key())
            .filter(|record| !record.is_expired(now))
            .map(|record| record.value().clone()))
    }

    async fn reset(&self, key: &BucketKey) -> Result<bool> {
        Ok(self.buckets.remove(&key.storage_key()).is_some())
    }
}
