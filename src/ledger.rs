use crate::error::LedgerError;
use crate::models::{BucketKey, CostDelta, UsageBatch, UsageRecord};
use crate::pricing::PricingTable;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

/// Persistence backend holding the authoritative usage counters.
///
/// A missing bucket is reported as `Ok(None)`, never as an error.
/// `increment` must add the delta to every listed bucket as a single
/// all-or-nothing operation performed by the store itself.
#[async_trait]
pub trait UsageLedgerStore: Send + Sync {
    async fn get(&self, key: BucketKey) -> Result<Option<UsageRecord>, LedgerError>;

    async fn increment(&self, keys: &[BucketKey], delta: &CostDelta) -> Result<(), LedgerError>;

    /// Prices `batch` against the stored all-time total and adds the resulting
    /// delta to every listed bucket. The total read and the writes form one
    /// atomic unit, so concurrent callers never price against the same total.
    async fn record(
        &self,
        keys: &[BucketKey],
        batch: &UsageBatch,
        pricing: &PricingTable,
    ) -> Result<CostDelta, LedgerError>;

    /// Every daily bucket, newest first.
    async fn list_daily(&self) -> Result<Vec<(NaiveDate, UsageRecord)>, LedgerError>;
}

/// Current calendar date in UTC, the reference zone for daily buckets.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn UsageLedgerStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageLedgerStore>) -> Self {
        Self { store }
    }

    pub async fn read_daily(&self, day: NaiveDate) -> Result<UsageRecord, LedgerError> {
        self.read(BucketKey::Daily(day)).await
    }

    pub async fn read_total(&self) -> Result<UsageRecord, LedgerError> {
        self.read(BucketKey::Total).await
    }

    pub async fn apply_delta(
        &self,
        bucket: BucketKey,
        delta: &CostDelta,
    ) -> Result<(), LedgerError> {
        self.apply_to_all(&[bucket], delta).await
    }

    /// Applies one delta to several buckets atomically.
    pub async fn apply_to_all(
        &self,
        buckets: &[BucketKey],
        delta: &CostDelta,
    ) -> Result<(), LedgerError> {
        if buckets.is_empty() || delta.is_empty() {
            return Ok(());
        }
        self.store.increment(buckets, delta).await
    }

    /// Prices and books `batch` to several buckets in one store operation.
    pub async fn price_and_apply(
        &self,
        buckets: &[BucketKey],
        batch: &UsageBatch,
        pricing: &PricingTable,
    ) -> Result<CostDelta, LedgerError> {
        if buckets.is_empty() || batch.is_empty() {
            return Ok(CostDelta::default());
        }
        self.store.record(buckets, batch, pricing).await
    }

    pub async fn daily_history(&self) -> Result<Vec<(NaiveDate, UsageRecord)>, LedgerError> {
        self.store.list_daily().await
    }

    async fn read(&self, key: BucketKey) -> Result<UsageRecord, LedgerError> {
        Ok(self.store.get(key).await?.unwrap_or_default())
    }
}
