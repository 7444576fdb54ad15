use crate::error::LedgerError;
use crate::ledger::UsageLedger;
use crate::models::{BucketKey, CostDelta, UsageBatch};
use crate::pricing::PricingTable;
use chrono::NaiveDate;
use tracing::{debug, error};

/// Prices completed usage and books it to the daily bucket and the all-time total.
#[derive(Clone)]
pub struct SpendingRecorder {
    ledger: UsageLedger,
    pricing: PricingTable,
}

impl SpendingRecorder {
    pub fn new(ledger: UsageLedger, pricing: PricingTable) -> Self {
        Self { ledger, pricing }
    }

    /// Records one billable sub-operation. Call only after the operation succeeded.
    ///
    /// Pricing and both bucket writes happen in one store transaction, so the
    /// free tier is measured against a total no concurrent recorder can move.
    /// On failure the batch is logged for reconciliation and the error is
    /// returned so the caller can fail the request rather than leave it unbilled.
    pub async fn record(
        &self,
        day: NaiveDate,
        batch: &UsageBatch,
    ) -> Result<CostDelta, LedgerError> {
        if batch.is_empty() {
            return Ok(CostDelta::default());
        }

        let buckets = [BucketKey::Daily(day), BucketKey::Total];
        let delta = match self
            .ledger
            .price_and_apply(&buckets, batch, &self.pricing)
            .await
        {
            Ok(delta) => delta,
            Err(err) => {
                error!(
                    %day,
                    error = %err,
                    premium_voice_characters = batch.premium_voice_characters,
                    standard_voice_characters = batch.standard_voice_characters,
                    model_input_units = batch.model_input_units,
                    model_output_units = batch.model_output_units,
                    "spending not applied; ledger needs reconciliation"
                );
                return Err(err);
            }
        };

        debug!(%day, cost_micros = delta.cost_micros, "spending recorded");
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::UsageLedgerStore;
    use crate::models::{UsageRecord, VoiceTier};
    use crate::pricing::{built_in_pricing, PricingEntry};
    use crate::storage::SqliteLedgerStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).expect("valid date")
    }

    fn setup(tmp: &TempDir, pricing: PricingTable) -> (UsageLedger, SpendingRecorder) {
        let path = tmp.path().join("ledger.sqlite");
        let store = SqliteLedgerStore::open(&path, Duration::from_secs(5)).expect("open store");
        let ledger = UsageLedger::new(Arc::new(store));
        (ledger.clone(), SpendingRecorder::new(ledger, pricing))
    }

    #[tokio::test]
    async fn free_tier_is_measured_against_all_time_total() {
        let tmp = TempDir::new().expect("tempdir");
        let pricing = PricingTable {
            standard_voice: PricingEntry::new(4, 1000),
            ..built_in_pricing()
        };
        let (ledger, recorder) = setup(&tmp, pricing);

        let earlier = day().pred_opt().expect("previous day");
        recorder
            .record(earlier, &UsageBatch::speech(VoiceTier::Standard, 990))
            .await
            .expect("seed yesterday");

        let delta = recorder
            .record(day(), &UsageBatch::speech(VoiceTier::Standard, 20))
            .await
            .expect("record today");
        assert_eq!(delta.cost_micros, 40);

        let today = ledger.read_daily(day()).await.expect("daily");
        assert_eq!(today.cost_micros, 40);
        assert_eq!(today.standard_voice_characters, 20);

        let total = ledger.read_total().await.expect("total");
        assert_eq!(total.cost_micros, 40);
        assert_eq!(total.standard_voice_characters, 1010);
    }

    #[tokio::test]
    async fn empty_batch_is_not_written() {
        let tmp = TempDir::new().expect("tempdir");
        let (ledger, recorder) = setup(&tmp, built_in_pricing());
        let delta = recorder
            .record(day(), &UsageBatch::default())
            .await
            .expect("record");
        assert!(delta.is_empty());
        assert!(ledger.daily_history().await.expect("history").is_empty());
    }

    struct RejectingStore {
        increments: AtomicUsize,
    }

    #[async_trait]
    impl UsageLedgerStore for RejectingStore {
        async fn get(&self, _key: BucketKey) -> Result<Option<UsageRecord>, LedgerError> {
            Ok(None)
        }

        async fn increment(
            &self,
            _keys: &[BucketKey],
            _delta: &CostDelta,
        ) -> Result<(), LedgerError> {
            Ok(())
        }

        async fn record(
            &self,
            _keys: &[BucketKey],
            _batch: &UsageBatch,
            _pricing: &PricingTable,
        ) -> Result<CostDelta, LedgerError> {
            self.increments.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Unavailable("write timed out".into()))
        }

        async fn list_daily(&self) -> Result<Vec<(NaiveDate, UsageRecord)>, LedgerError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn failed_write_is_surfaced() {
        let store = Arc::new(RejectingStore {
            increments: AtomicUsize::new(0),
        });
        let recorder = SpendingRecorder::new(UsageLedger::new(store.clone()), built_in_pricing());

        let err = recorder
            .record(day(), &UsageBatch::model(10, 10))
            .await
            .expect_err("write failure must propagate");
        assert!(err.is_retryable());
        assert_eq!(store.increments.load(Ordering::SeqCst), 1);
    }
}
