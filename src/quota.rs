use crate::error::LedgerError;
use crate::ledger::UsageLedger;
use chrono::NaiveDate;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { spent_micros: u64 },
    OverQuota { spent_micros: u64, quota_micros: u64 },
}

/// Soft daily spending ceiling.
///
/// Requests admitted just below the ceiling may together push spend past it
/// before the next check observes their cost; only the next admission is refused.
#[derive(Clone)]
pub struct QuotaGate {
    ledger: UsageLedger,
    daily_quota_micros: u64,
}

impl QuotaGate {
    pub fn new(ledger: UsageLedger, daily_quota_micros: u64) -> Self {
        Self {
            ledger,
            daily_quota_micros,
        }
    }

    pub fn daily_quota_micros(&self) -> u64 {
        self.daily_quota_micros
    }

    /// Read failures propagate so callers refuse the request instead of admitting it unmetered.
    pub async fn check(&self, day: NaiveDate) -> Result<Admission, LedgerError> {
        let spent_micros = self.ledger.read_daily(day).await?.cost_micros;
        if spent_micros >= self.daily_quota_micros {
            warn!(
                %day,
                spent_micros,
                quota_micros = self.daily_quota_micros,
                "daily quota exceeded"
            );
            return Ok(Admission::OverQuota {
                spent_micros,
                quota_micros: self.daily_quota_micros,
            });
        }
        debug!(%day, spent_micros, "request admitted");
        Ok(Admission::Admitted { spent_micros })
    }

    pub async fn is_over_quota(&self, day: NaiveDate) -> Result<bool, LedgerError> {
        Ok(matches!(self.check(day).await?, Admission::OverQuota { .. }))
    }
}
