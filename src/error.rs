use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Settings(#[from] ::config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Failures surfaced by a usage ledger store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Connectivity or lock contention; the enclosing request may be retried.
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded. Never retried; quota checks fail closed.
    #[error("ledger record is corrupt: {0}")]
    Corrupt(String),

    #[error("ledger operation cancelled")]
    Cancelled,
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Response class a transport maps gateway failures onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    ResourceExhausted,
    Unavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("daily quota limit exceeded ({spent_micros} of {quota_micros} micro-USD spent)")]
    QuotaExceeded { spent_micros: u64, quota_micros: u64 },

    #[error("cannot verify daily quota: {0}")]
    Admission(#[source] LedgerError),

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("usage was not billed: {0}")]
    Billing(#[source] LedgerError),
}

impl GatewayError {
    pub fn status(&self) -> StatusClass {
        match self {
            GatewayError::QuotaExceeded { .. } => StatusClass::ResourceExhausted,
            GatewayError::Admission(e) | GatewayError::Billing(e) if e.is_retryable() => {
                StatusClass::Unavailable
            }
            _ => StatusClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_is_distinct_from_unavailable() {
        let quota = GatewayError::QuotaExceeded {
            spent_micros: 10,
            quota_micros: 10,
        };
        let outage = GatewayError::Admission(LedgerError::Unavailable("locked".into()));
        assert_eq!(quota.status(), StatusClass::ResourceExhausted);
        assert_eq!(outage.status(), StatusClass::Unavailable);
    }

    #[test]
    fn corrupt_ledger_maps_to_internal() {
        let err = GatewayError::Admission(LedgerError::Corrupt("bad column".into()));
        assert_eq!(err.status(), StatusClass::Internal);
        assert!(!LedgerError::Corrupt(String::new()).is_retryable());
        assert_eq!(
            GatewayError::Billing(LedgerError::Cancelled).status(),
            StatusClass::Internal
        );
    }
}
