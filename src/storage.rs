use crate::accumulator::compute_delta;
use crate::error::LedgerError;
use crate::ledger::UsageLedgerStore;
use crate::models::{BucketKey, CostDelta, UsageBatch, UsageRecord};
use crate::pricing::PricingTable;
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{
    params, Connection, ErrorCode, InterruptHandle, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SELECT_COLUMNS: &str = "cost_micros, premium_voice_characters, standard_voice_characters, \
                              model_input_units, model_output_units";

const UPSERT_INCREMENT: &str = r#"
    INSERT INTO usage_ledger (
        bucket, cost_micros, premium_voice_characters, standard_voice_characters,
        model_input_units, model_output_units
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(bucket) DO UPDATE SET
        cost_micros = cost_micros + excluded.cost_micros,
        premium_voice_characters = premium_voice_characters + excluded.premium_voice_characters,
        standard_voice_characters = standard_voice_characters + excluded.standard_voice_characters,
        model_input_units = model_input_units + excluded.model_input_units,
        model_output_units = model_output_units + excluded.model_output_units
"#;

/// SQLite-backed ledger. Each operation opens its own connection so concurrent
/// callers serialize inside SQLite rather than in this process.
pub struct SqliteLedgerStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteLedgerStore {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, LedgerError> {
        let this = Self {
            path: path.to_path_buf(),
            busy_timeout,
        };
        this.init()?;
        Ok(this)
    }

    fn connect(&self) -> Result<Connection, LedgerError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn init(&self) -> Result<(), LedgerError> {
        let conn = self.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS usage_ledger (
                bucket TEXT PRIMARY KEY,
                cost_micros INTEGER NOT NULL DEFAULT 0,
                premium_voice_characters INTEGER NOT NULL DEFAULT 0,
                standard_voice_characters INTEGER NOT NULL DEFAULT 0,
                model_input_units INTEGER NOT NULL DEFAULT 0,
                model_output_units INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(())
    }

    /// Runs `op` on a blocking thread. Dropping the returned future flags the
    /// operation as cancelled and interrupts the connection, so an abandoned
    /// write rolls back rather than committing later.
    async fn run<T, F>(&self, op: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &AtomicBool) -> Result<T, LedgerError> + Send + 'static,
    {
        let mut conn = self.connect()?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let guard = CancelOnDrop {
            cancelled: Arc::clone(&cancelled),
            interrupt: Some(conn.get_interrupt_handle()),
        };

        let joined = tokio::task::spawn_blocking(move || {
            if cancelled.load(Ordering::SeqCst) {
                return Err(LedgerError::Cancelled);
            }
            op(&mut conn, &cancelled)
        })
        .await;
        guard.disarm();

        joined.map_err(|e| LedgerError::Unavailable(format!("ledger worker failed: {e}")))?
    }
}

struct CancelOnDrop {
    cancelled: Arc<AtomicBool>,
    interrupt: Option<InterruptHandle>,
}

impl CancelOnDrop {
    fn disarm(mut self) {
        self.interrupt = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.interrupt.take() {
            self.cancelled.store(true, Ordering::SeqCst);
            handle.interrupt();
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
                LedgerError::Cancelled
            }
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) =>
            {
                LedgerError::Corrupt(err.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => LedgerError::Corrupt(err.to_string()),
            _ => LedgerError::Unavailable(err.to_string()),
        }
    }
}

fn read_columns(row: &Row<'_>, offset: usize) -> rusqlite::Result<[i64; 5]> {
    Ok([
        row.get(offset)?,
        row.get(offset + 1)?,
        row.get(offset + 2)?,
        row.get(offset + 3)?,
        row.get(offset + 4)?,
    ])
}

fn decode_record(bucket: &str, raw: [i64; 5]) -> Result<UsageRecord, LedgerError> {
    let field = |value: i64, name: &str| {
        u64::try_from(value).map_err(|_| {
            LedgerError::Corrupt(format!("bucket {bucket} has negative {name} ({value})"))
        })
    };
    Ok(UsageRecord {
        cost_micros: field(raw[0], "cost_micros")?,
        premium_voice_characters: field(raw[1], "premium_voice_characters")?,
        standard_voice_characters: field(raw[2], "standard_voice_characters")?,
        model_input_units: field(raw[3], "model_input_units")?,
        model_output_units: field(raw[4], "model_output_units")?,
    })
}

fn sql_int(value: u64) -> Result<i64, LedgerError> {
    i64::try_from(value)
        .map_err(|_| LedgerError::Corrupt(format!("increment {value} exceeds storable range")))
}

fn fetch(conn: &Connection, bucket: &str) -> Result<Option<UsageRecord>, LedgerError> {
    let raw = conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM usage_ledger WHERE bucket = ?1"),
            [bucket],
            |row| read_columns(row, 0),
        )
        .optional()?;
    raw.map(|raw| decode_record(bucket, raw)).transpose()
}

fn upsert_all(
    conn: &Connection,
    buckets: &[String],
    delta: &CostDelta,
) -> Result<(), LedgerError> {
    let values = [
        sql_int(delta.cost_micros)?,
        sql_int(delta.usage.premium_voice_characters)?,
        sql_int(delta.usage.standard_voice_characters)?,
        sql_int(delta.usage.model_input_units)?,
        sql_int(delta.usage.model_output_units)?,
    ];
    let mut upsert = conn.prepare(UPSERT_INCREMENT)?;
    for bucket in buckets {
        upsert.execute(params![
            bucket, values[0], values[1], values[2], values[3], values[4]
        ])?;
    }
    Ok(())
}

fn commit_unless_cancelled(
    tx: Transaction<'_>,
    cancelled: &AtomicBool,
) -> Result<(), LedgerError> {
    if cancelled.load(Ordering::SeqCst) {
        return Err(LedgerError::Cancelled);
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl UsageLedgerStore for SqliteLedgerStore {
    async fn get(&self, key: BucketKey) -> Result<Option<UsageRecord>, LedgerError> {
        let bucket = key.as_key();
        let record = self.run(move |conn, _| fetch(conn, &bucket)).await?;

        match &record {
            Some(r) => debug!(bucket = %key, cost_micros = r.cost_micros, "fetched usage bucket"),
            None => debug!(bucket = %key, "usage bucket not found, returning zero usage"),
        }
        Ok(record)
    }

    async fn increment(&self, keys: &[BucketKey], delta: &CostDelta) -> Result<(), LedgerError> {
        let buckets: Vec<String> = keys.iter().map(BucketKey::as_key).collect();
        let delta = *delta;
        debug!(
            buckets = ?buckets,
            cost_micros = delta.cost_micros,
            premium_voice_characters = delta.usage.premium_voice_characters,
            standard_voice_characters = delta.usage.standard_voice_characters,
            model_input_units = delta.usage.model_input_units,
            model_output_units = delta.usage.model_output_units,
            "adding usage"
        );

        self.run(move |conn, cancelled| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            upsert_all(&tx, &buckets, &delta)?;
            commit_unless_cancelled(tx, cancelled)
        })
        .await
    }

    async fn record(
        &self,
        keys: &[BucketKey],
        batch: &UsageBatch,
        pricing: &PricingTable,
    ) -> Result<CostDelta, LedgerError> {
        let buckets: Vec<String> = keys.iter().map(BucketKey::as_key).collect();
        let (batch, pricing) = (*batch, *pricing);

        let delta = self
            .run(move |conn, cancelled| {
                // The IMMEDIATE lock is taken before the total is read, so the
                // pricing below always sees every previously committed batch.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let totals = fetch(&tx, &BucketKey::Total.as_key())?.unwrap_or_default();
                let delta = compute_delta(&pricing, &totals, &batch);
                upsert_all(&tx, &buckets, &delta)?;
                commit_unless_cancelled(tx, cancelled)?;
                Ok(delta)
            })
            .await?;

        debug!(
            buckets = ?keys,
            cost_micros = delta.cost_micros,
            "priced and recorded usage"
        );
        Ok(delta)
    }

    async fn list_daily(&self) -> Result<Vec<(NaiveDate, UsageRecord)>, LedgerError> {
        self.run(|conn, _| {
            let mut stmt = conn.prepare(&format!(
                "SELECT bucket, {SELECT_COLUMNS} FROM usage_ledger ORDER BY bucket DESC"
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, read_columns(row, 1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut days = Vec::with_capacity(rows.len());
            for (bucket, raw) in rows {
                if let Some(BucketKey::Daily(day)) = BucketKey::parse(&bucket) {
                    days.push((day, decode_record(&bucket, raw)?));
                }
            }
            Ok(days)
        })
        .await
    }
}
