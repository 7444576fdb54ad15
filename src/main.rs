use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quota_meter::config::{db_path, ensure_initialized, load_config, AppConfig};
use quota_meter::error::AppError;
use quota_meter::ledger::{today_utc, UsageLedger};
use quota_meter::logging::init_logging;
use quota_meter::models::{format_usd, UsageBatch, UsageRecord};
use quota_meter::quota::{Admission, QuotaGate};
use quota_meter::recorder::SpendingRecorder;
use quota_meter::storage::SqliteLedgerStore;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;

const OVER_QUOTA_EXIT: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "quota-meter")]
#[command(about = "Usage ledger and daily quota control for the sentence gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    Status {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Check {
        #[arg(long)]
        date: Option<String>,
    },
    Record {
        #[arg(long, default_value_t = 0)]
        premium_voice_chars: u64,
        #[arg(long, default_value_t = 0)]
        standard_voice_chars: u64,
        #[arg(long, default_value_t = 0)]
        input_units: u64,
        #[arg(long, default_value_t = 0)]
        output_units: u64,
    },
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[derive(Debug, Serialize)]
struct StatusReport {
    date: NaiveDate,
    daily: UsageRecord,
    total: UsageRecord,
    daily_quota_micros: u64,
    remaining_micros: u64,
    over_quota: bool,
}

#[derive(Debug, Serialize)]
struct DailyRow {
    date: NaiveDate,
    #[serde(flatten)]
    usage: UsageRecord,
}

fn parse_date(input: Option<&str>) -> Result<NaiveDate, AppError> {
    match input {
        None => Ok(today_utc()),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            AppError::Config(format!("Invalid date '{raw}'. Use YYYY-MM-DD."))
        }),
    }
}

fn open_ledger(cfg: &AppConfig) -> Result<UsageLedger, AppError> {
    let store = SqliteLedgerStore::open(&db_path()?, cfg.ledger.busy_timeout())?;
    Ok(UsageLedger::new(Arc::new(store)))
}

fn print_record(label: &str, record: &UsageRecord) {
    println!("{label}:");
    println!("  cost:                      {}", format_usd(record.cost_micros));
    println!("  premium voice characters:  {}", record.premium_voice_characters);
    println!("  standard voice characters: {}", record.standard_voice_characters);
    println!("  model input units:         {}", record.model_input_units);
    println!("  model output units:        {}", record.model_output_units);
}

#[tokio::main]
async fn main() -> Result<ExitCode, AppError> {
    let cli = Cli::parse();

    ensure_initialized()?;
    let cfg = load_config()?;
    init_logging(&cfg.logging);

    match cli.command {
        Commands::Init => {
            open_ledger(&cfg)?;
            println!("Initialized quota-meter config and ledger.");
        }
        Commands::Status { date, json } => {
            let day = parse_date(date.as_deref())?;
            let ledger = open_ledger(&cfg)?;
            let daily = ledger.read_daily(day).await?;
            let total = ledger.read_total().await?;
            let report = StatusReport {
                date: day,
                daily,
                total,
                daily_quota_micros: cfg.daily_quota_micros,
                remaining_micros: cfg.daily_quota_micros.saturating_sub(daily.cost_micros),
                over_quota: daily.cost_micros >= cfg.daily_quota_micros,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_record(&format!("Usage for {day}"), &report.daily);
                print_record("All-time usage", &report.total);
                println!(
                    "Daily quota: {} (remaining {}){}",
                    format_usd(report.daily_quota_micros),
                    format_usd(report.remaining_micros),
                    if report.over_quota { " EXCEEDED" } else { "" }
                );
            }
        }
        Commands::Check { date } => {
            let day = parse_date(date.as_deref())?;
            let gate = QuotaGate::new(open_ledger(&cfg)?, cfg.daily_quota_micros);
            match gate.check(day).await? {
                Admission::Admitted { spent_micros } => {
                    println!(
                        "admitted: {} of {} spent on {day}",
                        format_usd(spent_micros),
                        format_usd(gate.daily_quota_micros())
                    );
                }
                Admission::OverQuota {
                    spent_micros,
                    quota_micros,
                } => {
                    println!(
                        "quota exceeded: {} of {} spent on {day}",
                        format_usd(spent_micros),
                        format_usd(quota_micros)
                    );
                    return Ok(ExitCode::from(OVER_QUOTA_EXIT));
                }
            }
        }
        Commands::Record {
            premium_voice_chars,
            standard_voice_chars,
            input_units,
            output_units,
        } => {
            let batch = UsageBatch {
                premium_voice_characters: premium_voice_chars,
                standard_voice_characters: standard_voice_chars,
                model_input_units: input_units,
                model_output_units: output_units,
            };
            if batch.is_empty() {
                return Err(AppError::Config(
                    "Nothing to record. Pass at least one non-zero usage count.".into(),
                ));
            }
            let recorder = SpendingRecorder::new(open_ledger(&cfg)?, cfg.pricing);
            let day = today_utc();
            let delta = recorder.record(day, &batch).await?;
            println!("Recorded {} on {day}", format_usd(delta.cost_micros));
        }
        Commands::Export { format } => {
            let rows: Vec<DailyRow> = open_ledger(&cfg)?
                .daily_history()
                .await?
                .into_iter()
                .map(|(date, usage)| DailyRow { date, usage })
                .collect();

            if format.eq_ignore_ascii_case("json") {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if format.eq_ignore_ascii_case("csv") {
                println!(
                    "date,cost_micros,premium_voice_characters,standard_voice_characters,\
model_input_units,model_output_units"
                );
                for r in rows {
                    println!(
                        "{},{},{},{},{},{}",
                        r.date,
                        r.usage.cost_micros,
                        r.usage.premium_voice_characters,
                        r.usage.standard_voice_characters,
                        r.usage.model_input_units,
                        r.usage.model_output_units,
                    );
                }
            } else {
                return Err(AppError::Config(
                    "Unsupported export format. Use json or csv".into(),
                ));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
