use crate::error::AppError;
use crate::models::VoiceTier;
use crate::pricing::PricingTable;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SERVICE_NAME: &str = "quota-meter";
pub const ENV_PREFIX: &str = "QUOTA_METER";

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("QUOTA_METER_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "quota-meter", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".quota-meter"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub daily_quota_micros: u64,
    pub pricing: PricingTable,
    pub speech: SpeechSettings,
    pub ledger: LedgerSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub voice_tier: VoiceTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub busy_timeout_ms: u64,
}

impl LedgerSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            daily_quota_micros: 5_000_000,
            pricing: PricingTable::default(),
            speech: SpeechSettings::default(),
            ledger: LedgerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn db_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("ledger.sqlite"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

fn validate_config(config: &AppConfig) -> Result<(), AppError> {
    if config.daily_quota_micros == 0 {
        return Err(AppError::Config(
            "daily_quota_micros must be greater than zero".into(),
        ));
    }
    if config.ledger.busy_timeout_ms == 0 {
        return Err(AppError::Config(
            "ledger.busy_timeout_ms must be greater than zero".into(),
        ));
    }
    if config.logging.level.trim().is_empty() {
        return Err(AppError::Config("logging.level must not be empty".into()));
    }
    Ok(())
}

/// Layers the TOML file at `path` (optional) under `QUOTA_METER_*` environment variables.
pub fn load_config_from(path: &Path) -> Result<AppConfig, AppError> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let parsed: AppConfig = settings.try_deserialize()?;
    validate_config(&parsed)?;
    Ok(parsed)
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from(&config_path()?)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !cfg_path.exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::PricingEntry;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().expect("tempdir");
        let cfg = load_config_from(&tmp.path().join("absent.toml")).expect("load defaults");
        assert_eq!(cfg.daily_quota_micros, 5_000_000);
        assert_eq!(cfg.speech.voice_tier, VoiceTier::Premium);
        assert_eq!(cfg.pricing, PricingTable::default());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            r#"
            daily_quota_micros = 2500000

            [pricing.model_input]
            unit_price_micros = 2

            [speech]
            voice_tier = "standard"
            "#,
        )
        .expect("write config");

        let cfg = load_config_from(&path).expect("load");
        assert_eq!(cfg.daily_quota_micros, 2_500_000);
        assert_eq!(cfg.pricing.model_input, PricingEntry::new(2, 0));
        assert_eq!(cfg.pricing.premium_voice, PricingEntry::new(30, 1_000_000));
        assert_eq!(cfg.speech.voice_tier, VoiceTier::Standard);
    }

    #[test]
    fn zero_quota_is_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(&path, "daily_quota_micros = 0\n").expect("write config");

        let err = load_config_from(&path).expect_err("zero quota");
        assert!(err.to_string().contains("daily_quota_micros"));
    }

    #[test]
    fn negative_price_is_rejected() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            "[pricing.model_output]\nunit_price_micros = -3\n",
        )
        .expect("write config");

        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn saved_defaults_round_trip_through_loader() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            toml::to_string_pretty(&AppConfig::default()).expect("serialize"),
        )
        .expect("write config");

        let cfg = load_config_from(&path).expect("load");
        assert_eq!(cfg.ledger.busy_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
    }
}
