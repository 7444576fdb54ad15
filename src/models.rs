use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MICROS_PER_USD: u64 = 1_000_000;

const TOTAL_BUCKET: &str = "total";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// Cumulative usage for one ledger bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub cost_micros: u64,
    pub premium_voice_characters: u64,
    pub standard_voice_characters: u64,
    pub model_input_units: u64,
    pub model_output_units: u64,
}

impl UsageRecord {
    pub fn count(&self, dimension: UsageDimension) -> u64 {
        match dimension {
            UsageDimension::PremiumVoice => self.premium_voice_characters,
            UsageDimension::StandardVoice => self.standard_voice_characters,
            UsageDimension::ModelInput => self.model_input_units,
            UsageDimension::ModelOutput => self.model_output_units,
        }
    }

    pub fn apply(&mut self, delta: &CostDelta) {
        self.cost_micros = self.cost_micros.saturating_add(delta.cost_micros);
        for dimension in UsageDimension::ALL {
            let added = delta.usage.count(dimension);
            let slot = match dimension {
                UsageDimension::PremiumVoice => &mut self.premium_voice_characters,
                UsageDimension::StandardVoice => &mut self.standard_voice_characters,
                UsageDimension::ModelInput => &mut self.model_input_units,
                UsageDimension::ModelOutput => &mut self.model_output_units,
            };
            *slot = slot.saturating_add(added);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageDimension {
    PremiumVoice,
    StandardVoice,
    ModelInput,
    ModelOutput,
}

impl UsageDimension {
    pub const ALL: [UsageDimension; 4] = [
        UsageDimension::PremiumVoice,
        UsageDimension::StandardVoice,
        UsageDimension::ModelInput,
        UsageDimension::ModelOutput,
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceTier {
    #[default]
    Premium,
    Standard,
}

/// Raw counts produced by one completed billable sub-operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageBatch {
    pub premium_voice_characters: u64,
    pub standard_voice_characters: u64,
    pub model_input_units: u64,
    pub model_output_units: u64,
}

impl UsageBatch {
    pub fn speech(tier: VoiceTier, characters: u64) -> Self {
        match tier {
            VoiceTier::Premium => Self {
                premium_voice_characters: characters,
                ..Self::default()
            },
            VoiceTier::Standard => Self {
                standard_voice_characters: characters,
                ..Self::default()
            },
        }
    }

    pub fn model(input_units: u64, output_units: u64) -> Self {
        Self {
            model_input_units: input_units,
            model_output_units: output_units,
            ..Self::default()
        }
    }

    pub fn count(&self, dimension: UsageDimension) -> u64 {
        match dimension {
            UsageDimension::PremiumVoice => self.premium_voice_characters,
            UsageDimension::StandardVoice => self.standard_voice_characters,
            UsageDimension::ModelInput => self.model_input_units,
            UsageDimension::ModelOutput => self.model_output_units,
        }
    }

    pub fn is_empty(&self) -> bool {
        UsageDimension::ALL.iter().all(|d| self.count(*d) == 0)
    }
}

/// Increment applied to ledger buckets: incremental cost plus the counters it was derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostDelta {
    pub cost_micros: u64,
    pub usage: UsageBatch,
}

impl CostDelta {
    pub fn merge(&self, other: &CostDelta) -> CostDelta {
        let mut sum = UsageRecord::default();
        sum.apply(self);
        sum.apply(other);
        CostDelta {
            cost_micros: sum.cost_micros,
            usage: UsageBatch {
                premium_voice_characters: sum.premium_voice_characters,
                standard_voice_characters: sum.standard_voice_characters,
                model_input_units: sum.model_input_units,
                model_output_units: sum.model_output_units,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cost_micros == 0 && self.usage.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Daily(NaiveDate),
    Total,
}

impl BucketKey {
    pub fn as_key(&self) -> String {
        match self {
            BucketKey::Daily(day) => day.format(DAY_FORMAT).to_string(),
            BucketKey::Total => TOTAL_BUCKET.to_string(),
        }
    }

    pub fn parse(raw: &str) -> Option<BucketKey> {
        if raw == TOTAL_BUCKET {
            return Some(BucketKey::Total);
        }
        NaiveDate::parse_from_str(raw, DAY_FORMAT)
            .ok()
            .map(BucketKey::Daily)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

pub fn format_usd(micros: u64) -> String {
    format!(
        "${}.{:06}",
        micros / MICROS_PER_USD,
        micros % MICROS_PER_USD
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_batch_fills_only_its_tier() {
        let premium = UsageBatch::speech(VoiceTier::Premium, 320);
        assert_eq!(premium.premium_voice_characters, 320);
        assert_eq!(premium.standard_voice_characters, 0);

        let standard = UsageBatch::speech(VoiceTier::Standard, 12);
        assert_eq!(standard.standard_voice_characters, 12);
        assert_eq!(standard.premium_voice_characters, 0);
    }

    #[test]
    fn bucket_keys_use_iso_dates_and_total() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date");
        assert_eq!(BucketKey::Daily(day).as_key(), "2024-03-09");
        assert_eq!(BucketKey::Total.as_key(), "total");
        assert_eq!(BucketKey::parse("2024-03-09"), Some(BucketKey::Daily(day)));
        assert_eq!(BucketKey::parse("total"), Some(BucketKey::Total));
        assert_eq!(BucketKey::parse("yesterday"), None);
    }

    #[test]
    fn merge_adds_every_field() {
        let a = CostDelta {
            cost_micros: 5,
            usage: UsageBatch::model(10, 2),
        };
        let b = CostDelta {
            cost_micros: 7,
            usage: UsageBatch::speech(VoiceTier::Standard, 3),
        };
        let sum = a.merge(&b);
        assert_eq!(sum.cost_micros, 12);
        assert_eq!(sum.usage.model_input_units, 10);
        assert_eq!(sum.usage.model_output_units, 2);
        assert_eq!(sum.usage.standard_voice_characters, 3);
    }

    #[test]
    fn format_usd_keeps_micro_precision() {
        assert_eq!(format_usd(0), "$0.000000");
        assert_eq!(format_usd(5_000_000), "$5.000000");
        assert_eq!(format_usd(1_234_567), "$1.234567");
    }
}
