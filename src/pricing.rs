use crate::models::UsageDimension;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub unit_price_micros: u64,
    /// Cumulative all-time units that are not charged. Zero charges from the first unit.
    #[serde(default)]
    pub free_tier_threshold: u64,
}

impl PricingEntry {
    pub const fn new(unit_price_micros: u64, free_tier_threshold: u64) -> Self {
        Self {
            unit_price_micros,
            free_tier_threshold,
        }
    }
}

/// Unit prices per usage dimension, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingTable {
    pub premium_voice: PricingEntry,
    pub standard_voice: PricingEntry,
    pub model_input: PricingEntry,
    pub model_output: PricingEntry,
}

impl PricingTable {
    pub fn entry(&self, dimension: UsageDimension) -> PricingEntry {
        match dimension {
            UsageDimension::PremiumVoice => self.premium_voice,
            UsageDimension::StandardVoice => self.standard_voice,
            UsageDimension::ModelInput => self.model_input,
            UsageDimension::ModelOutput => self.model_output,
        }
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        built_in_pricing()
    }
}

pub fn built_in_pricing() -> PricingTable {
    PricingTable {
        premium_voice: PricingEntry::new(30, 1_000_000),
        standard_voice: PricingEntry::new(4, 4_000_000),
        model_input: PricingEntry::new(1, 0),
        model_output: PricingEntry::new(4, 0),
    }
}
