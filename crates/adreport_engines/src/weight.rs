#![forbid(unsafe_code)]

use adreport_contracts::app::{AppRecord, DEFAULT_PRIORITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierClass {
    Tier1,
    Tier2,
    Other,
}

impl TierClass {
    /// Containment match on the lower-cased label, so "Tier 1", "t1" and
    /// "premium-1" all land in `Tier1`. "1" is checked before "2".
    pub fn classify(label: &str) -> Self {
        let t = label.to_lowercase();
        if t.contains('1') {
            TierClass::Tier1
        } else if t.contains('2') {
            TierClass::Tier2
        } else {
            TierClass::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightModelConfig {
    pub auction_exponent: f64,
    pub auction_floor: f64,
    pub tier1_multiplier: f64,
    pub tier2_multiplier: f64,
    pub other_multiplier: f64,
}

impl WeightModelConfig {
    pub fn mvp_v1() -> Self {
        Self {
            auction_exponent: 0.7,
            auction_floor: 10.0,
            tier1_multiplier: 3.0,
            tier2_multiplier: 1.5,
            other_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeightModel {
    config: WeightModelConfig,
}

impl Default for WeightModel {
    fn default() -> Self {
        Self::new(WeightModelConfig::mvp_v1())
    }
}

impl WeightModel {
    pub fn new(config: WeightModelConfig) -> Self {
        Self { config }
    }

    pub fn weight(&self, auctions: f64, priority: f64, tier: &str) -> f64 {
        let auctions = if auctions.is_finite() {
            auctions.max(self.config.auction_floor)
        } else {
            self.config.auction_floor
        };
        let priority = if priority.is_finite() && priority > 0.0 {
            priority
        } else {
            DEFAULT_PRIORITY
        };
        auctions.powf(self.config.auction_exponent) * priority * self.tier_multiplier(tier)
    }

    pub fn weight_of(&self, app: &AppRecord) -> f64 {
        self.weight(app.auctions, app.priority, &app.tier)
    }

    fn tier_multiplier(&self, tier: &str) -> f64 {
        match TierClass::classify(tier) {
            TierClass::Tier1 => self.config.tier1_multiplier,
            TierClass::Tier2 => self.config.tier2_multiplier,
            TierClass::Other => self.config.other_multiplier,
        }
    }
}
