#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, Validate};

/// Auction volume assumed for catalog rows whose auctions column is empty or unparsable.
pub const CATALOG_DEFAULT_AUCTIONS: f64 = 1000.0;
/// Auction volume given to entries that did not match any catalog row.
pub const UNMATCHED_DEFAULT_AUCTIONS: f64 = 500.0;
pub const DEFAULT_PRIORITY: f64 = 1.0;
pub const DEFAULT_TIER: &str = "Tier 3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "iOS")]
    Ios,
    #[serde(rename = "Android")]
    Android,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Ios => "iOS",
            Platform::Android => "Android",
        }
    }

    /// Classifies the free-form OS column of the catalog. Anything not
    /// recognisably Apple is treated as Android.
    pub fn from_os_label(raw: &str) -> Self {
        let upper = raw.to_ascii_uppercase();
        if upper.contains("IPHONE") || upper.contains("IOS") || upper.contains("IPAD") {
            Platform::Ios
        } else {
            Platform::Android
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFilter {
    #[default]
    All,
    Ios,
    Android,
}

impl PlatformFilter {
    pub fn admits(self, platform: Platform) -> bool {
        match self {
            PlatformFilter::All => true,
            PlatformFilter::Ios => platform == Platform::Ios,
            PlatformFilter::Android => platform == Platform::Android,
        }
    }
}

/// One application row, either straight from the catalog or produced by
/// enrichment of an uploaded entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    pub name: String,
    pub display_name: String,
    pub bundle: String,
    pub platform: Platform,
    pub link: String,
    pub category: String,
    pub auctions: f64,
    pub priority: f64,
    pub tier: String,
}

impl AppRecord {
    /// Record for an uploaded entry with no catalog match.
    pub fn unmatched(
        name: String,
        bundle: String,
        platform: Platform,
        link: String,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            display_name: name.clone(),
            name,
            bundle,
            platform,
            link,
            category: String::new(),
            auctions: UNMATCHED_DEFAULT_AUCTIONS,
            priority: DEFAULT_PRIORITY,
            tier: DEFAULT_TIER.to_string(),
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for AppRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("app_record.name", &self.name, 256)?;
        validate_text("app_record.display_name", &self.display_name, 256)?;
        validate_text("app_record.bundle", &self.bundle, 256)?;
        if self.link.len() > 2048 {
            return Err(ContractViolation::InvalidValue {
                field: "app_record.link",
                reason: "exceeds max length",
            });
        }
        // Signed values are kept as the sheet had them; the weight model floors them.
        if !self.auctions.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "app_record.auctions",
            });
        }
        if !self.priority.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "app_record.priority",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_app_01_os_label_classification_is_loose() {
        assert_eq!(Platform::from_os_label("iPhone"), Platform::Ios);
        assert_eq!(Platform::from_os_label("ipad / iphone"), Platform::Ios);
        assert_eq!(Platform::from_os_label("iOS 15+"), Platform::Ios);
        assert_eq!(Platform::from_os_label("android"), Platform::Android);
        assert_eq!(Platform::from_os_label(""), Platform::Android);
    }

    #[test]
    fn at_app_02_unmatched_record_carries_boundary_defaults() {
        let r = AppRecord::unmatched(
            "App 3".to_string(),
            "unknown.2".to_string(),
            Platform::Android,
            "#".to_string(),
        )
        .unwrap();
        assert_eq!(r.auctions, 500.0);
        assert_eq!(r.priority, 1.0);
        assert_eq!(r.tier, "Tier 3");
        assert_eq!(r.display_name, "App 3");
    }

    #[test]
    fn at_app_03_platform_filter_admits_matching_platform_only() {
        assert!(PlatformFilter::All.admits(Platform::Ios));
        assert!(PlatformFilter::Ios.admits(Platform::Ios));
        assert!(!PlatformFilter::Ios.admits(Platform::Android));
        assert!(!PlatformFilter::Android.admits(Platform::Ios));
    }

    #[test]
    fn at_app_04_record_rejects_non_finite_auctions_but_keeps_sign() {
        let mut r = AppRecord::unmatched(
            "x".to_string(),
            "unknown.0".to_string(),
            Platform::Ios,
            "".to_string(),
        )
        .unwrap();
        r.auctions = -1.0;
        assert!(r.validate().is_ok());
        r.auctions = f64::NAN;
        assert_eq!(
            r.validate(),
            Err(ContractViolation::NotFinite {
                field: "app_record.auctions"
            })
        );
    }
}
