#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::app::Platform;
use crate::common::{validate_non_negative, validate_text};
use crate::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};

pub const ALLOC_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const MAX_ALLOCATION_ENTITIES: usize = 100_000;
/// Keeps every budget expressible in i64 minor units with headroom for scaling.
pub const MAX_BUDGET: f64 = 1.0e13;
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BidModel {
    #[serde(rename = "CPM")]
    PerMille,
    #[serde(rename = "CPC")]
    PerClick,
    #[serde(rename = "CPV")]
    PerView,
}

impl BidModel {
    pub fn as_str(self) -> &'static str {
        match self {
            BidModel::PerMille => "CPM",
            BidModel::PerClick => "CPC",
            BidModel::PerView => "CPV",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetSource {
    Requested,
    /// No budget was requested; the summed organic cost became the target.
    Organic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationTotals {
    pub schema_version: SchemaVersion,
    pub impressions: u64,
    pub clicks: u64,
    pub views: u64,
    pub budget: f64,
    pub base_rate: f64,
    pub bid_model: BidModel,
}

impl AllocationTotals {
    pub fn v1(
        impressions: u64,
        clicks: u64,
        views: u64,
        budget: f64,
        base_rate: f64,
        bid_model: BidModel,
    ) -> Result<Self, ContractViolation> {
        let t = Self {
            schema_version: ALLOC_CONTRACT_VERSION,
            impressions,
            clicks,
            views,
            budget,
            base_rate,
            bid_model,
        };
        t.validate()?;
        Ok(t)
    }
}

impl Validate for AllocationTotals {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ALLOC_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_totals.schema_version",
                reason: "must match ALLOC_CONTRACT_VERSION",
            });
        }
        if self.impressions == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_totals.impressions",
                reason: "must be > 0",
            });
        }
        if self.impressions > i64::MAX as u64 {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_totals.impressions",
                reason: "must fit in i64",
            });
        }
        validate_non_negative("allocation_totals.budget", self.budget)?;
        if self.budget > MAX_BUDGET {
            return Err(ContractViolation::InvalidRange {
                field: "allocation_totals.budget",
                min: 0.0,
                max: MAX_BUDGET,
                got: self.budget,
            });
        }
        validate_non_negative("allocation_totals.base_rate", self.base_rate)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntity {
    pub name: String,
    pub bundle: String,
    pub platform: Platform,
    pub link: String,
    pub base_weight: f64,
}

impl AllocationEntity {
    pub fn v1(
        name: String,
        bundle: String,
        platform: Platform,
        link: String,
        base_weight: f64,
    ) -> Result<Self, ContractViolation> {
        let e = Self {
            name,
            bundle,
            platform,
            link,
            base_weight,
        };
        e.validate()?;
        Ok(e)
    }
}

impl Validate for AllocationEntity {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("allocation_entity.name", &self.name, 256)?;
        validate_text("allocation_entity.bundle", &self.bundle, 256)?;
        validate_non_negative("allocation_entity.base_weight", self.base_weight)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub schema_version: SchemaVersion,
    pub totals: AllocationTotals,
    pub entities: Vec<AllocationEntity>,
}

impl AllocationRequest {
    pub fn v1(
        totals: AllocationTotals,
        entities: Vec<AllocationEntity>,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: ALLOC_CONTRACT_VERSION,
            totals,
            entities,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for AllocationRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ALLOC_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_request.schema_version",
                reason: "must match ALLOC_CONTRACT_VERSION",
            });
        }
        self.totals.validate()?;
        if self.entities.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_request.entities",
                reason: "must not be empty",
            });
        }
        if self.entities.len() > MAX_ALLOCATION_ENTITIES {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_request.entities",
                reason: "exceeds MAX_ALLOCATION_ENTITIES",
            });
        }
        for e in &self.entities {
            e.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub name: String,
    pub bundle: String,
    pub platform: Platform,
    pub link: String,
    pub impressions: u64,
    pub clicks: u64,
    pub views: u64,
    pub ctr_pct: String,
    pub vtr_pct: String,
    pub current_rate: f64,
    pub row_budget_minor: i64,
}

impl AllocationRow {
    pub fn v1(
        entity: &AllocationEntity,
        impressions: u64,
        clicks: u64,
        views: u64,
        current_rate: f64,
        row_budget_minor: i64,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            name: entity.name.clone(),
            bundle: entity.bundle.clone(),
            platform: entity.platform,
            link: entity.link.clone(),
            impressions,
            clicks,
            views,
            ctr_pct: percent_text(clicks, impressions),
            vtr_pct: percent_text(views, impressions),
            current_rate,
            row_budget_minor,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for AllocationRow {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("allocation_row.name", &self.name, 256)?;
        if self.clicks > self.impressions {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_row.clicks",
                reason: "must be <= impressions",
            });
        }
        if self.views > self.impressions {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_row.views",
                reason: "must be <= impressions",
            });
        }
        validate_non_negative("allocation_row.current_rate", self.current_rate)?;
        if self.row_budget_minor < 0 {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_row.row_budget_minor",
                reason: "must be >= 0",
            });
        }
        Ok(())
    }
}

/// `part / whole * 100` as two-decimal text; "0.00" for an empty denominator.
pub fn percent_text(part: u64, whole: u64) -> String {
    if whole == 0 {
        return "0.00".to_string();
    }
    format!("{:.2}", part as f64 / whole as f64 * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationOk {
    pub schema_version: SchemaVersion,
    pub reason_code: ReasonCodeId,
    pub rows: Vec<AllocationRow>,
    pub total_impressions: u64,
    pub effective_budget_minor: i64,
    pub budget_source: BudgetSource,
    /// Units of the click target the balancing pass could not place.
    pub clicks_residual: i64,
    pub views_residual: i64,
}

impl AllocationOk {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        reason_code: ReasonCodeId,
        rows: Vec<AllocationRow>,
        total_impressions: u64,
        effective_budget_minor: i64,
        budget_source: BudgetSource,
        clicks_residual: i64,
        views_residual: i64,
    ) -> Result<Self, ContractViolation> {
        let o = Self {
            schema_version: ALLOC_CONTRACT_VERSION,
            reason_code,
            rows,
            total_impressions,
            effective_budget_minor,
            budget_source,
            clicks_residual,
            views_residual,
        };
        o.validate()?;
        Ok(o)
    }

    pub fn is_exact(&self) -> bool {
        self.clicks_residual == 0 && self.views_residual == 0
    }
}

impl Validate for AllocationOk {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ALLOC_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_ok.schema_version",
                reason: "must match ALLOC_CONTRACT_VERSION",
            });
        }
        if self.rows.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_ok.rows",
                reason: "must not be empty",
            });
        }
        for row in &self.rows {
            row.validate()?;
        }
        let impressions: u128 = self.rows.iter().map(|r| u128::from(r.impressions)).sum();
        if impressions != u128::from(self.total_impressions) {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_ok.rows",
                reason: "impressions must sum to total_impressions",
            });
        }
        let budget: i128 = self.rows.iter().map(|r| i128::from(r.row_budget_minor)).sum();
        if budget != i128::from(self.effective_budget_minor) {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_ok.rows",
                reason: "row budgets must sum to effective_budget_minor",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRefuse {
    pub schema_version: SchemaVersion,
    pub reason_code: ReasonCodeId,
    pub message: String,
}

impl AllocationRefuse {
    pub fn v1(reason_code: ReasonCodeId, message: String) -> Result<Self, ContractViolation> {
        let r = Self {
            schema_version: ALLOC_CONTRACT_VERSION,
            reason_code,
            message,
        };
        r.validate()?;
        Ok(r)
    }
}

impl Validate for AllocationRefuse {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != ALLOC_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "allocation_refuse.schema_version",
                reason: "must match ALLOC_CONTRACT_VERSION",
            });
        }
        validate_text("allocation_refuse.message", &self.message, 256)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AllocationResponse {
    Ok(AllocationOk),
    Refuse(AllocationRefuse),
}

impl Validate for AllocationResponse {
    fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            AllocationResponse::Ok(o) => o.validate(),
            AllocationResponse::Refuse(r) => r.validate(),
        }
    }
}
