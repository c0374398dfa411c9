#![forbid(unsafe_code)]

use adreport_contracts::alloc::{
    AllocationOk, AllocationRefuse, AllocationRequest, AllocationResponse, AllocationRow,
    MAX_ALLOCATION_ENTITIES,
};
use adreport_contracts::{ContractViolation, ReasonCodeId, Validate};
use rand::Rng;

use crate::budget::{BudgetAllocator, BudgetError, RowActivity};
use crate::impressions::{ImpressionApportioner, ImpressionError};
use crate::rate::{MetricKind, RateBoundedApportioner};

pub mod reason_codes {
    use adreport_contracts::ReasonCodeId;

    // ALLOC reason-code namespace ("AL").
    pub const ALLOC_OK: ReasonCodeId = ReasonCodeId(0x414C_0001);
    pub const ALLOC_OK_WITH_RESIDUAL: ReasonCodeId = ReasonCodeId(0x414C_0002);

    pub const ALLOC_INPUT_SCHEMA_INVALID: ReasonCodeId = ReasonCodeId(0x414C_00F1);
    pub const ALLOC_EMPTY_POOL: ReasonCodeId = ReasonCodeId(0x414C_00F2);
    pub const ALLOC_DEGENERATE_WEIGHTS: ReasonCodeId = ReasonCodeId(0x414C_00F3);
    pub const ALLOC_POOL_TOO_LARGE: ReasonCodeId = ReasonCodeId(0x414C_00F4);
    pub const ALLOC_INTERNAL_PIPELINE_ERROR: ReasonCodeId = ReasonCodeId(0x414C_00F5);
    pub const ALLOC_BUDGET_OUT_OF_RANGE: ReasonCodeId = ReasonCodeId(0x414C_00F6);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationConfig {
    pub impression_jitter_width: f64,
    pub click_noise_spread: f64,
    pub view_noise_spread: f64,
    pub view_cap_ratio: f64,
    pub view_saturation_rate: f64,
    pub rate_noise: f64,
    pub max_entities: usize,
}

impl AllocationConfig {
    pub fn mvp_v1() -> Self {
        Self {
            impression_jitter_width: 0.2,
            click_noise_spread: 0.35,
            view_noise_spread: 0.12,
            view_cap_ratio: 0.98,
            view_saturation_rate: 0.95,
            rate_noise: 0.02,
            max_entities: MAX_ALLOCATION_ENTITIES,
        }
    }
}

/// Runs impressions → clicks → views → budget over one request. The random
/// source is supplied per call; seed it for reproducible output.
#[derive(Debug, Clone)]
pub struct AllocationRuntime {
    config: AllocationConfig,
    impressions: ImpressionApportioner,
    clicks: RateBoundedApportioner,
    views: RateBoundedApportioner,
    budget: BudgetAllocator,
}

impl AllocationRuntime {
    pub fn new(config: AllocationConfig) -> Self {
        Self {
            config,
            impressions: ImpressionApportioner::new(config.impression_jitter_width),
            clicks: RateBoundedApportioner::new(MetricKind::Clicks, config.click_noise_spread),
            views: RateBoundedApportioner::new(MetricKind::Views, config.view_noise_spread)
                .with_view_cap(config.view_cap_ratio, config.view_saturation_rate),
            budget: BudgetAllocator::new(config.rate_noise),
        }
    }

    pub fn run<R: Rng + ?Sized>(&self, req: &AllocationRequest, rng: &mut R) -> AllocationResponse {
        if req.entities.is_empty() {
            return self.refuse(
                reason_codes::ALLOC_EMPTY_POOL,
                "no entities left to allocate across",
            );
        }
        if req.validate().is_err() {
            return self.refuse(
                reason_codes::ALLOC_INPUT_SCHEMA_INVALID,
                "allocation request failed contract validation",
            );
        }
        if req.entities.len() > self.config.max_entities {
            return self.refuse(
                reason_codes::ALLOC_POOL_TOO_LARGE,
                "entity pool exceeds runtime budget",
            );
        }

        match self.allocate(req, rng) {
            Ok(resp) => resp,
            Err(_) => self.refuse(
                reason_codes::ALLOC_INTERNAL_PIPELINE_ERROR,
                "failed to construct allocation output",
            ),
        }
    }

    fn allocate<R: Rng + ?Sized>(
        &self,
        req: &AllocationRequest,
        rng: &mut R,
    ) -> Result<AllocationResponse, ContractViolation> {
        let totals = &req.totals;
        let weights: Vec<f64> = req.entities.iter().map(|e| e.base_weight).collect();

        let impressions = match self
            .impressions
            .apportion(&weights, totals.impressions, rng)
        {
            Ok(v) => v,
            Err(ImpressionError::DegenerateWeights) => {
                return Ok(self.refuse(
                    reason_codes::ALLOC_DEGENERATE_WEIGHTS,
                    "all entity weights are zero; no allocation possible",
                ))
            }
        };

        let clicks = self
            .clicks
            .apportion(&impressions, totals.impressions, totals.clicks, rng);
        let views = self
            .views
            .apportion(&impressions, totals.impressions, totals.views, rng);

        let activity: Vec<RowActivity> = impressions
            .iter()
            .zip(&clicks.values)
            .zip(&views.values)
            .map(|((i, c), v)| RowActivity {
                impressions: *i,
                clicks: *c,
                views: *v,
            })
            .collect();
        let budget = match self.budget.allocate(
            &activity,
            totals.budget,
            totals.base_rate,
            totals.bid_model,
            rng,
        ) {
            Ok(b) => b,
            Err(BudgetError::OrganicCostOutOfRange { organic_total }) => {
                tracing::debug!(organic_total, "organic cost exceeds MAX_BUDGET");
                return Ok(self.refuse(
                    reason_codes::ALLOC_BUDGET_OUT_OF_RANGE,
                    "organic cost exceeds the maximum budget; request an explicit budget",
                ));
            }
        };

        let rows = req
            .entities
            .iter()
            .zip(&activity)
            .zip(budget.row_budget_minor.iter().zip(&budget.current_rates))
            .map(|((entity, act), (minor, rate))| {
                AllocationRow::v1(entity, act.impressions, act.clicks, act.views, *rate, *minor)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let reason_code = if clicks.residual == 0 && views.residual == 0 {
            reason_codes::ALLOC_OK
        } else {
            reason_codes::ALLOC_OK_WITH_RESIDUAL
        };

        let ok = AllocationOk::v1(
            reason_code,
            rows,
            totals.impressions,
            budget.target_minor,
            budget.source,
            clicks.residual,
            views.residual,
        )?;
        Ok(AllocationResponse::Ok(ok))
    }

    fn refuse(&self, reason_code: ReasonCodeId, message: &'static str) -> AllocationResponse {
        let r = AllocationRefuse::v1(reason_code, message.to_string())
            .expect("AllocationRefuse::v1 must construct for static message");
        AllocationResponse::Refuse(r)
    }
}

impl Default for AllocationRuntime {
    fn default() -> Self {
        Self::new(AllocationConfig::mvp_v1())
    }
}
