#![forbid(unsafe_code)]

use adreport_contracts::alloc::{BidModel, BudgetSource, MAX_BUDGET};
use rand::Rng;

use crate::apportion::{apportion_by_last, ItemBound, RoundingUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowActivity {
    pub impressions: u64,
    pub clicks: u64,
    pub views: u64,
}

impl RowActivity {
    /// Billable volume under `model`: thousands of impressions, clicks or views.
    pub fn billable_volume(&self, model: BidModel) -> f64 {
        match model {
            BidModel::PerMille => self.impressions as f64 / 1000.0,
            BidModel::PerClick => self.clicks as f64,
            BidModel::PerView => self.views as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetError {
    /// No budget was requested and the organic cost is beyond `MAX_BUDGET`.
    OrganicCostOutOfRange { organic_total: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetOutcome {
    pub row_budget_minor: Vec<i64>,
    pub current_rates: Vec<f64>,
    pub target_minor: i64,
    pub source: BudgetSource,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetAllocator {
    rate_noise: f64,
}

impl BudgetAllocator {
    /// `rate_noise` of 0.02 draws each row's seed rate from `base_rate × [0.98, 1.02)`.
    pub fn new(rate_noise: f64) -> Self {
        Self {
            rate_noise: rate_noise.clamp(0.0, 0.5),
        }
    }

    pub fn allocate<R: Rng + ?Sized>(
        &self,
        rows: &[RowActivity],
        total_budget: f64,
        base_rate: f64,
        bid_model: BidModel,
        rng: &mut R,
    ) -> Result<BudgetOutcome, BudgetError> {
        let raw: Vec<f64> = rows
            .iter()
            .map(|row| {
                let noisy_rate =
                    base_rate * (1.0 - self.rate_noise + rng.gen::<f64>() * self.rate_noise * 2.0);
                row.billable_volume(bid_model) * noisy_rate
            })
            .collect();
        let raw_total: f64 = raw.iter().sum();

        let (source, target_minor, scale) = if total_budget > 0.0 {
            let scale = if raw_total > 0.0 {
                total_budget / raw_total
            } else {
                0.0
            };
            (
                BudgetSource::Requested,
                RoundingUnit::Cent.to_units(total_budget),
                scale,
            )
        } else {
            if !raw_total.is_finite() || raw_total > MAX_BUDGET {
                return Err(BudgetError::OrganicCostOutOfRange {
                    organic_total: raw_total,
                });
            }
            tracing::debug!(
                organic_total = raw_total,
                bid_model = bid_model.as_str(),
                "no budget requested; using organic cost as target"
            );
            (
                BudgetSource::Organic,
                RoundingUnit::Cent.to_units(raw_total),
                1.0,
            )
        };

        let quotas: Vec<f64> = raw.iter().map(|r| r * scale).collect();
        let split = apportion_by_last(
            target_minor,
            &quotas,
            RoundingUnit::Cent,
            ItemBound::non_negative(),
        );
        debug_assert_eq!(split.unresolved, 0);

        let current_rates = rows
            .iter()
            .zip(&split.parts)
            .map(|(row, minor)| effective_rate(row, *minor, base_rate, bid_model))
            .collect();

        Ok(BudgetOutcome {
            row_budget_minor: split.parts,
            current_rates,
            target_minor,
            source,
        })
    }
}

impl Default for BudgetAllocator {
    fn default() -> Self {
        Self::new(0.02)
    }
}

/// Rate implied by the row's final budget and its own volume, so displayed
/// rate × volume always reproduces the displayed budget. Rows with no billable
/// volume show `base_rate`.
pub fn effective_rate(row: &RowActivity, budget_minor: i64, base_rate: f64, model: BidModel) -> f64 {
    let budget = RoundingUnit::Cent.to_major(budget_minor);
    match model {
        BidModel::PerMille if row.impressions > 0 => budget / row.impressions as f64 * 1000.0,
        BidModel::PerClick if row.clicks > 0 => budget / row.clicks as f64,
        BidModel::PerView if row.views > 0 => budget / row.views as f64,
        _ => base_rate,
    }
}
