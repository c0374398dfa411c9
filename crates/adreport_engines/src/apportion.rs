#![forbid(unsafe_code)]

//! Exact-sum apportionment shared by the impression, rate and budget engines.
//!
//! Every item except the last is rounded independently to the rounding unit;
//! the last item takes whatever is left of the target, so rounding error never
//! accumulates into the total. When bounds stop the last item from absorbing
//! the residual, the remainder is swept back over the earlier items.

use adreport_contracts::alloc::MINOR_UNITS_PER_MAJOR;
use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingUnit {
    /// Whole countable units (impressions, clicks, views).
    Whole,
    /// Minor currency units, 1/100 of the major unit.
    Cent,
}

impl RoundingUnit {
    pub fn per_major(self) -> f64 {
        match self {
            RoundingUnit::Whole => 1.0,
            RoundingUnit::Cent => MINOR_UNITS_PER_MAJOR as f64,
        }
    }

    pub fn to_units(self, amount: f64) -> i64 {
        if !amount.is_finite() {
            return 0;
        }
        (amount * self.per_major()).round() as i64
    }

    pub fn to_major(self, units: i64) -> f64 {
        units as f64 / self.per_major()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemBound {
    pub min: i64,
    pub max: i64,
}

impl ItemBound {
    pub fn non_negative() -> Self {
        Self {
            min: 0,
            max: i64::MAX,
        }
    }

    fn clamp(self, v: i64) -> i64 {
        v.clamp(self.min, self.max)
    }

    fn clamp_wide(self, v: i128) -> i64 {
        v.clamp(i128::from(self.min), i128::from(self.max)) as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apportionment {
    pub parts: Vec<i64>,
    /// Units of the target that could not be placed within the bounds.
    pub unresolved: i64,
}

/// Splits `target_units` over `quotas` (expressed in major units) so that the
/// parts sum to the target whenever the bounds allow it.
pub fn apportion_by_last(
    target_units: i64,
    quotas: &[f64],
    unit: RoundingUnit,
    bound: ItemBound,
) -> Apportionment {
    let Some(last) = quotas.len().checked_sub(1) else {
        return Apportionment {
            parts: Vec::new(),
            unresolved: target_units,
        };
    };

    let mut parts = Vec::with_capacity(quotas.len());
    let mut running: i128 = 0;
    for quota in &quotas[..last] {
        let part = bound.clamp(unit.to_units(*quota));
        running += i128::from(part);
        parts.push(part);
    }

    let residual = i128::from(target_units) - running;
    let tail = bound.clamp_wide(residual);
    parts.push(tail);

    let mut unresolved = residual - i128::from(tail);
    if unresolved != 0 {
        unresolved = settle_residual(&mut parts[..last], unresolved, bound);
    }
    Apportionment {
        parts,
        unresolved: saturate_i64(unresolved),
    }
}

fn settle_residual(parts: &mut [i64], mut residual: i128, bound: ItemBound) -> i128 {
    for part in parts.iter_mut().rev() {
        if residual == 0 {
            break;
        }
        if residual < 0 {
            let take = (i128::from(*part) - i128::from(bound.min)).min(-residual);
            *part = saturate_i64(i128::from(*part) - take);
            residual += take;
        } else {
            let give = (i128::from(bound.max) - i128::from(*part)).min(residual);
            *part = saturate_i64(i128::from(*part) + give);
            residual -= give;
        }
    }
    residual
}

fn saturate_i64(v: i128) -> i64 {
    v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceOutcome {
    pub passes: u32,
    /// `target - Σ values` when the loop stopped; 0 on convergence.
    pub residual: i64,
}

/// Moves single units between items in random order until `Σ values ==
/// target`. Items never leave `floors[i]..=caps[i]` once inside it; a pass
/// that changes nothing ends the loop with the residual reported.
pub fn balance_to_target<R: Rng + ?Sized>(
    values: &mut [u64],
    caps: &[u64],
    floors: &[u64],
    target: u64,
    rng: &mut R,
) -> BalanceOutcome {
    debug_assert_eq!(values.len(), caps.len());
    debug_assert_eq!(values.len(), floors.len());

    let current: u64 = values.iter().sum();
    let mut diff = target as i128 - current as i128;
    let mut order: Vec<usize> = (0..values.len()).collect();
    let mut passes: u32 = 0;

    while diff != 0 {
        order.shuffle(rng);
        passes = passes.saturating_add(1);
        let mut changed = false;
        for &i in &order {
            if diff > 0 && values[i] < caps[i] {
                values[i] += 1;
                diff -= 1;
                changed = true;
            } else if diff < 0 && values[i] > floors[i] {
                values[i] -= 1;
                diff += 1;
                changed = true;
            }
            if diff == 0 {
                break;
            }
        }
        if !changed {
            break;
        }
    }

    BalanceOutcome {
        passes,
        residual: saturate_i64(diff),
    }
}
