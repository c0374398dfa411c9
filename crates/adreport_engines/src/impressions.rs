#![forbid(unsafe_code)]

use rand::Rng;

use crate::apportion::{apportion_by_last, ItemBound, RoundingUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpressionError {
    /// Every randomized weight is zero; there is nothing to split by.
    DegenerateWeights,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpressionApportioner {
    jitter_width: f64,
}

impl ImpressionApportioner {
    /// `jitter_width` of 0.2 scales each weight by a factor drawn from [0.9, 1.1).
    pub fn new(jitter_width: f64) -> Self {
        Self {
            jitter_width: jitter_width.clamp(0.0, 2.0),
        }
    }

    pub fn apportion<R: Rng + ?Sized>(
        &self,
        base_weights: &[f64],
        total_impressions: u64,
        rng: &mut R,
    ) -> Result<Vec<u64>, ImpressionError> {
        if base_weights.is_empty() || total_impressions == 0 {
            return Ok(vec![0; base_weights.len()]);
        }

        let low = 1.0 - self.jitter_width / 2.0;
        let randomized: Vec<f64> = base_weights
            .iter()
            .map(|w| {
                let w = if w.is_finite() { w.max(0.0) } else { 0.0 };
                w * (low + rng.gen::<f64>() * self.jitter_width)
            })
            .collect();
        let weight_sum: f64 = randomized.iter().sum();
        if weight_sum <= 0.0 || !weight_sum.is_finite() {
            return Err(ImpressionError::DegenerateWeights);
        }

        let total = total_impressions as f64;
        let quotas: Vec<f64> = randomized
            .iter()
            .map(|w| w / weight_sum * total)
            .collect();
        let out = apportion_by_last(
            total_impressions as i64,
            &quotas,
            RoundingUnit::Whole,
            ItemBound::non_negative(),
        );
        debug_assert_eq!(out.unresolved, 0);
        Ok(out.parts.into_iter().map(|p| p.max(0) as u64).collect())
    }
}

impl Default for ImpressionApportioner {
    fn default() -> Self {
        Self::new(0.2)
    }
}
