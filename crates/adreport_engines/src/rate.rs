#![forbid(unsafe_code)]

use rand::Rng;

use crate::apportion::balance_to_target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Clicks,
    Views,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Clicks => "clicks",
            MetricKind::Views => "views",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateOutcome {
    pub values: Vec<u64>,
    pub residual: i64,
    pub passes: u32,
}

/// Splits a count metric in proportion to each row's impressions, under a
/// per-row cap, then balances single units until the target is hit exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBoundedApportioner {
    kind: MetricKind,
    noise_spread: f64,
    view_cap_ratio: f64,
    view_saturation_rate: f64,
}

impl RateBoundedApportioner {
    pub fn new(kind: MetricKind, noise_spread: f64) -> Self {
        Self {
            kind,
            noise_spread: noise_spread.clamp(0.0, 1.0),
            view_cap_ratio: 0.98,
            view_saturation_rate: 0.95,
        }
    }

    pub fn with_view_cap(mut self, cap_ratio: f64, saturation_rate: f64) -> Self {
        self.view_cap_ratio = cap_ratio.clamp(0.0, 1.0);
        self.view_saturation_rate = saturation_rate;
        self
    }

    /// Upper bound for a row with `impressions` when the requested average rate is `avg_rate`.
    pub fn cap(&self, impressions: u64, avg_rate: f64) -> u64 {
        match self.kind {
            MetricKind::Views if avg_rate < self.view_saturation_rate => {
                (impressions as f64 * self.view_cap_ratio).floor() as u64
            }
            _ => impressions,
        }
    }

    fn floor(&self, impressions: u64) -> u64 {
        match self.kind {
            MetricKind::Views if impressions > 0 => 1,
            _ => 0,
        }
    }

    /// Noisy proportional first guess, capped per row. Active rows that round
    /// to zero are raised to one when the target covers every row.
    fn seed<R: Rng + ?Sized>(
        &self,
        impressions: &[u64],
        avg_rate: f64,
        target: u64,
        caps: &[u64],
        rng: &mut R,
    ) -> Vec<u64> {
        let enough_for_everyone = target > impressions.len() as u64;
        impressions
            .iter()
            .zip(caps)
            .map(|(imps, cap)| {
                let noise = (1.0 - self.noise_spread) + rng.gen::<f64>() * self.noise_spread * 2.0;
                let mut raw = (*imps as f64 * avg_rate * noise).floor() as u64;
                if raw == 0 && *imps > 0 && enough_for_everyone {
                    raw = 1;
                }
                raw.min(*cap)
            })
            .collect()
    }

    pub fn apportion<R: Rng + ?Sized>(
        &self,
        impressions: &[u64],
        total_impressions: u64,
        target: u64,
        rng: &mut R,
    ) -> RateOutcome {
        let n = impressions.len();
        if target == 0 || n == 0 || total_impressions == 0 {
            return RateOutcome {
                values: vec![0; n],
                residual: if n == 0 || total_impressions == 0 {
                    target as i64
                } else {
                    0
                },
                passes: 0,
            };
        }

        let avg_rate = target as f64 / total_impressions as f64;
        let caps: Vec<u64> = impressions.iter().map(|i| self.cap(*i, avg_rate)).collect();
        let floors: Vec<u64> = impressions.iter().map(|i| self.floor(*i)).collect();
        let mut values = self.seed(impressions, avg_rate, target, &caps, rng);

        let balance = balance_to_target(&mut values, &caps, &floors, target, rng);
        if balance.residual != 0 {
            tracing::warn!(
                metric = self.kind.as_str(),
                residual = balance.residual,
                passes = balance.passes,
                "rate balancing stopped before reaching target"
            );
        } else {
            tracing::debug!(
                metric = self.kind.as_str(),
                passes = balance.passes,
                "rate balancing converged"
            );
        }

        RateOutcome {
            values,
            residual: balance.residual,
            passes: balance.passes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn clicks() -> RateBoundedApportioner {
        RateBoundedApportioner::new(MetricKind::Clicks, 0.35)
    }

    fn views() -> RateBoundedApportioner {
        RateBoundedApportioner::new(MetricKind::Views, 0.12)
    }

    #[test]
    fn at_rate_01_clicks_sum_exactly_and_respect_impressions() {
        let mut rng = StdRng::seed_from_u64(21);
        let imps = [5_000, 3_000, 1_500, 400, 100];
        let total: u64 = imps.iter().sum();
        for target in [0, 3, 97, 1_000, 9_999, total] {
            let out = clicks().apportion(&imps, total, target, &mut rng);
            assert_eq!(out.residual, 0, "target {target}");
            assert_eq!(out.values.iter().sum::<u64>(), target);
            for (v, i) in out.values.iter().zip(&imps) {
                assert!(v <= i);
            }
        }
    }

    #[test]
    fn at_rate_02_views_stay_below_cap_when_rate_is_not_saturating() {
        let mut rng = StdRng::seed_from_u64(8);
        let imps = [1_000, 1_000, 1_000];
        let out = views().apportion(&imps, 3_000, 2_700, &mut rng);
        assert_eq!(out.residual, 0);
        assert_eq!(out.values.iter().sum::<u64>(), 2_700);
        assert!(out.values.iter().all(|v| *v <= 980));
    }

    #[test]
    fn at_rate_03_views_may_reach_impressions_when_saturating() {
        let r = views();
        assert_eq!(r.cap(1_000, 0.96), 1_000);
        assert_eq!(r.cap(1_000, 0.5), 980);
        assert_eq!(clicks().cap(1_000, 0.5), 1_000);
    }

    #[test]
    fn at_rate_04_zero_impression_rows_get_zero() {
        let mut rng = StdRng::seed_from_u64(4);
        let imps = [0, 500, 0, 500];
        for r in [clicks(), views()] {
            let out = r.apportion(&imps, 1_000, 400, &mut rng);
            assert_eq!(out.values[0], 0);
            assert_eq!(out.values[2], 0);
            assert_eq!(out.values.iter().sum::<u64>(), 400);
        }
    }

    #[test]
    fn at_rate_05_single_entity_takes_whole_target() {
        let mut rng = StdRng::seed_from_u64(777);
        for r in [clicks(), views()] {
            let out = r.apportion(&[777], 777, 777, &mut rng);
            assert_eq!(out.values, vec![777]);
            assert_eq!(out.residual, 0);
        }
    }

    #[test]
    fn at_rate_06_unreachable_target_leaves_residual_without_breaking_caps() {
        let mut rng = StdRng::seed_from_u64(13);
        let imps = [10, 20];
        let out = clicks().apportion(&imps, 30, 45, &mut rng);
        assert_eq!(out.values, vec![10, 20]);
        assert_eq!(out.residual, 15);
    }

    #[test]
    fn at_rate_07_views_floor_blocks_reduction_below_one() {
        let mut rng = StdRng::seed_from_u64(2);
        // Active rows keep one view even when the target asks for fewer.
        let r = views();
        let imps = [100, 100, 100];
        let mut values = vec![1, 1, 3];
        let caps: Vec<u64> = imps.iter().map(|i| r.cap(*i, 0.01)).collect();
        let floors: Vec<u64> = imps.iter().map(|i| r.floor(*i)).collect();
        let out = balance_to_target(&mut values, &caps, &floors, 2, &mut rng);
        assert_eq!(values, vec![1, 1, 1]);
        assert_eq!(out.residual, -1);
    }

    #[test]
    fn at_rate_08_converges_in_few_passes_for_realistic_inputs() {
        let mut rng = StdRng::seed_from_u64(99);
        let imps: Vec<u64> = (1..=40).map(|i| i * 2_500).collect();
        let total: u64 = imps.iter().sum();
        let target = total / 100;
        let out = clicks().apportion(&imps, total, target, &mut rng);
        assert_eq!(out.residual, 0);
        // Each pass can move one unit per row; phase one is off by at most the noise band.
        let bound = (target as f64 * 0.35 / imps.len() as f64).ceil() as u32 + 2;
        assert!(out.passes <= bound, "passes {} > {bound}", out.passes);
    }

    #[test]
    fn at_rate_09_seed_raises_small_rows_to_one_only_when_target_covers_all_rows() {
        let mut rng = StdRng::seed_from_u64(31);
        let r = RateBoundedApportioner::new(MetricKind::Clicks, 0.0);
        let imps = [1_000_000, 10, 10];
        let total = 1_000_020;

        let target = 1_000;
        let caps: Vec<u64> = imps.iter().map(|i| r.cap(*i, 0.001)).collect();
        let seeded = r.seed(&imps, target as f64 / total as f64, target, &caps, &mut rng);
        assert_eq!(&seeded[1..], &[1, 1]);
        assert_eq!(seeded[0], 999);

        let target = 2;
        let seeded = r.seed(&imps, target as f64 / total as f64, target, &caps, &mut rng);
        assert_eq!(&seeded[1..], &[0, 0]);
        assert_eq!(seeded[0], 1);

        // Zero-impression rows are never raised.
        let seeded = r.seed(&[0, 500], 0.1, 100, &[0, 500], &mut rng);
        assert_eq!(seeded, vec![0, 50]);
    }
}
