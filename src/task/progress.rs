//! Synthetic progress between "job accepted" and "job finished".
//!
//! The service only reports coarse status, so the displayed percentage is an
//! estimate derived from the security level and the number of images. It
//! creeps towards a soft ceiling and only a confirmed success may show 100.

use crate::service::SecurityLevel;

/// Highest value the estimate may reach.
pub const SOFT_CEILING: f64 = 95.0;

/// Estimator ticks per second of estimated work.
const TICKS_PER_SECOND: f64 = 2.0;

/// Progress estimate for one submitted batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEstimator {
    estimated_total_seconds: u32,
}

impl ProgressEstimator {
    /// Returns `None` for an empty batch.
    pub fn new(level: SecurityLevel, file_count: usize) -> Option<Self> {
        let files = u32::try_from(file_count).ok()?;
        Self::for_total_seconds(level.per_image_seconds().checked_mul(files)?)
    }

    pub fn for_total_seconds(estimated_total_seconds: u32) -> Option<Self> {
        (estimated_total_seconds > 0).then_some(Self {
            estimated_total_seconds,
        })
    }

    pub fn estimated_total_seconds(&self) -> u32 {
        self.estimated_total_seconds
    }

    /// Percentage added per tick.
    pub fn step(&self) -> f64 {
        100.0 / (TICKS_PER_SECOND * f64::from(self.estimated_total_seconds))
    }

    /// Estimated percentage after `ticks` ticks starting from `base`.
    ///
    /// Never below `base`, never above [`SOFT_CEILING`] unless `base` already is.
    pub fn percent_after(&self, base: f64, ticks: u64) -> f64 {
        if base >= SOFT_CEILING {
            return base;
        }
        (base + ticks as f64 * self.step()).min(SOFT_CEILING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_standard_images() {
        let est = ProgressEstimator::new(SecurityLevel::Standard, 3).unwrap();
        assert_eq!(est.estimated_total_seconds(), 60);
        assert!((est.step() - 100.0 / 120.0).abs() < 1e-9);
        assert!((est.step() - 0.833).abs() < 0.001);
    }

    #[test]
    fn total_scales_with_level() {
        assert_eq!(
            ProgressEstimator::new(SecurityLevel::Enhanced, 2)
                .unwrap()
                .estimated_total_seconds(),
            90
        );
        assert_eq!(
            ProgressEstimator::new(SecurityLevel::Maximum, 1)
                .unwrap()
                .estimated_total_seconds(),
            90
        );
    }

    #[test]
    fn empty_batch_has_no_estimate() {
        assert!(ProgressEstimator::new(SecurityLevel::Standard, 0).is_none());
        assert!(ProgressEstimator::for_total_seconds(0).is_none());
    }

    #[test]
    fn capped_at_soft_ceiling() {
        let est = ProgressEstimator::new(SecurityLevel::Standard, 1).unwrap();
        // 20s → 2.5% per tick; 30 ticks from 20% would be 95, 40 would be 120
        assert!((est.percent_after(20.0, 30) - 95.0).abs() < 1e-9);
        assert_eq!(est.percent_after(20.0, 40), SOFT_CEILING);
        assert_eq!(est.percent_after(20.0, u64::MAX), SOFT_CEILING);
    }

    #[test]
    fn monotonic_and_idempotent() {
        let est = ProgressEstimator::new(SecurityLevel::Maximum, 4).unwrap();
        let mut last = 20.0;
        for ticks in 0..2000 {
            let p = est.percent_after(20.0, ticks);
            assert!(p >= last);
            assert!(p <= SOFT_CEILING);
            assert_eq!(p, est.percent_after(20.0, ticks));
            last = p;
        }
    }

    #[test]
    fn base_above_ceiling_is_kept() {
        let est = ProgressEstimator::new(SecurityLevel::Standard, 1).unwrap();
        assert_eq!(est.percent_after(97.0, 10), 97.0);
    }
}
