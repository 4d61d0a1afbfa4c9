//! The `density` module implements [`DensityEstimator`]: a histogram of inter-transition
//! deltas used to auto-detect the recording density when the user hasn't supplied one.

use std::collections::BTreeMap;

use crate::errors::{density_error, Result};
use crate::units::{Format, Seconds, STANDARD_DENSITIES_BPI};

/// Histogram bin width.
const BIN_WIDTH: Seconds = 0.5e-6;
/// Minimum number of recorded transitions before a density estimate is attempted.
pub const COUNT_NEEDED: u32 = 10_000;
/// A candidate bin must hold at least this fraction of all recorded transitions.
const MIN_PERCENT: f64 = 0.05;
/// The estimated density must land within this fraction of a standard density to be accepted.
const CLOSE_PERCENT: f64 = 0.20;

/// Accumulates a histogram of transition-to-transition time deltas and, once enough have been
/// seen, infers the recording density.
#[derive(Debug, Default)]
pub struct DensityEstimator {
    histogram: BTreeMap<u64, u32>,
    total: u32,
}

impl DensityEstimator {
    pub fn new() -> Self {
        DensityEstimator::default()
    }

    /// Records one observed inter-transition delta.
    pub fn record(&mut self, delta: Seconds) {
        if delta <= 0.0 {
            return;
        }
        let bin = (delta / BIN_WIDTH).round() as u64;
        *self.histogram.entry(bin).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_ready(&self) -> bool {
        self.total >= COUNT_NEEDED
    }

    /// Picks the smallest bin holding at least `MIN_PERCENT` of all transitions, interprets its
    /// center as one bit cell (half a bit cell for PE, since PE transitions occur twice per bit
    /// cell), and converts to BPI. Fails if no standard density is within `CLOSE_PERCENT`.
    pub fn estimate_bpi(&self, ips: f64, format: Format) -> Result<f64> {
        let min_count = (self.total as f64 * MIN_PERCENT).ceil() as u32;

        let smallest_bin = self
            .histogram
            .iter()
            .filter(|&(_, &count)| count >= min_count)
            .map(|(&bin, _)| bin)
            .min();

        let smallest_bin = match smallest_bin {
            Some(bin) => bin,
            None => return density_error(0.0),
        };

        let mut bit_cell_seconds = (smallest_bin as f64 + 0.5) * BIN_WIDTH;
        if matches!(format, Format::Pe) {
            bit_cell_seconds *= 2.0;
        }

        let estimated_bpi = 1.0 / (bit_cell_seconds * ips);

        let closest = STANDARD_DENSITIES_BPI
            .iter()
            .copied()
            .min_by(|&a, &b| {
                (a - estimated_bpi).abs().partial_cmp(&(b - estimated_bpi).abs()).unwrap()
            })
            .expect("STANDARD_DENSITIES_BPI is non-empty");

        if (estimated_bpi - closest).abs() / closest <= CLOSE_PERCENT {
            Ok(closest)
        }
        else {
            density_error(estimated_bpi)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_800_bpi_at_50_ips() {
        let mut density = DensityEstimator::new();
        // 800 BPI at 50 IPS: one bit cell every 1/(800*50) s = 25 microseconds.
        for _ in 0..COUNT_NEEDED {
            density.record(25e-6);
        }
        assert!(density.is_ready());
        assert_eq!(density.estimate_bpi(50.0, Format::Nrzi).unwrap(), 800.0);
    }

    #[test]
    fn pe_halves_the_transition_interval() {
        let mut density = DensityEstimator::new();
        // 1600 BPI at 50 IPS: full bit cell is 12.5 microseconds; PE transitions at 6.25us half-cells.
        for _ in 0..COUNT_NEEDED {
            density.record(6.25e-6);
        }
        assert_eq!(density.estimate_bpi(50.0, Format::Pe).unwrap(), 1600.0);
    }

    #[test]
    fn non_standard_density_is_rejected() {
        let mut density = DensityEstimator::new();
        for _ in 0..COUNT_NEEDED {
            density.record(100e-6); // implies ~200 BPI @ 50ips... pick something clearly off instead
        }
        // 100us @ 50ips -> bpi = 1/(100e-6*50) = 200; that IS standard, so perturb further.
        let mut density = DensityEstimator::new();
        for _ in 0..COUNT_NEEDED {
            density.record(37e-6);
        }
        assert!(density.estimate_bpi(50.0, Format::Nrzi).is_err());
    }

    #[test]
    fn idempotent_across_split_batches() {
        let mut whole = DensityEstimator::new();
        for _ in 0..COUNT_NEEDED {
            whole.record(25e-6);
        }

        let mut split = DensityEstimator::new();
        for _ in 0..COUNT_NEEDED / 2 {
            split.record(25e-6);
        }
        for _ in 0..COUNT_NEEDED / 2 {
            split.record(25e-6);
        }

        assert_eq!(whole.estimate_bpi(50.0, Format::Nrzi).unwrap(), split.estimate_bpi(50.0, Format::Nrzi).unwrap());
    }
}
