//! The `skew` module implements [`SkewEstimator`]: derives per-channel sample delays from
//! transition-time statistics, used only when the caller requests deskew on NRZI or GCR.

use crate::units::Seconds;

/// Accumulates, per track, the average transition position relative to a shared reference.
#[derive(Debug)]
pub struct SkewEstimator {
    sums: Vec<f64>,
    counts: Vec<u32>,
}

impl SkewEstimator {
    pub fn new(ntrks: usize) -> Self {
        SkewEstimator { sums: vec![0.0; ntrks], counts: vec![0; ntrks] }
    }

    /// Records one transition on `track` at `time_relative_to_reference` seconds.
    pub fn record(&mut self, track: usize, time_relative_to_reference: Seconds) {
        self.sums[track] += time_relative_to_reference;
        self.counts[track] += 1;
    }

    /// Computes each track's integer sample delay: `ceil((max_avg - track_avg) / sample_dt)`,
    /// clamped to `[0, max_delay]`.
    pub fn delays(&self, sample_dt: Seconds, max_delay: usize) -> Vec<usize> {
        let averages: Vec<f64> = self
            .sums
            .iter()
            .zip(&self.counts)
            .map(|(&sum, &count)| if count > 0 { sum / count as f64 } else { 0.0 })
            .collect();

        let max_avg = averages.iter().cloned().fold(f64::MIN, f64::max);

        averages
            .iter()
            .map(|&avg| {
                let delay = ((max_avg - avg) / sample_dt).ceil();
                (delay.max(0.0) as usize).min(max_delay)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_with_latest_average_gets_zero_delay() {
        let mut skew = SkewEstimator::new(3);
        skew.record(0, 1.0e-6);
        skew.record(1, 3.0e-6);
        skew.record(2, 2.0e-6);

        let delays = skew.delays(1.0e-6, 10);
        assert_eq!(delays[1], 0);
        assert_eq!(delays[0], 2);
        assert_eq!(delays[2], 1);
    }

    #[test]
    fn delays_are_clamped() {
        let mut skew = SkewEstimator::new(2);
        skew.record(0, 0.0);
        skew.record(1, 100.0e-6);

        let delays = skew.delays(1.0e-6, 5);
        assert_eq!(delays[0], 5);
        assert_eq!(delays[1], 0);
    }
}
