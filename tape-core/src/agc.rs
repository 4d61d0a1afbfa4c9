//! The `agc` module implements [`AgcController`]: per-track automatic gain compensation
//! that restores faded peaks to the amplitude observed during the preamble.

use std::collections::VecDeque;

/// Upper clamp on the AGC gain. An un-bounded gain would let a near-silent dropout amplify noise
/// into spurious peaks.
pub const AGC_MAX: f64 = 8.0;

/// Which of the two strategies an [`AgcController`] uses to turn recent peak-to-peak heights
/// into a gain.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AgcStrategy {
    /// `gain <- baseline / last_pp_height`, smoothed exponentially into `gain`.
    Exponential { alpha: f64 },
    /// `gain = baseline / min(last `capacity` pp heights)`.
    Window { capacity: usize },
}

/// Tracks one track's (or the shared NRZI) gain.
#[derive(Clone, Debug)]
pub struct AgcController {
    strategy: AgcStrategy,
    agc_start: u32,
    agc_end: u32,
    peaks_seen: u32,
    baseline_accum: f64,
    baseline_count: u32,
    baseline_pp: Option<f64>,
    heights: VecDeque<f64>,
    gain: f64,
    max_gain: f64,
}

impl AgcController {
    /// `agc_start`/`agc_end` bound the peak-count range (during the preamble) over which the
    /// baseline peak-to-peak amplitude is accumulated.
    pub fn new(strategy: AgcStrategy, agc_start: u32, agc_end: u32) -> Self {
        AgcController {
            strategy,
            agc_start,
            agc_end,
            peaks_seen: 0,
            baseline_accum: 0.0,
            baseline_count: 0,
            baseline_pp: None,
            heights: VecDeque::new(),
            gain: 1.0,
            max_gain: 1.0,
        }
    }

    /// Feeds one newly detected peak-to-peak height, updating the baseline accumulation (while
    /// still in the preamble) or the gain (once a baseline is frozen). Called once per peak,
    /// never per sample.
    pub fn on_peak(&mut self, pp_height: f64) {
        self.peaks_seen += 1;

        if self.baseline_pp.is_none() {
            if self.peaks_seen >= self.agc_start && self.peaks_seen <= self.agc_end {
                self.baseline_accum += pp_height;
                self.baseline_count += 1;
            }
            return;
        }

        let baseline = self.baseline_pp.unwrap();

        match self.strategy {
            AgcStrategy::Exponential { alpha } => {
                let target = if pp_height > 0.0 { baseline / pp_height } else { self.gain };
                self.gain = alpha * target + (1.0 - alpha) * self.gain;
            }
            AgcStrategy::Window { capacity } => {
                if self.heights.len() >= capacity {
                    self.heights.pop_front();
                }
                self.heights.push_back(pp_height);
                let min_height = self.heights.iter().cloned().fold(f64::INFINITY, f64::min);
                self.gain = if min_height > 0.0 { baseline / min_height } else { self.gain };
            }
        }

        self.gain = self.gain.clamp(1.0, AGC_MAX);
        self.max_gain = self.max_gain.max(self.gain);
    }

    /// Freezes the baseline peak-to-peak amplitude from the peaks accumulated so far and begins
    /// applying gain corrections on subsequent peaks. Called once, at preamble exit.
    pub fn freeze_baseline(&mut self) {
        if self.baseline_pp.is_none() && self.baseline_count > 0 {
            self.baseline_pp = Some(self.baseline_accum / self.baseline_count as f64);
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn max_gain(&self) -> f64 {
        self.max_gain
    }

    pub fn baseline_pp(&self) -> Option<f64> {
        self.baseline_pp
    }
}
