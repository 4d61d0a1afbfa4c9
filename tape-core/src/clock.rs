//! The `clock` module implements [`ClockAverager`]: a running estimate of bit-cell duration
//! per track, or shared globally for NRZI.

use std::collections::VecDeque;

/// An upper bound on the moving-window size; [`ParameterSet::clk_window`](crate::params::ParameterSet)
/// values above this are clamped. Acknowledges that a long moving window accumulates roundoff
/// that an incremental running sum would otherwise hide.
pub const MAX_CLK_WINDOW: usize = 32;

/// Which of the three strategies a [`ClockAverager`] uses to track `bitspace_avg`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ClockStrategy {
    /// Average of the last `capacity` deltas, `capacity` clamped to [`MAX_CLK_WINDOW`].
    Window { capacity: usize },
    /// Exponential smoothing: `avg <- alpha*delta + (1-alpha)*avg`.
    Exponential { alpha: f64 },
    /// Fixed at the value it was constructed or last `force`d with.
    Constant,
}

impl ClockStrategy {
    /// Chooses a strategy from a parameter set's `clk_window`/`clk_alpha` fields: `clk_window > 0`
    /// selects the moving window, otherwise `clk_alpha > 0` selects exponential smoothing,
    /// otherwise the clock is constant.
    pub fn from_params(clk_window: u32, clk_alpha: f64) -> Self {
        if clk_window > 0 {
            ClockStrategy::Window { capacity: (clk_window as usize).min(MAX_CLK_WINDOW) }
        }
        else if clk_alpha > 0.0 {
            ClockStrategy::Exponential { alpha: clk_alpha }
        }
        else {
            ClockStrategy::Constant
        }
    }
}

/// Tracks the running estimate of one bit-cell duration, in seconds.
#[derive(Clone, Debug)]
pub struct ClockAverager {
    strategy: ClockStrategy,
    bitspace_avg: f64,
    history: VecDeque<f64>,
    history_sum: f64,
}

impl ClockAverager {
    pub fn new(strategy: ClockStrategy, initial_bitspace: f64) -> Self {
        let mut averager =
            ClockAverager { strategy, bitspace_avg: initial_bitspace, history: VecDeque::new(), history_sum: 0.0 };
        averager.force(initial_bitspace);
        averager
    }

    /// Folds one more observed bit-cell delta into the running average.
    pub fn update(&mut self, delta: f64) {
        match self.strategy {
            ClockStrategy::Window { capacity } => {
                if self.history.len() >= capacity {
                    if let Some(oldest) = self.history.pop_front() {
                        self.history_sum -= oldest;
                    }
                }
                self.history.push_back(delta);
                self.history_sum += delta;
                self.bitspace_avg = self.history_sum / self.history.len() as f64;
            }
            ClockStrategy::Exponential { alpha } => {
                self.bitspace_avg = alpha * delta + (1.0 - alpha) * self.bitspace_avg;
            }
            ClockStrategy::Constant => (),
        }
    }

    /// Replaces all history with a single value, e.g. when a GCR resync mark forces the clock.
    pub fn force(&mut self, delta: f64) {
        self.history.clear();
        self.history_sum = 0.0;
        self.bitspace_avg = delta;
        if let ClockStrategy::Window { .. } = self.strategy {
            self.history.push_back(delta);
            self.history_sum = delta;
        }
    }

    pub fn bitspace_avg(&self) -> f64 {
        self.bitspace_avg
    }
}
