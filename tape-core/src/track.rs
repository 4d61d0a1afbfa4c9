//! The `track` module defines [`TrackState`]: the per-channel estimator state shared by every
//! format decoder. Format-specific fields (PE's clock-expectation flag, GCR's resync
//! bit history, ...) live in each decoder crate, wrapping a `TrackState` rather than bloating it.

use crate::agc::AgcController;
use crate::clock::ClockAverager;
use crate::peak::PeakDetector;
use crate::units::{Seconds, Volts};

/// Per-track signal-processing state: the sliding window, clock and gain estimators, and the
/// bookkeeping the orchestrator needs to score a block (bit/peak counts, first/last bit times).
#[derive(Clone, Debug)]
pub struct TrackState {
    pub peak: PeakDetector,
    pub clock: ClockAverager,
    pub agc: AgcController,
    pub last_top: Option<(Seconds, Volts)>,
    pub last_bottom: Option<(Seconds, Volts)>,
    pub peak_count: u32,
    pub bit_count: u32,
    pub idle: bool,
    pub t_last_peak: Seconds,
    pub t_first_bit: Option<Seconds>,
    pub t_last_bit: Option<Seconds>,
}

impl TrackState {
    pub fn new(peak: PeakDetector, clock: ClockAverager, agc: AgcController) -> Self {
        TrackState {
            peak,
            clock,
            agc,
            last_top: None,
            last_bottom: None,
            peak_count: 0,
            bit_count: 0,
            idle: true,
            t_last_peak: 0.0,
            t_first_bit: None,
            t_last_bit: None,
        }
    }

    /// Records one bit written into the shared block buffer for this track.
    pub fn record_bit(&mut self, time: Seconds) {
        if self.t_first_bit.is_none() {
            self.t_first_bit = Some(time);
        }
        self.t_last_bit = Some(time);
        self.bit_count += 1;
    }

    /// Records one detected peak, updating the running peak-to-peak height fed to AGC.
    pub fn record_peak_pp_height(&mut self) -> Option<f64> {
        match (self.last_top, self.last_bottom) {
            (Some((_, top)), Some((_, bottom))) => Some((top - bottom).abs() as f64),
            _ => None,
        }
    }

    pub fn reset_for_new_block(&mut self) {
        self.last_top = None;
        self.last_bottom = None;
        self.peak_count = 0;
        self.bit_count = 0;
        self.idle = true;
        self.t_first_bit = None;
        self.t_last_bit = None;
    }
}
