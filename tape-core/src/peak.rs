//! The `peak` module implements [`PeakDetector`]: sliding-window detection of local maxima
//! and minima in one channel's voltage trace.

use std::collections::VecDeque;

use crate::units::{Seconds, Volts};

/// An upper bound on the peak-detection window width, regardless of what
/// `pkww_bitfrac / (bpi * ips * sample_dt)` computes to.
pub const MAX_WINDOW_SAMPLES: usize = 64;

/// How close an extremum's neighbor must be (scaled by `1/gain`) to be considered "close enough"
/// for the half-sample time-shift refinement.
pub const PEAK_THRESHOLD: f32 = 0.02;

/// Reference peak-to-peak amplitude `pkww_rise` is expressed against: `required_rise =
/// pkww_rise * (avg_pp_height / NOMINAL_PP) / agc_gain`. A track whose preamble
/// baseline matches this reference needs no amplitude scaling beyond AGC.
pub const NOMINAL_PP: f64 = 1.0;

/// A detected flux transition.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PeakEvent {
    Top { time: Seconds, voltage: Volts },
    Bottom { time: Seconds, voltage: Volts },
}

/// Computes the peak-detection window width in samples from the parameter set's `pkww_bitfrac`
/// and the format's nominal bit-cell duration, clamped to [`MAX_WINDOW_SAMPLES`].
pub fn window_samples(pkww_bitfrac: f64, bit_cell_seconds: f64, sample_dt: f64) -> usize {
    if sample_dt <= 0.0 || bit_cell_seconds <= 0.0 {
        return 3;
    }
    let width = (pkww_bitfrac * bit_cell_seconds / sample_dt).round() as usize;
    width.clamp(3, MAX_WINDOW_SAMPLES)
}

/// Sliding-window local extremum detector for one channel.
#[derive(Clone, Debug)]
pub struct PeakDetector {
    window: VecDeque<(Seconds, Volts)>,
    capacity: usize,
    sample_dt: Seconds,
    blind_remaining: usize,
}

impl PeakDetector {
    pub fn new(capacity: usize, sample_dt: Seconds) -> Self {
        PeakDetector { window: VecDeque::with_capacity(capacity), capacity: capacity.max(3), sample_dt, blind_remaining: 0 }
    }

    /// Feeds one voltage sample. `required_rise` is the minimum prominence (already scaled by
    /// `pkww_rise`, the running amplitude, and the AGC gain) a candidate extremum must clear
    /// against both window endpoints; `min_peak`, if set, is an absolute floor.
    pub fn push(
        &mut self,
        time: Seconds,
        voltage: Volts,
        required_rise: f32,
        min_peak: Option<f32>,
        gain: f64,
    ) -> Option<PeakEvent> {
        self.window.push_back((time, voltage));
        if self.window.len() > self.capacity {
            self.window.pop_front();
        }

        if self.blind_remaining > 0 {
            self.blind_remaining -= 1;
            return None;
        }

        if self.window.len() < self.capacity {
            return None;
        }

        let last_idx = self.window.len() - 1;
        let first_v = self.window[0].1;
        let last_v = self.window[last_idx].1;

        let (max_idx, &(_, max_v)) =
            self.window.iter().enumerate().max_by(|a, b| a.1 .1.partial_cmp(&b.1 .1).unwrap()).unwrap();
        let (min_idx, &(_, min_v)) =
            self.window.iter().enumerate().min_by(|a, b| a.1 .1.partial_cmp(&b.1 .1).unwrap()).unwrap();

        let is_interior = |idx: usize| idx != 0 && idx != last_idx;

        if is_interior(max_idx) {
            let rise_ok = (max_v - first_v) >= required_rise && (max_v - last_v) >= required_rise;
            let floor_ok = min_peak.map_or(true, |floor| max_v >= floor);
            if rise_ok && floor_ok {
                return Some(self.declare(max_idx, max_v, true, gain));
            }
        }

        if is_interior(min_idx) {
            let fall_ok = (first_v - min_v) >= required_rise && (last_v - min_v) >= required_rise;
            let floor_ok = min_peak.map_or(true, |floor| -min_v >= floor);
            if fall_ok && floor_ok {
                return Some(self.declare(min_idx, min_v, false, gain));
            }
        }

        None
    }

    fn declare(&mut self, idx: usize, voltage: Volts, is_top: bool, gain: f64) -> PeakEvent {
        let base_time = self.window[idx].0;
        let left_distance = self.window.len() - 1 - idx;
        self.blind_remaining = left_distance;

        let refined_time = self.refine_time(idx, voltage, gain, base_time);

        if is_top {
            PeakEvent::Top { time: refined_time, voltage }
        }
        else {
            PeakEvent::Bottom { time: refined_time, voltage }
        }
    }

    /// Shifts the reported peak time by half a sample if exactly one neighbor sits close to the
    /// extremum's voltage (within `PEAK_THRESHOLD / gain`) and the other does not.
    fn refine_time(&self, idx: usize, extremum: Volts, gain: f64, base_time: Seconds) -> Seconds {
        if idx == 0 || idx + 1 >= self.window.len() {
            return base_time;
        }

        let threshold = (PEAK_THRESHOLD as f64 / gain.max(1.0)) as f32;
        let left = self.window[idx - 1].1;
        let right = self.window[idx + 1].1;

        let left_close = (extremum - left).abs() <= threshold;
        let right_close = (extremum - right).abs() <= threshold;

        if left_close && !right_close {
            base_time - self.sample_dt / 2.0
        }
        else if right_close && !left_close {
            base_time + self.sample_dt / 2.0
        }
        else {
            base_time
        }
    }
}
