//! The `config` module defines [`EngineConfig`], the public configuration surface a caller sets
//! once before decoding, as distinct from [`tape_core::params`]'s per-attempt tunables.

use tape_core::sample::TrackOrder;
use tape_core::units::Format;

/// Caller-supplied configuration for one decoding session. Constructed once; [`crate::orchestrator::BlockOrchestrator`]
/// holds it for the life of the tape.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub format: Format,
    pub ntrks: usize,
    /// Recording density in bits per inch. `0.0` requests autodetection via
    /// [`tape_core::density::DensityEstimator`] before the first block.
    pub bpi: f64,
    /// Tape speed in inches per second.
    pub ips: f64,
    pub expected_parity: bool,
    /// Whether a caller-side writer should restore the parity bit as the MSB of each output byte.
    /// The core never merges parity into the byte value itself; it always reports the parity bit
    /// separately in [`crate::sink::BlockMetadata::parity`] so the (out-of-scope) writer can act
    /// on this flag.
    pub add_parity: bool,
    /// Derive per-channel sample delays from [`tape_core::skew::SkewEstimator`] before the first
    /// block (NRZI/GCR only).
    pub deskew: bool,
    /// Retry a block under alternative parameter sets when the first attempt isn't perfect.
    pub multi_try: bool,
    /// Leading samples to discard before the first `process_sample` call is honored.
    pub skip_samples: u64,
    /// Logical track assigned to each input channel. `None` selects the per-`ntrks` default
    /// (data tracks ascending, parity last).
    pub track_order: Option<TrackOrder>,
    /// Seconds between samples. `None` infers it from the first two samples' timestamps.
    pub sample_dt: Option<f64>,
}

impl EngineConfig {
    pub fn new(format: Format, ntrks: usize, ips: f64) -> Self {
        EngineConfig {
            format,
            ntrks,
            bpi: 0.0,
            ips,
            expected_parity: true,
            add_parity: false,
            deskew: false,
            multi_try: true,
            skip_samples: 0,
            track_order: None,
            sample_dt: None,
        }
    }

    pub fn track_order(&self) -> TrackOrder {
        self.track_order.clone().unwrap_or_else(|| TrackOrder::default_for(self.ntrks))
    }

    /// Nominal single bit-cell duration at the configured (or detected) density and speed.
    /// PE records two flux transitions per bit cell, so its transition spacing is half this.
    pub fn bit_cell_seconds(&self) -> f64 {
        if self.bpi <= 0.0 || self.ips <= 0.0 {
            return 0.0;
        }
        1.0 / (self.bpi * self.ips)
    }
}
