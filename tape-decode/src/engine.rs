//! The `engine` module implements [`SampleEngine`]: the per-sample driver that feeds every
//! track's [`PeakDetector`], dispatches peaks to the active format [`Decoder`], and recognizes
//! end of block.
//!
//! `SampleEngine` owns nothing the orchestrator doesn't hand it explicitly, and a fresh instance
//! is built for every `(block, parameter_set)` attempt — there is no `reset` method to get wrong
//! between retries.

use log::trace;

use tape_core::agc::{AgcController, AgcStrategy};
use tape_core::block::{Block, DecodeResult};
use tape_core::clock::{ClockAverager, ClockStrategy};
use tape_core::decoder::{Decoder, DecoderAction};
use tape_core::deskew::DeskewBuffer;
use tape_core::params::ParameterSet;
use tape_core::peak::{self, PeakDetector, PeakEvent, NOMINAL_PP};
use tape_core::sample::{Sample, TrackOrder};
use tape_core::track::TrackState;
use tape_core::units::Seconds;

use crate::config::EngineConfig;
use crate::decoders::new_decoder;

/// Baseline peak-to-peak accumulation window used to seed every track's [`AgcController`].
/// Generic across formats: the real preamble-length constants are internal to each codec crate,
/// so the engine uses a window wide enough to span any of them before freezing a baseline.
const AGC_BASELINE_START: u32 = 1;
const AGC_BASELINE_END: u32 = 24;

/// How many silent bit-cells must elapse after a block ends before a new one may start.
/// Inter-block gap handling is timer-free, based purely on sample time; three bit-cells is long
/// enough to clear any format's postamble without absorbing the next block's preamble.
const INTERBLOCK_GAP_BITCELLS: f64 = 3.0;

fn agc_strategy(params: &ParameterSet) -> AgcStrategy {
    if params.agc_window > 0 {
        AgcStrategy::Window { capacity: params.agc_window as usize }
    }
    else {
        AgcStrategy::Exponential { alpha: if params.agc_alpha > 0.0 { params.agc_alpha } else { 0.5 } }
    }
}

/// The per-sample driver. Consumes samples one at a time; [`process_sample`](Self::process_sample)
/// returns the block's kind once the active decoder signals end of block.
pub struct SampleEngine {
    config: EngineConfig,
    order: TrackOrder,
    tracks: Vec<TrackState>,
    deskew: Option<DeskewBuffer>,
    decoder: Box<dyn Decoder>,
    block: Block,
    params: ParameterSet,
    skip_remaining: u64,
    gap_until: Option<Seconds>,
    sample_dt: Option<Seconds>,
    last_sample_time: Option<Seconds>,
    last_result: Option<DecodeResult>,
}

impl SampleEngine {
    /// Builds a fresh engine for one `(block, parameter_set)` attempt. `deskew_delays`, when
    /// supplied, is the per-channel sample delay computed by a prior [`tape_core::skew::SkewEstimator`]
    /// pass; it is `None` unless the caller requested deskew and a skew pre-pass already ran.
    pub fn new(config: EngineConfig, params: ParameterSet, deskew_delays: Option<Vec<usize>>) -> Self {
        let order = config.track_order();
        let ntrks = order.ntrks();
        let bit_cell = config.bit_cell_seconds();
        let sample_dt = config.sample_dt;
        let peak_window = sample_dt.map(|dt| peak::window_samples(params.pkww_bitfrac, bit_cell, dt)).unwrap_or(3);

        let tracks = (0..ntrks)
            .map(|_| {
                TrackState::new(
                    PeakDetector::new(peak_window, sample_dt.unwrap_or(bit_cell.max(1e-9))),
                    ClockAverager::new(ClockStrategy::from_params(params.clk_window, params.clk_alpha), bit_cell),
                    AgcController::new(agc_strategy(&params), AGC_BASELINE_START, AGC_BASELINE_END),
                )
            })
            .collect();

        let roles: Vec<_> = (0..ntrks).map(|ch| order.role(ch)).collect();
        let mut decoder = new_decoder(config.format, ntrks, config.expected_parity, bit_cell);
        decoder.reset(&params, &roles);

        let deskew = deskew_delays.map(|delays| DeskewBuffer::new(&delays));

        SampleEngine {
            skip_remaining: config.skip_samples,
            block: Block::new(ntrks),
            config,
            order,
            tracks,
            deskew,
            decoder,
            params,
            gap_until: None,
            sample_dt,
            last_sample_time: None,
            last_result: None,
        }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn track_order(&self) -> &TrackOrder {
        &self.order
    }

    /// Takes the [`DecodeResult`] produced by the most recent end-of-block, if any.
    pub fn take_result(&mut self) -> Option<DecodeResult> {
        self.last_result.take()
    }

    fn resize_peak_detectors(&mut self, dt: Seconds) {
        let window = peak::window_samples(self.params.pkww_bitfrac, self.config.bit_cell_seconds(), dt);
        for track in &mut self.tracks {
            track.peak = PeakDetector::new(window, dt);
        }
    }

    fn required_rise(&self, channel: usize) -> f32 {
        let scale = self.tracks[channel].agc.baseline_pp().map(|bp| bp / NOMINAL_PP).unwrap_or(1.0);
        let gain = self.tracks[channel].agc.gain().max(1.0);
        ((self.params.pkww_rise * scale) / gain) as f32
    }

    fn interblock_gap(&self) -> Seconds {
        self.config.bit_cell_seconds().max(1e-9) * INTERBLOCK_GAP_BITCELLS
    }

    /// Feeds one sample. Returns `Some(kind)` once the active decoder recognizes end of block.
    pub fn process_sample(&mut self, sample: &Sample) -> Option<tape_core::block::BlockKind> {
        if self.skip_remaining > 0 {
            self.skip_remaining -= 1;
            return None;
        }

        if self.sample_dt.is_none() {
            if let Some(prev) = self.last_sample_time {
                let delta = sample.time - prev;
                if delta > 0.0 {
                    self.sample_dt = Some(delta);
                    self.resize_peak_detectors(delta);
                }
            }
        }
        self.last_sample_time = Some(sample.time);

        if let Some(deadline) = self.gap_until {
            if sample.time < deadline {
                return None;
            }
            self.gap_until = None;
        }

        let voltages: Vec<f32> = match &mut self.deskew {
            Some(deskew) => (0..sample.ntrks()).map(|ch| deskew.push(ch, sample.voltage[ch])).collect(),
            None => sample.voltage.clone(),
        };

        let mut guard = 0usize;
        while let Some(due) = self.decoder.next_scheduled_event() {
            if due > sample.time || guard > self.tracks.len() * 4 + 4 {
                break;
            }
            guard += 1;
            let mut ended = false;
            for track in 0..self.tracks.len() {
                if self.decoder.on_midbit(&mut self.tracks, track, due) == DecoderAction::EndOfBlock {
                    ended = true;
                }
            }
            if ended {
                return Some(self.finish_block());
            }
        }

        for channel in 0..voltages.len() {
            let gain = self.tracks[channel].agc.gain();
            let required_rise = self.required_rise(channel);
            let min_peak = self.params.min_peak.map(|v| v as f32);

            let event = self.tracks[channel].peak.push(sample.time, voltages[channel], required_rise, min_peak, gain);
            if let Some(event) = event {
                let action = match event {
                    PeakEvent::Top { time, voltage } => self.decoder.on_top(&mut self.tracks, channel, time, voltage),
                    PeakEvent::Bottom { time, voltage } => self.decoder.on_bottom(&mut self.tracks, channel, time, voltage),
                };
                if action == DecoderAction::EndOfBlock {
                    return Some(self.finish_block());
                }
            }
        }

        if let Some(factor) = self.decoder.idle_factor() {
            for track in &mut self.tracks {
                if !track.idle && track.peak_count > 0 {
                    let bitspace = track.clock.bitspace_avg();
                    if bitspace > 0.0 && (sample.time - track.t_last_peak) > factor * bitspace {
                        track.idle = true;
                    }
                }
            }
            let any_active = self.tracks.iter().any(|t| t.peak_count > 0);
            if any_active && self.tracks.iter().all(|t| t.idle) {
                return Some(self.finish_block());
            }
        }

        None
    }

    fn finish_block(&mut self) -> tape_core::block::BlockKind {
        let mut result = self.decoder.end_of_block(&mut self.tracks, &mut self.block);
        self.decoder.postprocess(&mut self.block, &mut result);
        result.avg_bit_spacing = average_spacing(&self.block);
        result.max_agc_gain = self.tracks.iter().map(|t| t.agc.max_gain()).fold(result.max_agc_gain, f64::max);

        let kind = result.kind;
        trace!("sample engine: end of block -> {kind:?}, {} bytes", self.block.len());
        self.last_result = Some(result);
        self.gap_until = Some(self.last_sample_time.unwrap_or(0.0) + self.interblock_gap());
        kind
    }
}

fn average_spacing(block: &Block) -> Seconds {
    if block.len() < 2 {
        return 0.0;
    }
    let first = block.time(0);
    let last = block.time(block.len() - 1);
    (last - first) / (block.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tape_core::params::ParameterStore;
    use tape_core::sample::Sample;
    use tape_core::units::Format;

    fn config(format: Format, ntrks: usize) -> EngineConfig {
        let mut cfg = EngineConfig::new(format, ntrks, 50.0);
        cfg.bpi = 800.0;
        cfg.sample_dt = Some(1.0e-6);
        cfg
    }

    #[test]
    fn idle_from_start_never_ends_block_with_no_peaks() {
        let cfg = config(Format::Pe, 2);
        let params = ParameterStore::with_defaults(Format::Pe).active().clone();
        let mut engine = SampleEngine::new(cfg, params, None);

        for i in 0..50 {
            let sample = Sample::new(i as f64 * 1.0e-6, vec![0.0, 0.0]);
            assert_eq!(engine.process_sample(&sample), None);
        }
    }

    #[test]
    fn skip_samples_are_not_fed_to_peak_detector() {
        let mut cfg = config(Format::Pe, 1);
        cfg.skip_samples = 5;
        let params = ParameterStore::with_defaults(Format::Pe).active().clone();
        let mut engine = SampleEngine::new(cfg, params, None);

        for i in 0..5 {
            let sample = Sample::new(i as f64 * 1.0e-6, vec![5.0]);
            assert_eq!(engine.process_sample(&sample), None);
        }
        assert_eq!(engine.skip_remaining, 0);
    }

    #[test]
    fn average_spacing_is_zero_for_short_blocks() {
        let block = Block::new(1);
        assert_eq!(average_spacing(&block), 0.0);
    }
}
