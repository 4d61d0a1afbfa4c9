//! The `orchestrator` module implements [`BlockOrchestrator`]: the driver loop that tries
//! one or more parameter sets per block, scores the attempts, and emits the winner to the
//! caller's [`BlockSink`]. It also runs the density and skew pre-passes before the first block.

use log::{debug, info, warn};

use tape_core::block::{Block, BlockKind, DecodeResult};
use tape_core::density::DensityEstimator;
use tape_core::errors::{density_error, Result};
use tape_core::io::{NextSample, SampleSource};
use tape_core::params::ParameterStore;
use tape_core::peak::{PeakDetector, PeakEvent};
use tape_core::skew::SkewEstimator;
use tape_core::units::{Format, Seconds};

use crate::bytes::assemble_bytes;
use crate::config::EngineConfig;
use crate::engine::SampleEngine;
use crate::sink::{BlockMetadata, BlockSink};

/// Prominence threshold used only by the density/skew pre-passes, which run ahead of (and
/// independently from) any [`tape_core::params::ParameterSet`] — there is no "current parmset"
/// yet when the density is still unknown. Loose enough to catch any standard density's
/// transitions without AGC.
const CALIBRATION_RISE: f32 = 0.05;
/// Safety bound on how many samples a calibration pass will read before giving up, in case the
/// source never accumulates enough transitions: density-not-inferred is fatal, not an
/// infinite pre-pass.
const MAX_CALIBRATION_SAMPLES: u64 = 4_000_000;
/// Upper bound on a computed deskew delay, in samples.
const MAX_DESKEW_DELAY_SAMPLES: usize = 256;

/// One `(block, parameter_set)` attempt's outcome, kept until the orchestrator picks a winner.
#[derive(Clone)]
struct Attempt {
    parmset_idx: usize,
    result: DecodeResult,
    block: Block,
}

/// Drives the sample engine through zero or more parameter-set attempts per block.
pub struct BlockOrchestrator {
    config: EngineConfig,
    store: ParameterStore,
    deskew_delays: Option<Vec<usize>>,
}

impl BlockOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let store = ParameterStore::with_defaults(config.format);
        BlockOrchestrator { config, store, deskew_delays: None }
    }

    /// Overlays a user parameter file onto the compiled-in defaults.
    pub fn overlay_parameters(&mut self, toml_text: &str) -> Result<()> {
        self.store.overlay_from_toml(toml_text)
    }

    pub fn parameter_store(&self) -> &ParameterStore {
        &self.store
    }

    /// The configuration as it currently stands, including any density/BPI value [`calibrate`](Self::calibrate)
    /// has since filled in.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the density and/or skew pre-passes the configuration calls for, each of which
    /// rewinds `source` back to its starting position before returning. Must be called once,
    /// before the first [`decode_next`](Self::decode_next).
    pub fn calibrate(&mut self, source: &mut dyn SampleSource) -> Result<()> {
        if self.config.bpi <= 0.0 {
            self.detect_density(source)?;
        }
        if self.config.deskew && matches!(self.config.format, Format::Nrzi | Format::Gcr) {
            let delays = self.detect_skew(source)?;
            self.deskew_delays = Some(delays);
        }
        Ok(())
    }

    fn detect_density(&mut self, source: &mut dyn SampleSource) -> Result<()> {
        let pos = source.save_position();
        let ntrks = self.config.track_order().ntrks();
        let mut estimator = DensityEstimator::new();
        let mut detectors: Vec<PeakDetector> = Vec::new();
        let mut dt: Option<Seconds> = self.config.sample_dt;
        let mut last_time: Option<Seconds> = None;
        let mut last_transition: Option<Seconds> = None;

        if let Some(dt) = dt {
            detectors = (0..ntrks).map(|_| PeakDetector::new(5, dt)).collect();
        }

        let mut samples_read = 0u64;
        while samples_read < MAX_CALIBRATION_SAMPLES && !estimator.is_ready() {
            let sample = match source.read_sample() {
                NextSample::EndOfStream => break,
                NextSample::Sample(sample) => sample,
            };
            samples_read += 1;

            if dt.is_none() {
                if let Some(prev) = last_time {
                    let delta = sample.time - prev;
                    if delta > 0.0 {
                        dt = Some(delta);
                        detectors = (0..ntrks).map(|_| PeakDetector::new(5, delta)).collect();
                    }
                }
            }
            last_time = Some(sample.time);

            if detectors.is_empty() {
                continue;
            }

            for channel in 0..ntrks.min(sample.ntrks()) {
                if let Some(event) = detectors[channel].push(sample.time, sample.voltage[channel], CALIBRATION_RISE, None, 1.0) {
                    let time = match event {
                        PeakEvent::Top { time, .. } | PeakEvent::Bottom { time, .. } => time,
                    };
                    if let Some(last) = last_transition {
                        let delta = time - last;
                        if delta > 0.0 {
                            estimator.record(delta);
                        }
                    }
                    last_transition = Some(time);
                }
            }
        }

        if let Some(pos) = pos {
            source.restore_position(pos);
        }

        if !estimator.is_ready() {
            return density_error(0.0);
        }

        let bpi = estimator.estimate_bpi(self.config.ips, self.config.format)?;
        info!("density pre-pass: detected {bpi} BPI from {} transitions", estimator.total());
        self.config.bpi = bpi;
        Ok(())
    }

    fn detect_skew(&mut self, source: &mut dyn SampleSource) -> Result<Vec<usize>> {
        let pos = source.save_position();
        let ntrks = self.config.track_order().ntrks();
        let mut skew = SkewEstimator::new(ntrks);
        let mut dt: Option<Seconds> = self.config.sample_dt;
        let mut detectors: Vec<PeakDetector> = Vec::new();
        let mut last_time: Option<Seconds> = None;

        if let Some(dt) = dt {
            detectors = (0..ntrks).map(|_| PeakDetector::new(5, dt)).collect();
        }

        let mut samples_read = 0u64;
        while samples_read < MAX_CALIBRATION_SAMPLES {
            let sample = match source.read_sample() {
                NextSample::EndOfStream => break,
                NextSample::Sample(sample) => sample,
            };
            samples_read += 1;

            if dt.is_none() {
                if let Some(prev) = last_time {
                    let delta = sample.time - prev;
                    if delta > 0.0 {
                        dt = Some(delta);
                        detectors = (0..ntrks).map(|_| PeakDetector::new(5, delta)).collect();
                    }
                }
            }
            last_time = Some(sample.time);

            if detectors.is_empty() {
                continue;
            }

            for channel in 0..ntrks.min(sample.ntrks()) {
                if let Some(event) = detectors[channel].push(sample.time, sample.voltage[channel], CALIBRATION_RISE, None, 1.0) {
                    let time = match event {
                        PeakEvent::Top { time, .. } | PeakEvent::Bottom { time, .. } => time,
                    };
                    skew.record(channel, time);
                }
            }
        }

        if let Some(pos) = pos {
            source.restore_position(pos);
        }

        let dt = dt.unwrap_or(1.0);
        let delays = skew.delays(dt, MAX_DESKEW_DELAY_SAMPLES);
        debug!("skew pre-pass: per-track delays {delays:?}");
        Ok(delays)
    }

    /// Runs one attempt's engine to completion: feeds samples from `source` until end of block
    /// or end of stream. Returns the block kind (meaningless at end of stream) and whether any
    /// sample was actually read.
    fn run_engine_to_end(&self, source: &mut dyn SampleSource, engine: &mut SampleEngine) -> (BlockKind, bool) {
        let mut saw_sample = false;
        loop {
            match source.read_sample() {
                NextSample::EndOfStream => return (BlockKind::None, saw_sample),
                NextSample::Sample(sample) => {
                    saw_sample = true;
                    if let Some(kind) = engine.process_sample(&sample) {
                        return (kind, true);
                    }
                }
            }
        }
    }

    /// A PE attempt is worth retrying only if at least one track produced bits; other formats
    /// retry on anything short of `None`/pure-noise silence.
    fn worth_retrying(&self, result: &DecodeResult) -> bool {
        match self.config.format {
            Format::Pe => result.maxbits > 0,
            _ => !matches!(result.kind, BlockKind::None),
        }
    }

    /// Picks the best attempt: a clean `Block` with the fewest warnings, else a `Block` with the
    /// fewest errors, else a `BadBlock` with the least track mismatch, else the first `Noise`.
    fn select_best(attempts: &[Attempt]) -> Option<Attempt> {
        attempts
            .iter()
            .filter(|a| a.result.kind == BlockKind::Block && a.result.errcount() == 0)
            .min_by_key(|a| a.result.warncount())
            .or_else(|| attempts.iter().filter(|a| a.result.kind == BlockKind::Block).min_by_key(|a| a.result.errcount()))
            .or_else(|| {
                attempts.iter().filter(|a| a.result.kind == BlockKind::BadBlock).min_by_key(|a| a.result.errors.track_mismatch)
            })
            .or_else(|| attempts.iter().find(|a| a.result.kind == BlockKind::Noise))
            .or_else(|| attempts.first())
            .cloned()
    }

    /// Decodes one block, trying alternative parameter sets on an imperfect result when multi-try
    /// is enabled. Returns `Ok(false)` once the source is exhausted with nothing left to decode.
    pub fn decode_next(&mut self, source: &mut dyn SampleSource, sink: &mut dyn BlockSink) -> Result<bool> {
        let start_pos = source.save_position();
        let mut tried = Vec::new();
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut winner: Option<Attempt> = None;
        let mut next_idx = self.store.active_index();

        loop {
            tried.push(next_idx);
            let params = self.store.sets()[next_idx].clone();
            let mut engine = SampleEngine::new(self.config.clone(), params, self.deskew_delays.clone());

            let (_kind, saw_sample) = self.run_engine_to_end(source, &mut engine);

            if !saw_sample {
                if attempts.is_empty() {
                    return Ok(false);
                }
                break;
            }

            let result = engine.take_result().unwrap_or_default();
            let perfect = result.is_perfect();
            let block = engine.block().clone();
            let retry_worthy = self.worth_retrying(&result);

            attempts.push(Attempt { parmset_idx: next_idx, result: result.clone(), block });

            if perfect {
                winner = attempts.last().cloned();
                break;
            }

            if self.config.multi_try && retry_worthy {
                if let Some(pos) = start_pos {
                    source.restore_position(pos);
                }
                match self.store.next_unused(&tried) {
                    Some(idx) => {
                        next_idx = idx;
                        continue;
                    }
                    None => break,
                }
            }
            else {
                break;
            }
        }

        let winner = match winner {
            Some(w) => w,
            None => match Self::select_best(&attempts) {
                Some(w) => w,
                None => return Ok(false),
            },
        };

        let (mut result, mut block) = (winner.result, winner.block);

        if tried.last() != Some(&winner.parmset_idx) {
            if let Some(pos) = start_pos {
                source.restore_position(pos);
            }
            let params = self.store.sets()[winner.parmset_idx].clone();
            let mut engine = SampleEngine::new(self.config.clone(), params, self.deskew_delays.clone());
            let (_kind, saw_sample) = self.run_engine_to_end(source, &mut engine);
            if saw_sample {
                if let Some(rerun_result) = engine.take_result() {
                    result = rerun_result;
                }
                block = engine.block().clone();
            }
        }

        if result.errcount() > 0 {
            warn!("block from parmset '{}' kept with {} error(s) after {} tries", self.store.sets()[winner.parmset_idx].name, result.errcount(), tried.len());
        }

        self.emit(sink, winner.parmset_idx, result, &block, tried.len() as u32);
        Ok(true)
    }

    fn emit(&self, sink: &mut dyn BlockSink, idx: usize, result: DecodeResult, block: &Block, tries: u32) {
        match result.kind {
            BlockKind::Tapemark => sink.on_tapemark(),
            BlockKind::Noise | BlockKind::None => sink.on_noise(),
            BlockKind::Block | BlockKind::BadBlock => {
                let (bytes, parity) = assemble_bytes(block, self.config.format, &self.config.track_order());
                let metadata = BlockMetadata {
                    minbits: result.minbits,
                    maxbits: result.maxbits,
                    errors: result.errors,
                    warnings: result.warnings,
                    avg_bit_spacing: result.avg_bit_spacing,
                    max_agc_gain: result.max_agc_gain,
                    parity,
                    parmset: self.store.sets()[idx].name.clone(),
                    tries,
                };
                sink.on_block(&bytes, result.kind, &metadata);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tape_core::sample::Sample;

    struct VecSource {
        samples: Vec<Sample>,
        pos: usize,
        saved: usize,
    }

    impl VecSource {
        fn new(samples: Vec<Sample>) -> Self {
            VecSource { samples, pos: 0, saved: 0 }
        }
    }

    impl SampleSource for VecSource {
        fn read_sample(&mut self) -> NextSample {
            if self.pos >= self.samples.len() {
                return NextSample::EndOfStream;
            }
            let sample = self.samples[self.pos].clone();
            self.pos += 1;
            NextSample::Sample(sample)
        }

        fn save_position(&mut self) -> Option<tape_core::io::Position> {
            self.saved = self.pos;
            Some(tape_core::io::Position(self.pos as u64))
        }

        fn restore_position(&mut self, pos: tape_core::io::Position) {
            self.pos = pos.0 as usize;
        }
    }

    struct RecordingSink {
        tapemarks: u32,
        blocks: Vec<Vec<u8>>,
    }

    impl BlockSink for RecordingSink {
        fn on_tapemark(&mut self) {
            self.tapemarks += 1;
        }

        fn on_block(&mut self, bytes: &[u8], _kind: BlockKind, _metadata: &BlockMetadata) {
            self.blocks.push(bytes.to_vec());
        }
    }

    #[test]
    fn empty_source_reports_nothing_to_decode() {
        let mut config = EngineConfig::new(Format::Pe, 2, 50.0);
        config.bpi = 1600.0;
        config.sample_dt = Some(1.0e-7);
        let mut orchestrator = BlockOrchestrator::new(config);
        let mut source = VecSource::new(vec![]);
        let mut sink = RecordingSink { tapemarks: 0, blocks: Vec::new() };

        let more = orchestrator.decode_next(&mut source, &mut sink).unwrap();
        assert!(!more);
        assert!(sink.blocks.is_empty());
    }

    #[test]
    fn select_best_prefers_clean_block_over_bad_block() {
        let mut clean = DecodeResult::new();
        clean.kind = BlockKind::Block;
        let mut bad = DecodeResult::new();
        bad.kind = BlockKind::BadBlock;
        bad.errors.crc = 1;

        let attempts = vec![
            Attempt { parmset_idx: 0, result: bad, block: Block::new(9) },
            Attempt { parmset_idx: 1, result: clean, block: Block::new(9) },
        ];

        let best = BlockOrchestrator::select_best(&attempts).unwrap();
        assert_eq!(best.parmset_idx, 1);
    }

    #[test]
    fn select_best_falls_back_to_first_noise() {
        let mut noise_a = DecodeResult::new();
        noise_a.kind = BlockKind::Noise;
        let mut noise_b = DecodeResult::new();
        noise_b.kind = BlockKind::Noise;

        let attempts = vec![
            Attempt { parmset_idx: 0, result: noise_a, block: Block::new(9) },
            Attempt { parmset_idx: 1, result: noise_b, block: Block::new(9) },
        ];

        let best = BlockOrchestrator::select_best(&attempts).unwrap();
        assert_eq!(best.parmset_idx, 0);
    }
}
