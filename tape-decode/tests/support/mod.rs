//! Shared scaffolding for the scenario tests in this directory: an in-memory, rewindable
//! [`SampleSource`], a recording [`BlockSink`], and a synthetic NRZI waveform renderer.
//!
//! NRZI's read-head signal is a series of flux-transition pulses, one per "1" bit, spaced one
//! bit cell apart; a "0" bit leaves the channel flat. Polarity is irrelevant to the decoder (a
//! `Top` and a `Bottom` peak are handled identically by [`tape_core::decoder::Decoder::on_top`]/
//! [`tape_core::decoder::Decoder::on_bottom`]), so every pulse here is rendered as a plain
//! upward bump.

use tape_decode::{NextSample, Position, Sample, SampleSource};
use tape_decode::{BlockKind, BlockMetadata, BlockSink};

pub struct VecSource {
    samples: Vec<Sample>,
    pos: usize,
}

impl VecSource {
    pub fn new(samples: Vec<Sample>) -> Self {
        VecSource { samples, pos: 0 }
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

    fn save_position(&mut self) -> Option<Position> {
        Some(Position(self.pos as u64))
    }

    fn restore_position(&mut self, pos: Position) {
        self.pos = pos.0 as usize;
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub tapemarks: u32,
    pub blocks: Vec<(Vec<u8>, BlockKind, BlockMetadata)>,
    pub noise: u32,
}

impl BlockSink for RecordingSink {
    fn on_tapemark(&mut self) {
        self.tapemarks += 1;
    }

    fn on_block(&mut self, bytes: &[u8], kind: BlockKind, metadata: &BlockMetadata) {
        self.blocks.push((bytes.to_vec(), kind, metadata.clone()));
    }

    fn on_noise(&mut self) {
        self.noise += 1;
    }
}

/// Renders one NRZI channel-bit-composed word per bit cell into a sample stream: `words[k]`'s bit
/// `channel` becomes a short triangular pulse on that channel, nothing otherwise. The pulse sits
/// at `(k+1)` bit cells from the start — exactly where the shared clock's `expected` midbit
/// position lands when `bitspace_avg` is unperturbed — so a perfectly periodic word stream never
/// feeds the clock averager a nonzero residual and the decoder's notion of "due" never drifts off
/// these fixed sample indices. `silent_cells_after` extra all-flat cells are appended so
/// `post_counter` can climb past the decoder's end-of-block threshold.
pub fn render_nrzi_words(words: &[u16], ntrks: usize, bit_cell: f64, sample_dt: f64, silent_cells_after: usize) -> Vec<Sample> {
    let samples_per_cell = (bit_cell / sample_dt).round() as usize;
    let total_cells = words.len() + silent_cells_after;
    let total_samples = total_cells * samples_per_cell;

    let mut channels = vec![vec![0.0f32; total_samples]; ntrks];

    for (k, &word) in words.iter().enumerate() {
        let center = (k + 1) * samples_per_cell;
        for (channel, lane) in channels.iter_mut().enumerate() {
            if (word >> channel) & 1 == 0 {
                continue;
            }
            if center >= 1 {
                lane[center - 1] = 0.3;
            }
            lane[center] = 1.0;
            if center + 1 < total_samples {
                lane[center + 1] = 0.3;
            }
        }
    }

    (0..total_samples)
        .map(|i| {
            let time = i as f64 * sample_dt;
            let voltage: Vec<f32> = (0..ntrks).map(|channel| channels[channel][i]).collect();
            Sample::new(time, voltage)
        })
        .collect()
}

/// Renders a steady train of evenly spaced single-channel pulses, used by the density-autodetect
/// scenario: no decoding takes place, only transition timing matters.
pub fn render_periodic_pulses(count: usize, period: f64, sample_dt: f64) -> Vec<Sample> {
    let samples_per_period = (period / sample_dt).round() as usize;
    let total_samples = count * samples_per_period;
    let mut lane = vec![0.0f32; total_samples];

    for k in 0..count {
        let center = k * samples_per_period + samples_per_period / 2;
        if center >= 1 {
            lane[center - 1] = 0.3;
        }
        lane[center] = 1.0;
        if center + 1 < total_samples {
            lane[center + 1] = 0.3;
        }
    }

    (0..total_samples).map(|i| Sample::new(i as f64 * sample_dt, vec![lane[i]])).collect()
}
