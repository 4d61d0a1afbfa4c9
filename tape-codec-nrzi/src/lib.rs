//! Non-return-to-zero-inverted decoder: a single clock shared by every
//! track, midbit zero inference, CRC/LRC verification, and tapemark recognition.
//!
//! Unlike PE, NRZI tracks share one clock: a flux transition on any track at a scheduled midbit
//! is a "1" on that track, its absence a "0". [`NrziDecoder`] owns that shared clock directly
//! rather than reading the per-track `clock` field of the engine's `TrackState` array, which
//! NRZI leaves untouched.

use log::{debug, trace, warn};

use tape_core::block::{Block, BlockKind, DecodeResult};
use tape_core::checksum::{parity_bit, Crc9, Lrc};
use tape_core::clock::{ClockAverager, ClockStrategy};
use tape_core::decoder::{Decoder, DecoderAction};
use tape_core::params::ParameterSet;
use tape_core::track::TrackState;
use tape_core::units::{Seconds, TrackRole};

/// `post_counter` value at which the trailing byte is expected to be the CRC character
/// (9-track only).
const CRC_POST_COUNT: u32 = 4;
/// `post_counter` value at which the trailing byte is expected to be the LRC character.
const LRC_POST_COUNT: u32 = 8;
/// Once `post_counter` exceeds this, the block is considered finished.
const END_OF_BLOCK_POST_COUNT: u32 = 8;

#[derive(Default)]
struct PendingTrack {
    sum: f64,
    count: u32,
}

/// The NRZI format state machine.
#[derive(Debug)]
pub struct NrziDecoder {
    ntrks: usize,
    nine_track: bool,
    expected_parity: bool,
    midbit_fraction: f64,
    pulse_adj: f64,
    clock: ClockAverager,
    t_last_clock: Seconds,
    post_counter: u32,
    bytes: Vec<u16>,
    byte_times: Vec<Seconds>,
    pending: Vec<PendingTrack>,
    missed_midbits: u32,
}

impl std::fmt::Debug for PendingTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTrack").field("sum", &self.sum).field("count", &self.count).finish()
    }
}

impl NrziDecoder {
    pub fn new(ntrks: usize, nine_track: bool, expected_parity: bool, initial_bitspace: f64) -> Self {
        NrziDecoder {
            ntrks,
            nine_track,
            expected_parity,
            midbit_fraction: 0.3,
            pulse_adj: 0.0,
            clock: ClockAverager::new(ClockStrategy::Constant, initial_bitspace),
            t_last_clock: 0.0,
            post_counter: 0,
            bytes: Vec::new(),
            byte_times: Vec::new(),
            pending: (0..ntrks).map(|_| PendingTrack::default()).collect(),
            missed_midbits: 0,
        }
    }

    /// The time at which `SampleEngine` should next call [`Decoder::on_midbit`], scheduled
    /// `(1 + midbit_fraction) * bitspace_avg` after the last clock.
    pub fn next_midbit_due(&self) -> Seconds {
        self.t_last_clock + (1.0 + self.midbit_fraction) * self.clock.bitspace_avg()
    }

    fn record_peak(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: f32) {
        self.pending[track].sum += time;
        self.pending[track].count += 1;

        tracks[track].last_top = Some((time, voltage));
        if let Some(height) = tracks[track].record_peak_pp_height() {
            tracks[track].agc.on_peak(height);
        }
        tracks[track].peak_count += 1;
        tracks[track].t_last_peak = time;
        tracks[track].idle = false;
    }

    fn finalize_midbit(&mut self, tracks: &mut [TrackState], scheduled_time: Seconds) -> DecoderAction {
        let expected = scheduled_time - self.midbit_fraction * self.clock.bitspace_avg();
        let bitspace_avg = self.clock.bitspace_avg();

        let mut word: u16 = 0;
        let mut avg_positions = Vec::with_capacity(self.ntrks);
        let mut any_transitioned = false;

        for (track, pending) in self.pending.iter().enumerate() {
            if pending.count > 0 {
                word |= 1 << track;
                any_transitioned = true;
                let avg = pending.sum / pending.count as f64;
                if avg < expected {
                    self.missed_midbits += 1;
                }
                avg_positions.push(avg);
            }
        }

        if any_transitioned {
            let in_crc_or_lrc = self.post_counter == CRC_POST_COUNT || self.post_counter == LRC_POST_COUNT;
            self.post_counter = 0;
            tracks.iter_mut().enumerate().for_each(|(track, ts)| {
                if self.pending[track].count > 0 {
                    ts.record_bit(expected);
                }
            });

            let avg_pos = avg_positions.iter().sum::<f64>() / avg_positions.len() as f64;
            let adjusted_pos = if in_crc_or_lrc { avg_pos } else { expected + self.pulse_adj * (avg_pos - expected) };
            let residual = adjusted_pos - expected;
            self.clock.update(bitspace_avg + residual);
        }
        else {
            self.post_counter += 1;
        }

        self.bytes.push(word);
        self.byte_times.push(expected);

        for pending in &mut self.pending {
            pending.sum = 0.0;
            pending.count = 0;
        }

        self.t_last_clock += self.clock.bitspace_avg();

        if self.post_counter > END_OF_BLOCK_POST_COUNT {
            trace!("NRZI: {} consecutive silent midbits, ending block", self.post_counter);
            DecoderAction::EndOfBlock
        }
        else {
            DecoderAction::Continue
        }
    }

    /// Strips the trailing run of literal all-zero bytes (the post-block silence), returning
    /// the non-padding prefix. Leaves a short genuine all-zero tapemark byte untouched, since
    /// trimming only removes a *trailing run*, and the tapemark's last byte is never zero.
    fn trim_trailing_silence(bytes: &[u16]) -> &[u16] {
        let mut end = bytes.len();
        while end > 0 && bytes[end - 1] == 0 {
            end -= 1;
        }
        &bytes[..end]
    }

    fn verify_and_classify(&self, result: &mut DecodeResult) -> Vec<u16> {
        let trimmed = Self::trim_trailing_silence(&self.bytes);

        let trailer_len = if self.nine_track { 2 } else { 1 };
        if trimmed.len() < trailer_len {
            return trimmed.to_vec();
        }

        let data_len = trimmed.len() - trailer_len;
        let data = &trimmed[..data_len];

        let mut crc = Crc9::new();
        let mut lrc = Lrc::new();
        for &byte in data {
            if self.nine_track {
                crc.update(byte);
            }
            lrc.update(byte);

            if parity_bit(byte as u32) != self.expected_parity as u8 {
                result.errors.vertical_parity += 1;
            }
        }

        if self.nine_track {
            let computed_crc = crc.finish();
            if computed_crc != trimmed[data_len] {
                result.errors.crc += 1;
            }
            let computed_lrc = lrc.finish() ^ computed_crc;
            if computed_lrc != trimmed[data_len + 1] {
                result.errors.lrc += 1;
            }
        }
        else {
            let computed_lrc = lrc.finish();
            if computed_lrc != trimmed[data_len] {
                result.errors.lrc += 1;
            }
        }

        data.to_vec()
    }

    fn looks_like_tapemark(&self) -> bool {
        let trimmed = Self::trim_trailing_silence(&self.bytes);
        if self.nine_track {
            trimmed.len() == 3 && trimmed == [0x26, 0x00, 0x26]
        }
        else {
            trimmed.len() == 2 && trimmed == [0x1E, 0x1E]
        }
    }
}

impl Decoder for NrziDecoder {
    fn reset(&mut self, params: &ParameterSet, roles: &[TrackRole]) {
        self.ntrks = roles.len();
        self.midbit_fraction = params.midbit;
        self.pulse_adj = params.pulse_adj;
        self.post_counter = 0;
        self.bytes.clear();
        self.byte_times.clear();
        self.t_last_clock = 0.0;
        self.pending = (0..self.ntrks).map(|_| PendingTrack::default()).collect();
        self.missed_midbits = 0;
        if params.clk_window > 0 || params.clk_alpha > 0.0 {
            self.clock = ClockAverager::new(ClockStrategy::from_params(params.clk_window, params.clk_alpha), self.clock.bitspace_avg());
        }
    }

    fn on_top(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: f32) -> DecoderAction {
        self.record_peak(tracks, track, time, voltage);
        DecoderAction::Continue
    }

    fn on_bottom(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: f32) -> DecoderAction {
        self.record_peak(tracks, track, time, voltage);
        DecoderAction::Continue
    }

    fn on_midbit(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds) -> DecoderAction {
        if track + 1 < self.ntrks {
            return DecoderAction::Continue;
        }
        self.finalize_midbit(tracks, time)
    }

    fn end_of_block(&mut self, _tracks: &mut [TrackState], block: &mut Block) -> DecodeResult {
        let mut result = DecodeResult::new();

        if self.bytes.is_empty() {
            result.kind = BlockKind::None;
            return result;
        }

        if self.looks_like_tapemark() {
            result.kind = BlockKind::Tapemark;
            debug!("NRZI: tapemark recognized");
            return result;
        }

        let data = self.verify_and_classify(&mut result);
        result.minbits = data.len();
        result.maxbits = data.len();
        result.warnings.missed_midbits = self.missed_midbits;

        for (idx, &byte) in data.iter().enumerate() {
            let time = self.byte_times.get(idx).copied().unwrap_or(0.0);
            if block.push_word(time, byte, 0).is_err() {
                warn!("NRZI: block buffer overflow while emitting decoded bytes");
                break;
            }
        }

        result.kind = if result.errcount() == 0 { BlockKind::Block } else { BlockKind::BadBlock };
        result
    }

    fn next_scheduled_event(&self) -> Option<Seconds> {
        Some(self.next_midbit_due())
    }
}
