//! Phase-encoding decoder: an `Idle -> Preamble -> Data` state machine per
//! track, with fake-bit synthesis across dropouts and postamble trimming at end of block.
//!
//! A PE "1" is an upward flux transition at the bit cell; a "0" is downward; a clock transition
//! occurs at the midpoint when consecutive bits are equal. Tracks are not time-locked to each
//! other the way NRZI's are — each advances on its own peaks — so this decoder buffers each
//! track's bit stream independently and only assembles the shared column buffer once the block
//! is framed.

use log::{debug, trace, warn};

use tape_core::block::{Block, BlockKind, DecodeResult};
use tape_core::params::ParameterSet;
use tape_core::{
    checksum::parity_bit,
    decoder::{Decoder, DecoderAction},
    track::TrackState,
    units::{Seconds, TrackRole, Volts},
};

/// Peaks required during the preamble, after a missed clock, before data can begin.
const MIN_PREAMBLE_PEAKS: u32 = 35;
/// Bits trimmed from a track's trailing postamble, at most.
const MAX_POSTAMBLE_BITS: usize = 40;
/// Ignored trailing zero bits allowed after the last "1" before the postamble walk stops.
const IGNORE_POSTAMBLE: usize = 5;
/// A gap exceeding `bitspace_avg * DROPOUT_FACTOR` is treated as a dropout needing faked bits
/// rather than an ordinary missed clock.
const DROPOUT_FACTOR: f64 = 1.75;
/// Smoothing coefficient applied to the pulse-timing offset correction.
const PULSE_ADJ_COEFF: f64 = 0.5;
/// A track with no peak for this many bit-cells is declared idle.
const PE_IDLE_FACTOR: f64 = 3.0;
/// Tracks expected to show many clock-only peaks in the tapemark's stuttering pattern.
const TAPEMARK_BUSY_ROLES: [TrackRole; 6] =
    [TrackRole::Data(0), TrackRole::Data(2), TrackRole::Data(5), TrackRole::Data(6), TrackRole::Data(7), TrackRole::Parity];
/// Tracks expected to stay nearly silent during a tapemark.
const TAPEMARK_QUIET_ROLES: [TrackRole; 3] = [TrackRole::Data(1), TrackRole::Data(3), TrackRole::Data(4)];
const TAPEMARK_BUSY_MIN_PEAKS: u32 = 75;
const TAPEMARK_BUSY_MAX_BITS: usize = 2;
const TAPEMARK_QUIET_MAX_PEAKS: u32 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PeState {
    Idle,
    Preamble,
    Data,
}

#[derive(Clone, Debug)]
struct PeTrack {
    state: PeState,
    expect_clock_next: bool,
    last_bit: bool,
    zero_run: u32,
    pulse_adj: f64,
    bits: Vec<bool>,
    bit_times: Vec<Seconds>,
    faked: Vec<bool>,
}

impl PeTrack {
    fn new() -> Self {
        PeTrack {
            state: PeState::Idle,
            expect_clock_next: false,
            last_bit: false,
            zero_run: 0,
            pulse_adj: 0.0,
            bits: Vec::new(),
            bit_times: Vec::new(),
            faked: Vec::new(),
        }
    }

    fn push_bit(&mut self, bit: bool, time: Seconds, faked: bool) {
        self.bits.push(bit);
        self.bit_times.push(time);
        self.faked.push(faked);
    }
}

/// The PE format state machine.
#[derive(Debug)]
pub struct PeDecoder {
    tracks: Vec<PeTrack>,
    clk_factor: f64,
    roles: Vec<TrackRole>,
    expected_parity: bool,
}

impl PeDecoder {
    pub fn new(ntrks: usize, expected_parity: bool) -> Self {
        PeDecoder {
            tracks: vec![PeTrack::new(); ntrks],
            clk_factor: 1.0,
            roles: (0..ntrks as u8).map(TrackRole::Data).collect(),
            expected_parity,
        }
    }

    fn channel_for(&self, role: TrackRole) -> Option<usize> {
        self.roles.iter().position(|&r| r == role)
    }

    fn handle_edge(
        &mut self,
        tracks: &mut [TrackState],
        track: usize,
        time: Seconds,
        voltage: Volts,
        is_top: bool,
    ) -> DecoderAction {
        let bitspace_avg = tracks[track].clock.bitspace_avg();
        let t_last_peak = tracks[track].t_last_peak;
        let has_history = tracks[track].peak_count > 0;

        let gap = if has_history { time - t_last_peak + self.tracks[track].pulse_adj } else { bitspace_avg };
        let clkwindow = bitspace_avg / 2.0 * self.clk_factor;
        let missed = has_history && gap > clkwindow;
        let dropout = has_history && bitspace_avg > 0.0 && gap > bitspace_avg * DROPOUT_FACTOR;

        if dropout {
            let pt = &mut self.tracks[track];
            let missing = ((gap / bitspace_avg).round() as i64 - 1).max(0) as usize;
            for i in 0..missing {
                let fake_time = t_last_peak + bitspace_avg * (i + 1) as f64;
                pt.push_bit(pt.last_bit, fake_time, true);
            }
            if missing > 0 {
                trace!("track {track}: dropout recovered, synthesized {missing} faked bits");
            }
        }

        let pt = &mut self.tracks[track];

        match pt.state {
            PeState::Idle => {
                pt.state = PeState::Preamble;
                pt.zero_run = 1;
            }
            PeState::Preamble => {
                pt.zero_run += 1;
                if pt.zero_run >= MIN_PREAMBLE_PEAKS && missed {
                    pt.state = PeState::Data;
                    tracks[track].agc.freeze_baseline();
                    debug!("track {track}: preamble complete after {} peaks, entering data", pt.zero_run);
                }
            }
            PeState::Data => {}
        }

        if pt.state == PeState::Data {
            let is_data_edge = pt.expect_clock_next || missed;
            if is_data_edge {
                pt.last_bit = is_top;
                pt.expect_clock_next = false;
                pt.push_bit(is_top, time, false);
            }
            else {
                pt.expect_clock_next = true;
            }

            if bitspace_avg > 0.0 {
                let divisor = if missed { 1.0 } else { 2.0 };
                pt.pulse_adj = (gap - bitspace_avg / divisor) * PULSE_ADJ_COEFF;
            }
            if has_history {
                tracks[track].clock.update(gap);
            }
        }

        tracks[track].t_last_peak = time;
        if is_top {
            tracks[track].last_top = Some((time, voltage));
        }
        else {
            tracks[track].last_bottom = Some((time, voltage));
        }
        if let Some(height) = tracks[track].record_peak_pp_height() {
            tracks[track].agc.on_peak(height);
        }
        tracks[track].peak_count += 1;
        tracks[track].idle = false;

        DecoderAction::Continue
    }

    /// Trims a track's trailing postamble in place: remove up to
    /// `MAX_POSTAMBLE_BITS`, stopping once the last "1" more than `IGNORE_POSTAMBLE` zeros back
    /// is reached. Returns the number of faked bits removed.
    fn trim_postamble(pt: &mut PeTrack) -> u32 {
        let mut removed = 0usize;
        let mut ignored_since_one = 0usize;
        let mut faked_removed = 0u32;

        while removed < MAX_POSTAMBLE_BITS && !pt.bits.is_empty() {
            let idx = pt.bits.len() - 1;
            if pt.bits[idx] {
                ignored_since_one = 0;
            }
            else {
                ignored_since_one += 1;
            }

            if ignored_since_one > IGNORE_POSTAMBLE {
                break;
            }

            if pt.faked[idx] {
                faked_removed += 1;
            }
            pt.bits.pop();
            pt.bit_times.pop();
            pt.faked.pop();
            removed += 1;
        }

        faked_removed
    }
}

impl Decoder for PeDecoder {
    fn reset(&mut self, params: &ParameterSet, roles: &[TrackRole]) {
        self.clk_factor = params.clk_factor;
        self.roles = roles.to_vec();
        for track in &mut self.tracks {
            *track = PeTrack::new();
        }
    }

    fn on_top(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: Volts) -> DecoderAction {
        self.handle_edge(tracks, track, time, voltage, true)
    }

    fn on_bottom(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: Volts) -> DecoderAction {
        self.handle_edge(tracks, track, time, voltage, false)
    }

    fn end_of_block(&mut self, tracks: &mut [TrackState], block: &mut Block) -> DecodeResult {
        let mut result = DecodeResult::new();
        let mut total_faked_removed = 0u32;

        for pt in &mut self.tracks {
            total_faked_removed += Self::trim_postamble(pt);
        }

        let is_tapemark = self.looks_like_tapemark(tracks);
        if is_tapemark {
            result.kind = BlockKind::Tapemark;
            return result;
        }

        let lengths: Vec<usize> = self.tracks.iter().map(|t| t.bits.len()).collect();
        let maxbits = lengths.iter().copied().max().unwrap_or(0);
        let minbits = lengths.iter().copied().min().unwrap_or(0);

        if maxbits == 0 {
            result.kind = BlockKind::None;
            return result;
        }

        if maxbits - minbits > 2 {
            result.errors.track_mismatch += 1;
            warn!("PE block: track bit counts range from {minbits} to {maxbits}, exceeds tolerance");
        }

        result.minbits = minbits;
        result.maxbits = maxbits;

        let mut faked_total = 0u32;
        for k in 0..maxbits {
            let mut word: u16 = 0;
            let mut faked_mask: u16 = 0;
            let mut time_sum = 0.0;
            let mut time_count = 0u32;

            for (track, pt) in self.tracks.iter().enumerate() {
                let (bit, faked, bit_time) = if k < pt.bits.len() {
                    (pt.bits[k], pt.faked[k], pt.bit_times[k])
                }
                else {
                    (pt.last_bit, true, pt.bit_times.last().copied().unwrap_or(0.0))
                };
                if bit {
                    word |= 1 << track;
                }
                if faked {
                    faked_mask |= 1 << track;
                    faked_total += 1;
                }
                time_sum += bit_time;
                time_count += 1;
            }

            let avg_time = if time_count > 0 { time_sum / time_count as f64 } else { 0.0 };
            let _ = block.push_word(avg_time, word, faked_mask);

            if parity_bit(word as u32) != self.expected_parity as u8 {
                result.errors.vertical_parity += 1;
            }
        }

        result.warnings.faked_bits = faked_total + total_faked_removed;
        result.kind = if result.errcount() == 0 { BlockKind::Block } else { BlockKind::BadBlock };
        result
    }

    fn idle_factor(&self) -> Option<f64> {
        Some(PE_IDLE_FACTOR)
    }
}

impl PeDecoder {
    fn looks_like_tapemark(&self, tracks: &[TrackState]) -> bool {
        let busy_ok = TAPEMARK_BUSY_ROLES.iter().all(|&role| match self.channel_for(role) {
            Some(ch) => tracks[ch].peak_count > TAPEMARK_BUSY_MIN_PEAKS && self.tracks[ch].bits.len() <= TAPEMARK_BUSY_MAX_BITS,
            None => false,
        });
        let quiet_ok = TAPEMARK_QUIET_ROLES.iter().all(|&role| match self.channel_for(role) {
            Some(ch) => tracks[ch].peak_count <= TAPEMARK_QUIET_MAX_PEAKS,
            None => false,
        });
        busy_ok && quiet_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tape_core::agc::{AgcController, AgcStrategy};
    use tape_core::clock::{ClockAverager, ClockStrategy};
    use tape_core::peak::PeakDetector;

    fn make_tracks(n: usize, bitspace: f64) -> Vec<TrackState> {
        (0..n)
            .map(|_| {
                TrackState::new(
                    PeakDetector::new(3, 1e-7),
                    ClockAverager::new(ClockStrategy::Exponential { alpha: 0.25 }, bitspace),
                    AgcController::new(AgcStrategy::Exponential { alpha: 0.5 }, 1, 35),
                )
            })
            .collect()
    }

    fn default_params() -> ParameterSet {
        tape_core::params::ParameterStore::with_defaults(tape_core::units::Format::Pe).active().clone()
    }

    #[test]
    fn preamble_then_data_bit_is_recorded() {
        let mut decoder = PeDecoder::new(1, true);
        let roles = vec![TrackRole::Data(0)];
        decoder.reset(&default_params(), &roles);
        let mut tracks = make_tracks(1, 12.5e-6);

        let bitspace = 12.5e-6;
        let mut time = 0.0;
        // A long run of identical bits produces a clock/data edge pair every half bit-cell;
        // that alone never trips the missed-clock check, so the preamble never completes on
        // its own from evenly-spaced edges.
        for _ in 0..36 {
            time += bitspace / 2.0;
            decoder.on_top(&mut tracks, 0, time, 1.0);
        }
        assert_eq!(decoder.tracks[0].state, PeState::Preamble);

        // A full bit-cell gap, with no intervening clock, is what actually signals the
        // preamble's end -- and that same edge doubles as the first real data bit.
        time += bitspace;
        decoder.on_top(&mut tracks, 0, time, 1.0);
        assert_eq!(decoder.tracks[0].state, PeState::Data);
        assert_eq!(decoder.tracks[0].bits, vec![true]);
    }

    #[test]
    fn trim_postamble_removes_trailing_zeros() {
        let mut pt = PeTrack::new();
        pt.push_bit(true, 0.0, false);
        for i in 1..8 {
            // A long enough trailing zero run is what lets the walk stop before it reaches
            // back into real data; the last one is marked faked to check that count too.
            pt.push_bit(false, i as f64, i == 7);
        }

        let faked_removed = PeDecoder::trim_postamble(&mut pt);
        assert_eq!(faked_removed, 1);
        assert_eq!(pt.bits, vec![true, false, false]);
    }

    #[test]
    fn dropout_on_one_track_is_recovered_with_faked_bits_and_correct_parity() {
        // Track 0 holds a constant run of 1-bits with a mid-block dropout: three consecutive
        // peaks were never detected, so the decoder fills them in with copies of the last real
        // bit before resuming. Track 1 stays constant and clean throughout, so -- since the
        // faked bits happen to repeat the correct value -- every reconstructed word still
        // carries even parity.
        let mut track0 = PeTrack::new();
        for i in 0..24 {
            let faked = (10..13).contains(&i);
            track0.push_bit(true, i as f64, faked);
        }
        for i in 24..30 {
            track0.push_bit(false, i as f64, false);
        }

        let mut track1 = PeTrack::new();
        for i in 0..24 {
            track1.push_bit(true, i as f64, false);
        }
        for i in 24..30 {
            track1.push_bit(false, i as f64, false);
        }

        let mut decoder = PeDecoder::new(2, false);
        decoder.tracks[0] = track0;
        decoder.tracks[1] = track1;
        let mut tracks = make_tracks(2, 12.5e-6);
        let mut block = Block::new(2);

        let result = decoder.end_of_block(&mut tracks, &mut block);

        assert_eq!(result.kind, BlockKind::Block);
        assert_eq!(result.errors.track_mismatch, 0);
        assert_eq!(result.errors.vertical_parity, 0);
        assert_eq!(result.warnings.faked_bits, 3);
        assert_eq!(block.len(), 25);
    }

    #[test]
    fn empty_block_reports_none() {
        let mut decoder = PeDecoder::new(2, true);
        decoder.reset(&default_params(), &[TrackRole::Data(0), TrackRole::Parity]);
        let mut tracks = make_tracks(2, 12.5e-6);
        let mut block = Block::new(2);
        let result = decoder.end_of_block(&mut tracks, &mut block);
        assert_eq!(result.kind, BlockKind::None);
    }
}
