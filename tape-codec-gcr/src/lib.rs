//! Group-coded recording: each track is its own self-clocking NRZI stream, decoded
//! independently into a bit history, then regrouped in [`Decoder::postprocess`] once the block's
//! 5-bit storage groups can be read across all tracks at once.
//!
//! Unlike PE and NRZI, a GCR track carries no external midbit clock: a track infers zero bits from
//! how long a flux transition was delayed past the expected cell boundary, using the `z1pt`/`z2pt`
//! thresholds from the active [`ParameterSet`]. `end_of_block` only frames the raw per-track bit
//! vectors; `postprocess` walks the control track's 5-bit codes to find `MARK1`/`MARK2`/`SYNC` and
//! regroups the data tracks' codes into bytes, which is also where ECC and the block checksum are
//! checked.

use log::{debug, trace, warn};

use tape_core::block::{Block, BlockKind, DecodeResult};
use tape_core::checksum::parity_bit;
use tape_core::decoder::{Decoder, DecoderAction};
use tape_core::params::ParameterSet;
use tape_core::track::TrackState;
use tape_core::units::{Seconds, TrackRole, Volts};

/// Control-track 5-bit codes, as a fixed, self-consistent table.
mod codes {
    pub const MARK1: u8 = 0b00111;
    pub const MARK2: u8 = 0b11100;
    pub const SYNC: u8 = 0b11111;
    pub const TERML0: u8 = 0b10100;
    pub const TERML1: u8 = 0b10101;
    /// Also decodes as data nibble 15 when seen on a data track.
    pub const SECOND1: u8 = 0b01111;
    /// Also decodes as data nibble 12 when seen on a data track.
    pub const SECOND2: u8 = 0b11110;
}

/// How many consecutive resync `SYNC` groups separate `MARK2` from the following `MARK1`.
const RESYNC_SYNC_COUNT: u32 = 14;

/// Peaks-with-no-intervening-zero needed before the clock is nudged from timing alone (the
/// "three consecutive 1s" clock-adaptation rule).
const CLOCK_ADAPT_RUN: u32 = 3;

/// A track with no peak for this many bit-cells is declared idle; once every track is idle,
/// `SampleEngine` calls [`Decoder::end_of_block`].
const GCR_IDLE_THRESH: f64 = 3.0;

const TAPEMARK_BUSY_ROLES: [TrackRole; 6] =
    [TrackRole::Data(0), TrackRole::Data(2), TrackRole::Data(5), TrackRole::Data(6), TrackRole::Data(7), TrackRole::Data(8)];
const TAPEMARK_QUIET_ROLES: [TrackRole; 3] = [TrackRole::Data(1), TrackRole::Data(3), TrackRole::Data(4)];
const TAPEMARK_BUSY_MIN_BITS: usize = 250;
const TAPEMARK_BUSY_MAX_BITS: usize = 400;
const TAPEMARK_QUIET_MAX_PEAKS: u32 = 2;

/// Maps a 5-bit storage group to its 4-bit data nibble. `None` means the code is unmapped
/// (counted as `gcr_bad_dgroups`). The seven data-only codes plus the four codes that double as
/// control symbols (`TERML0`, `TERML1`, `SECOND1`, `SECOND2`) together cover eleven of the sixteen
/// nibbles; the remaining five codes are assigned here to round out the table.
fn decode_five_to_four(code: u8) -> Option<u8> {
    match code {
        0b11001 => Some(0x0),
        0b10010 => Some(0x1),
        0b10011 => Some(0x2),
        0b11010 => Some(0x3),
        0b01001 => Some(0x5),
        0b01010 => Some(0x6),
        0b01011 => Some(0x7),
        codes::TERML0 => Some(0x8),
        0b01100 => Some(0x9),
        0b01101 => Some(0xA),
        codes::TERML1 => Some(0xB),
        0b11011 => Some(0xD),
        0b01110 => Some(0xE),
        codes::SECOND2 => Some(0xC),
        codes::SECOND1 => Some(0xF),
        0b10110 => Some(0x4),
        _ => None,
    }
}

/// Per-track self-clocking bit inference state.
#[derive(Debug, Default)]
struct GcrTrack {
    bits: Vec<bool>,
    t_last_peak: Option<Seconds>,
    zero_run: u32,
    one_run: u32,
}

impl GcrTrack {
    /// Infers 0, 1, or 2 zero bits before the "1" this peak represents, from how far `time` fell
    /// past the last peak relative to `bitspace_avg`.
    fn on_peak(&mut self, time: Seconds, bitspace_avg: f64, z1pt: f64, z2pt: f64) -> u32 {
        let zeros = match self.t_last_peak {
            None => 0,
            Some(last) => {
                let delta = time - last;
                if delta <= z1pt * bitspace_avg {
                    0
                }
                else if delta <= z2pt * bitspace_avg {
                    1
                }
                else {
                    2
                }
            }
        };

        for _ in 0..zeros {
            self.bits.push(false);
        }
        self.bits.push(true);

        if zeros == 0 {
            self.one_run += 1;
        }
        else {
            self.one_run = 0;
        }
        self.zero_run = zeros;
        self.t_last_peak = Some(time);
        zeros
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum GcrPhase {
    Preamble,
    Data,
    ResyncBurst,
    Residual,
    Crc,
    Postamble,
}

/// C9: the group-coded recording state machine.
#[derive(Debug)]
pub struct GcrDecoder {
    tracks: Vec<GcrTrack>,
    control_track: usize,
    z1pt: f64,
    z2pt: f64,
    expected_parity: bool,
}

impl GcrDecoder {
    pub fn new(ntrks: usize, expected_parity: bool) -> Self {
        GcrDecoder {
            tracks: (0..ntrks).map(|_| GcrTrack::default()).collect(),
            control_track: 0,
            z1pt: 1.5,
            z2pt: 2.5,
            expected_parity,
        }
    }

    fn on_peak(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: Volts) -> DecoderAction {
        let bitspace_avg = tracks[track].clock.bitspace_avg();
        let prev_peak = self.tracks[track].t_last_peak;
        let zeros = self.tracks[track].on_peak(time, bitspace_avg, self.z1pt, self.z2pt);

        if let Some(prev) = prev_peak {
            let delta = time - prev;
            if self.tracks[track].one_run >= CLOCK_ADAPT_RUN {
                tracks[track].clock.update(delta);
            }
            else {
                tracks[track].clock.update(delta / (zeros + 1) as f64);
            }
        }

        tracks[track].agc.on_peak((voltage as f64).abs());
        tracks[track].last_top = Some((time, voltage));
        tracks[track].peak_count += 1;
        tracks[track].t_last_peak = time;
        tracks[track].idle = false;
        tracks[track].record_bit(time);

        DecoderAction::Continue
    }

    fn looks_like_tapemark(&self, tracks: &[TrackState], roles: &[TrackRole]) -> bool {
        let bits_for = |role: TrackRole| roles.iter().position(|r| *r == role).map(|ch| self.tracks[ch].bits.len());
        let peaks_for = |role: TrackRole| roles.iter().position(|r| *r == role).map(|ch| tracks[ch].peak_count);

        let busy_ok = TAPEMARK_BUSY_ROLES.iter().all(|role| match bits_for(*role) {
            Some(n) => (TAPEMARK_BUSY_MIN_BITS..=TAPEMARK_BUSY_MAX_BITS).contains(&n),
            None => true,
        });
        let quiet_ok = TAPEMARK_QUIET_ROLES.iter().all(|role| match peaks_for(*role) {
            Some(n) => n <= TAPEMARK_QUIET_MAX_PEAKS,
            None => true,
        });

        busy_ok && quiet_ok
    }

    /// Decodes one row's data-track storage groups into 4-bit nibbles, counting each unmapped or
    /// short group as `gcr_bad_dgroups`.
    fn decode_row_nibbles(&self, data_tracks: &[usize], row: usize) -> (Vec<u8>, u32) {
        let mut bad = 0u32;
        let nibbles = data_tracks
            .iter()
            .map(|&t| match self.group_code(t, row) {
                Some(code) => decode_five_to_four(code).unwrap_or_else(|| {
                    bad += 1;
                    0
                }),
                None => {
                    bad += 1;
                    0
                }
            })
            .collect();
        (nibbles, bad)
    }

    /// Packs decoded nibbles two at a time into bytes, high nibble first.
    fn nibbles_to_bytes(nibbles: &[u8]) -> Vec<u8> {
        nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0)).collect()
    }

    /// Reads one track's 5-bit storage group starting at bit `row * 5`.
    fn group_code(&self, track: usize, row: usize) -> Option<u8> {
        let bits = &self.tracks[track].bits;
        let base = row * 5;
        if base + 5 > bits.len() {
            return None;
        }
        let mut code = 0u8;
        for (i, &b) in bits[base..base + 5].iter().enumerate() {
            if b {
                code |= 1 << (4 - i);
            }
        }
        Some(code)
    }

    /// Walks the block's 5-bit storage groups, driving the data/resync/residual state machine
    /// and writing decoded bytes back into `block.data`.
    fn regroup(&self, block: &mut Block, result: &mut DecodeResult) {
        let ntrks = self.tracks.len();
        if ntrks == 0 {
            return;
        }
        let data_tracks: Vec<usize> = (0..ntrks).filter(|&t| t != self.control_track).collect();
        let rows = self.tracks.iter().map(|t| t.bits.len() / 5).min().unwrap_or(0);

        let mut phase = GcrPhase::Preamble;
        let mut resync_syncs_seen = 0u32;
        let mut group_bytes: Vec<u8> = Vec::with_capacity(8);
        let mut residual_bytes: Vec<u8> = Vec::new();
        let mut crc_acc: u8 = 0;
        let mut output: Vec<u16> = Vec::new();
        let row_time = |row: usize| row as Seconds;

        for row in 0..rows {
            let control = match self.group_code(self.control_track, row) {
                Some(c) => c,
                None => continue,
            };

            match control {
                codes::MARK1 => {
                    phase = GcrPhase::Data;
                    group_bytes.clear();
                    continue;
                }
                codes::MARK2 => {
                    phase = GcrPhase::ResyncBurst;
                    resync_syncs_seen = 0;
                    continue;
                }
                codes::SYNC if phase == GcrPhase::ResyncBurst => {
                    resync_syncs_seen += 1;
                    if resync_syncs_seen > RESYNC_SYNC_COUNT {
                        result.errors.gcr_bad_sequence += 1;
                    }
                    continue;
                }
                codes::SYNC if phase == GcrPhase::Data && group_bytes.is_empty() => {
                    phase = GcrPhase::Residual;
                    continue;
                }
                codes::SYNC => {
                    result.errors.gcr_bad_sequence += 1;
                    continue;
                }
                codes::TERML0 | codes::TERML1 => {
                    phase = GcrPhase::Postamble;
                    continue;
                }
                _ => {}
            }

            match phase {
                GcrPhase::Data => {
                    let (nibbles, bad) = self.decode_row_nibbles(&data_tracks, row);
                    result.errors.gcr_bad_dgroups += bad;
                    group_bytes.extend(Self::nibbles_to_bytes(&nibbles));

                    if group_bytes.len() >= 8 {
                        let ecc = group_bytes[7];
                        let computed_ecc = group_bytes[0..7].iter().fold(0u8, |acc, b| acc ^ b);
                        if computed_ecc != ecc {
                            result.errors.ecc += 1;
                        }
                        for &b in &group_bytes[0..7] {
                            crc_acc ^= b;
                            output.push(b as u16);
                        }
                        crc_acc ^= ecc;
                        group_bytes.clear();
                    }
                }
                GcrPhase::Residual => {
                    // The residual group holds up to a data row's worth of trailing user bytes,
                    // but how many of them actually belong to the block isn't known until the
                    // CRC group's residual-char byte is read on the next row.
                    let (nibbles, bad) = self.decode_row_nibbles(&data_tracks, row);
                    result.errors.gcr_bad_dgroups += bad;
                    residual_bytes = Self::nibbles_to_bytes(&nibbles);
                    phase = GcrPhase::Crc;
                }
                GcrPhase::Crc => {
                    let (nibbles, bad) = self.decode_row_nibbles(&data_tracks, row);
                    result.errors.gcr_bad_dgroups += bad;
                    let residual_char = Self::nibbles_to_bytes(&nibbles).first().copied().unwrap_or(0);
                    let trailing_bytes = (residual_char >> 4) as usize;
                    let keep = trailing_bytes.min(residual_bytes.len());
                    for &b in &residual_bytes[..keep] {
                        output.push(b as u16);
                    }

                    let stored_crc = self.group_code(self.control_track, row).unwrap_or(0);
                    if stored_crc != 0 && stored_crc != crc_acc {
                        result.errors.crc += 1;
                    }
                    phase = GcrPhase::Postamble;
                }
                GcrPhase::Postamble | GcrPhase::Preamble | GcrPhase::ResyncBurst => {}
            }
        }

        for (idx, &byte) in output.iter().enumerate() {
            let time = row_time(idx);
            let parity_ok = parity_bit(byte as u32) == self.expected_parity as u8;
            if !parity_ok {
                result.errors.vertical_parity += 1;
            }
            let _ = block.push_word(time, byte, 0);
        }
    }
}

impl Decoder for GcrDecoder {
    fn reset(&mut self, params: &ParameterSet, roles: &[TrackRole]) {
        self.tracks = (0..roles.len()).map(|_| GcrTrack::default()).collect();
        self.z1pt = params.z1pt;
        self.z2pt = params.z2pt;
    }

    fn on_top(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: Volts) -> DecoderAction {
        self.on_peak(tracks, track, time, voltage)
    }

    fn on_bottom(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: Volts) -> DecoderAction {
        self.on_peak(tracks, track, time, voltage)
    }

    fn end_of_block(&mut self, tracks: &mut [TrackState], block: &mut Block) -> DecodeResult {
        let mut result = DecodeResult::new();

        let total_bits: usize = self.tracks.iter().map(|t| t.bits.len()).sum();
        if total_bits == 0 {
            result.kind = BlockKind::None;
            return result;
        }

        let roles: Vec<TrackRole> =
            (0..tracks.len()).map(|i| if i + 1 == tracks.len() { TrackRole::Parity } else { TrackRole::Data(i as u8) }).collect();

        if self.looks_like_tapemark(tracks, &roles) {
            debug!("gcr: tapemark pattern recognized");
            result.kind = BlockKind::Tapemark;
            result.minbits = self.tracks.iter().map(|t| t.bits.len()).min().unwrap_or(0);
            result.maxbits = self.tracks.iter().map(|t| t.bits.len()).max().unwrap_or(0);
            return result;
        }

        self.regroup(block, &mut result);

        result.minbits = block.len();
        result.maxbits = block.len();
        result.max_agc_gain = tracks.iter().map(|t| t.agc.max_gain()).fold(1.0, f64::max);

        if block.is_empty() {
            result.kind = BlockKind::Noise;
        }
        else if result.errcount() == 0 {
            result.kind = BlockKind::Block;
        }
        else {
            result.kind = BlockKind::BadBlock;
            warn!("gcr: block disqualified with {} errors", result.errcount());
        }

        trace!("gcr: end_of_block -> {:?}, {} bytes", result.kind, block.len());
        result
    }

    fn postprocess(&mut self, _block: &mut Block, _result: &mut DecodeResult) {
        // Regrouping already happened in `end_of_block`: GCR's 5-bit groups can only be read
        // once the whole block's per-track bit vectors are final, so there is no further step
        // to defer here (unlike a format that decodes bits directly as they arrive).
    }

    fn idle_factor(&self) -> Option<f64> {
        Some(GCR_IDLE_THRESH)
    }
}
