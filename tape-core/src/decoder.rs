//! The `decoder` module defines the trait every format state machine (C7 PE, C8 NRZI, C9 GCR)
//! implements, letting [`crate::block`] and the orchestrator stay format-agnostic.
//!
//! Shaped after the `try_new` / `decode` / `reset` / `finalize` lifecycle a codec decoder follows
//! in this corpus, adapted to a push-based peak stream rather than a pull-based packet stream:
//! `SampleEngine` feeds individual peak/midbit events in, rather than handing the decoder whole
//! packets to pull from.
//!
//! Per-track [`TrackState`] (peak detector, clock averager, AGC) is owned by the engine and
//! passed explicitly into every call rather than back-referenced from the decoder, so a peak
//! detector never needs to know which decoder is listening to it, avoiding cyclic collaborators.

use crate::block::{Block, DecodeResult};
use crate::params::ParameterSet;
use crate::track::TrackState;
use crate::units::{Seconds, TrackRole, Volts};

/// What the engine should do after feeding one event to a decoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecoderAction {
    /// Keep accumulating; the block is still open.
    Continue,
    /// The decoder has recognized end-of-block (postamble, or enough idle time elapsed).
    /// `SampleEngine` should call [`Decoder::end_of_block`] next.
    EndOfBlock,
}

/// The shared interface `SampleEngine` drives, one event at a time, per track.
pub trait Decoder {
    /// Begins a fresh attempt against (possibly) a new parameter set. Called once per
    /// `(block, parameter_set)` attempt, before any event is fed.
    fn reset(&mut self, params: &ParameterSet, roles: &[TrackRole]);

    /// A top (positive) peak was detected on `track` at `time` with the given peak voltage.
    fn on_top(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: Volts) -> DecoderAction;

    /// A bottom (negative) peak was detected on `track` at `time`.
    fn on_bottom(&mut self, tracks: &mut [TrackState], track: usize, time: Seconds, voltage: Volts) -> DecoderAction;

    /// NRZI only: called at the scheduled midbit time for `track`, whether or not a peak
    /// occurred there. The default no-op suits PE and GCR, which have no separate midbit clock.
    fn on_midbit(&mut self, _tracks: &mut [TrackState], _track: usize, _time: Seconds) -> DecoderAction {
        DecoderAction::Continue
    }

    /// Finalizes the block buffered so far: checks parity/CRC/LRC (or ECC, for GCR), counts
    /// errors and warnings, and classifies the attempt.
    fn end_of_block(&mut self, tracks: &mut [TrackState], block: &mut Block) -> DecodeResult;

    /// Format-specific post-processing applied to an already-classified block before it is
    /// handed to the caller's sink (GCR's 5-bit-group to 4-bit-nibble regrouping; a no-op for PE
    /// and NRZI, which write decoded bits directly).
    fn postprocess(&mut self, _block: &mut Block, _result: &mut DecodeResult) {}

    /// NRZI only: the next time `SampleEngine` should call [`Decoder::on_midbit`], regardless of
    /// whether a peak has occurred. Formats with no shared external clock (PE, GCR) return `None`
    /// and rely entirely on `on_top`/`on_bottom`/idle detection.
    fn next_scheduled_event(&self) -> Option<Seconds> {
        None
    }

    /// PE and GCR only: a track with no peak for `idle_factor() * bitspace_avg` is declared idle
    /// by `SampleEngine`, which calls [`Decoder::end_of_block`] once every track is idle. NRZI
    /// returns `None`: it signals end-of-block itself, from `on_midbit`'s `post_counter` rule.
    fn idle_factor(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agc::{AgcController, AgcStrategy};
    use crate::clock::{ClockAverager, ClockStrategy};
    use crate::peak::PeakDetector;

    struct CountingDecoder {
        tops: u32,
        bottoms: u32,
    }

    fn make_track() -> TrackState {
        TrackState::new(
            PeakDetector::new(3, 1.0),
            ClockAverager::new(ClockStrategy::Constant, 1.0),
            AgcController::new(AgcStrategy::Exponential { alpha: 0.5 }, 1, 3),
        )
    }

    impl Decoder for CountingDecoder {
        fn reset(&mut self, _params: &ParameterSet, _roles: &[TrackRole]) {
            self.tops = 0;
            self.bottoms = 0;
        }

        fn on_top(&mut self, _tracks: &mut [TrackState], _track: usize, _time: Seconds, _voltage: Volts) -> DecoderAction {
            self.tops += 1;
            DecoderAction::Continue
        }

        fn on_bottom(&mut self, _tracks: &mut [TrackState], _track: usize, _time: Seconds, _voltage: Volts) -> DecoderAction {
            self.bottoms += 1;
            DecoderAction::Continue
        }

        fn end_of_block(&mut self, _tracks: &mut [TrackState], _block: &mut Block) -> DecodeResult {
            DecodeResult::new()
        }
    }

    #[test]
    fn default_on_midbit_and_postprocess_are_no_ops() {
        let mut decoder = CountingDecoder { tops: 0, bottoms: 0 };
        let mut tracks = vec![make_track()];
        let action = decoder.on_midbit(&mut tracks, 0, 0.0);
        assert_eq!(action, DecoderAction::Continue);
        let mut block = Block::new(1);
        let mut result = DecodeResult::new();
        decoder.postprocess(&mut block, &mut result);
        assert_eq!(decoder.tops, 0);
        assert_eq!(decoder.bottoms, 0);
    }

    #[test]
    fn events_are_counted_independently() {
        let mut decoder = CountingDecoder { tops: 0, bottoms: 0 };
        let mut tracks = vec![make_track()];
        decoder.on_top(&mut tracks, 0, 0.0, 1.0);
        decoder.on_top(&mut tracks, 0, 1.0, 1.0);
        decoder.on_bottom(&mut tracks, 0, 2.0, -1.0);
        assert_eq!(decoder.tops, 2);
        assert_eq!(decoder.bottoms, 1);
    }
}
