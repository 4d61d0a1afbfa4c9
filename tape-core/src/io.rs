//! The `io` module defines the narrow interface the core uses to pull samples from, and rewind,
//! a caller-owned source. Reading CSV/TBIN files is explicitly out of scope; the core
//! only ever sees already-parsed [`crate::sample::Sample`] values.

use crate::sample::Sample;

/// An opaque token identifying a position in the sample source, returned by
/// [`SampleSource::save_position`] and accepted by [`SampleSource::restore_position`].
///
/// The core treats this as opaque; only the sample source implementation knows what it encodes
/// (a byte offset, a record index, ...).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Position(pub u64);

/// The result of asking a [`SampleSource`] for its next sample.
#[derive(Debug)]
pub enum NextSample {
    Sample(Sample),
    EndOfStream,
}

/// A rewindable source of samples, supplied by the caller.
///
/// `save_position`/`restore_position` are required only when multi-try re-decoding or the
/// density/skew calibration pre-passes are enabled; a source that cannot rewind may
/// still be used for a single pass, as long as those features stay off.
pub trait SampleSource {
    fn read_sample(&mut self) -> NextSample;

    /// Records the current read position so it can be restored later. Implementations that
    /// cannot seek may return `None`.
    fn save_position(&mut self) -> Option<Position>;

    /// Rewinds to a previously saved position.
    fn restore_position(&mut self, pos: Position);
}
