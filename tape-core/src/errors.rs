//! The `errors` module defines the core's error type.
//!
//! Per-block decode problems (bad CRC, bad parity, an unmappable GCR group, ...) are never
//! represented here: they are fields of [`crate::block::DecodeResult`], recorded and scored by
//! the orchestrator, and the block is still emitted. `TapeError` is reserved for conditions that
//! make continued processing meaningless: the density could not be inferred, a requested track
//! permutation is invalid, the block buffer overflowed, or a parameter file failed to parse.

use std::fmt;

/// Enumerates the fatal conditions the decoding engine can report.
#[derive(Debug)]
pub enum TapeError {
    /// No standard BPI was within `CLOSE_PERCENT` of the estimated bit-cell spacing.
    NonStandardDensity { estimated_bpi: f64 },
    /// The user-supplied track permutation did not name every track and parity exactly once.
    InvalidTrackOrder(String),
    /// A block grew past `MAXBLOCK` bits on some track without reaching end-of-block.
    BlockBufferOverflow { track: usize, bits: usize },
    /// The parameter file could not be parsed, or a named parameter's value was out of range.
    BadParameterFile(String),
    /// The sample source signalled an I/O failure.
    SourceError(String),
}

impl fmt::Display for TapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapeError::NonStandardDensity { estimated_bpi } => {
                write!(f, "non-standard density: estimated {:.1} BPI matches no standard", estimated_bpi)
            }
            TapeError::InvalidTrackOrder(msg) => write!(f, "invalid track order: {msg}"),
            TapeError::BlockBufferOverflow { track, bits } => {
                write!(f, "block buffer overflow on track {track} after {bits} bits")
            }
            TapeError::BadParameterFile(msg) => write!(f, "bad parameter file: {msg}"),
            TapeError::SourceError(msg) => write!(f, "sample source error: {msg}"),
        }
    }
}

impl std::error::Error for TapeError {}

/// The core's `Result` type alias.
pub type Result<T> = std::result::Result<T, TapeError>;

/// Convenience function to create a non-standard-density error.
pub fn density_error<T>(estimated_bpi: f64) -> Result<T> {
    Err(TapeError::NonStandardDensity { estimated_bpi })
}

/// Convenience function to create an invalid-track-order error.
pub fn track_order_error<T>(msg: impl Into<String>) -> Result<T> {
    Err(TapeError::InvalidTrackOrder(msg.into()))
}

/// Convenience function to create a block-buffer-overflow error.
pub fn overflow_error<T>(track: usize, bits: usize) -> Result<T> {
    Err(TapeError::BlockBufferOverflow { track, bits })
}

/// Convenience function to create a bad-parameter-file error.
pub fn param_file_error<T>(msg: impl Into<String>) -> Result<T> {
    Err(TapeError::BadParameterFile(msg.into()))
}
