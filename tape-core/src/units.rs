//! The `units` module provides definitions for the physical quantities the core reasons about.

/// A point in time since the start of the capture, in seconds.
pub type Seconds = f64;

/// A signed or unsigned span of time, in seconds.
pub type Duration = f64;

/// A head voltage reading, in volts.
pub type Volts = f32;

/// The three recording formats the core can decode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// Phase encoding, nominal 1600 BPI, self-clocking Manchester.
    Pe,
    /// Non-return-to-zero-inverted, 200/556/800 BPI, externally clocked.
    Nrzi,
    /// Group-coded recording, nominal 6250 BPI (9042 flux density), 5-of-4 group code.
    Gcr,
}

/// The standard densities recognized by [`crate::density::DensityEstimator`], in bits per inch.
pub const STANDARD_DENSITIES_BPI: &[f64] = &[200.0, 556.0, 800.0, 1600.0, 9042.0];

/// What a physical channel represents once permuted into logical track order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrackRole {
    /// A data track, numbered 0..8 as printed on the head.
    Data(u8),
    /// The parity track ("P" in the track order string).
    Parity,
}
