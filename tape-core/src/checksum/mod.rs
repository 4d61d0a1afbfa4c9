//! The `checksum` module provides the error-detecting codes the NRZI and GCR decoders verify
//! blocks against.

mod crc9;
mod lrc;
mod parity;

pub use crc9::Crc9;
pub use lrc::Lrc;
pub use parity::{is_odd_parity, parity_bit};
