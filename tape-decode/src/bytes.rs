//! The `bytes` module converts a finished [`Block`]'s internal word representation into the byte
//! sequence and per-byte parity bits a [`crate::sink::BlockSink`] receives.
//!
//! PE and NRZI words are channel-bit compositions (bit *c* of word *k* is channel *c*'s bit *k*);
//! GCR's [`postprocess`](tape_core::decoder::Decoder::postprocess) step already regroups those
//! into final data bytes in place, so GCR words need no further channel-to-track remapping.

use tape_core::block::Block;
use tape_core::checksum::parity_bit;
use tape_core::sample::TrackOrder;
use tape_core::units::{Format, TrackRole};

/// Reassembles one channel-bit-composed word into its 8-bit data value and parity bit, using
/// `order` to learn which channel carries which logical track.
fn assemble_channel_word(word: u16, order: &TrackOrder) -> (u8, bool) {
    let mut byte = 0u8;
    let mut parity = false;
    for channel in 0..order.ntrks() {
        let bit = (word >> channel) & 1 != 0;
        match order.role(channel) {
            TrackRole::Data(track) if track < 8 => {
                if bit {
                    byte |= 1 << track;
                }
            }
            TrackRole::Data(_) => {}
            TrackRole::Parity => parity = bit,
        }
    }
    (byte, parity)
}

/// Converts every word in `block` into a data byte and its parity bit, per `format`'s word
/// representation.
pub fn assemble_bytes(block: &Block, format: Format, order: &TrackOrder) -> (Vec<u8>, Vec<bool>) {
    let mut bytes = Vec::with_capacity(block.len());
    let mut parity = Vec::with_capacity(block.len());

    for idx in 0..block.len() {
        let word = block.word(idx);
        let (byte, p) = match format {
            Format::Pe | Format::Nrzi => assemble_channel_word(word, order),
            Format::Gcr => (word as u8, parity_bit(word as u32) == 1),
        };
        bytes.push(byte);
        parity.push(p);
    }

    (bytes, parity)
}
