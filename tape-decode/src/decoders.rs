//! The `decoders` module is the one place that knows all three concrete [`Decoder`] types: rather
//! than dispatching on a format tag at every call site, it builds the right concrete decoder once
//! and hands back a trait object the engine drives uniformly.

use tape_codec_gcr::GcrDecoder;
use tape_codec_nrzi::NrziDecoder;
use tape_codec_pe::PeDecoder;
use tape_core::decoder::Decoder;
use tape_core::units::Format;

/// Builds a fresh decoder for `format`. `initial_bitspace` seeds the NRZI shared clock before
/// any transition has been observed; PE and GCR track clocks per-track instead and ignore it.
pub fn new_decoder(format: Format, ntrks: usize, expected_parity: bool, initial_bitspace: f64) -> Box<dyn Decoder> {
    match format {
        Format::Pe => Box::new(PeDecoder::new(ntrks, expected_parity)),
        Format::Nrzi => {
            let nine_track = ntrks >= 9;
            Box::new(NrziDecoder::new(ntrks, nine_track, expected_parity, initial_bitspace))
        }
        Format::Gcr => Box::new(GcrDecoder::new(ntrks, expected_parity)),
    }
}
