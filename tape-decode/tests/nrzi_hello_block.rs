//! Scenario: NRZI, 800 BPI, 50 IPS, 9-track, a perfect "HELLO" block.

mod support;

use tape_core::checksum::{parity_bit, Crc9, Lrc};
use tape_decode::{BlockKind, BlockOrchestrator, EngineConfig, Format};

use support::{render_nrzi_words, RecordingSink, VecSource};

const BIT_CELL: f64 = 25e-6; // 800 BPI * 50 IPS
const SAMPLE_DT: f64 = 2.5e-6; // 10 samples per bit cell

/// Composes the 9-bit channel word for one EBCDIC data byte: bits 0..7 are the byte's bits,
/// bit 8 is whichever parity value makes the whole word odd (the decoder's configured
/// `expected_parity`).
fn word_with_odd_parity(byte: u8) -> u16 {
    let parity = if byte.count_ones() % 2 == 0 { 1u16 } else { 0u16 };
    (byte as u16) | (parity << 8)
}

#[test]
fn hello_message_decodes_as_a_clean_block() {
    let data: [u8; 5] = [0xC8, 0xC5, 0xD3, 0xD3, 0xD6]; // EBCDIC "HELLO"
    let data_words: Vec<u16> = data.iter().map(|&b| word_with_odd_parity(b)).collect();

    let mut crc = Crc9::new();
    let mut lrc = Lrc::new();
    for &word in &data_words {
        crc.update(word);
        lrc.update(word);
    }
    let crc_word = crc.finish();
    let lrc_word = lrc.finish() ^ crc_word;

    let mut words = data_words.clone();
    words.push(crc_word);
    words.push(lrc_word);

    let samples = render_nrzi_words(&words, 9, BIT_CELL, SAMPLE_DT, 15);

    let mut config = EngineConfig::new(Format::Nrzi, 9, 50.0);
    config.bpi = 800.0;
    config.sample_dt = Some(SAMPLE_DT);

    let mut orchestrator = BlockOrchestrator::new(config);
    let mut source = VecSource::new(samples);
    let mut sink = RecordingSink::default();

    let produced = orchestrator.decode_next(&mut source, &mut sink).unwrap();
    assert!(produced);
    assert_eq!(sink.blocks.len(), 1);

    let (bytes, kind, metadata) = &sink.blocks[0];
    assert_eq!(*kind, BlockKind::Block);
    assert_eq!(bytes, &data);
    assert_eq!(metadata.errcount(), 0);
    assert_eq!(metadata.warncount(), 0);

    for (&byte, &parity) in data.iter().zip(&metadata.parity) {
        assert_eq!(parity, parity_bit(byte as u32) == 0);
    }
}
