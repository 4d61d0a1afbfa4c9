//! Scenario: NRZI tapemark recognition. A tapemark is the literal
//! 9-track byte pattern `0x26, 0x00, 0x26` (the middle byte transitions on no track at all,
//! which is indistinguishable from a silent bit cell — `NrziDecoder` relies on the two
//! surrounding `0x26` cells to tell a real zero byte from the run of trailing silence that ends
//! the block).

mod support;

use tape_decode::{BlockOrchestrator, EngineConfig, Format};

use support::{render_nrzi_words, RecordingSink, VecSource};

const BIT_CELL: f64 = 25e-6;
const SAMPLE_DT: f64 = 2.5e-6;

#[test]
fn tapemark_pattern_is_reported_and_no_block_is_emitted() {
    let words = [0x26u16, 0x00, 0x26];
    let samples = render_nrzi_words(&words, 9, BIT_CELL, SAMPLE_DT, 15);

    let mut config = EngineConfig::new(Format::Nrzi, 9, 50.0);
    config.bpi = 800.0;
    config.sample_dt = Some(SAMPLE_DT);

    let mut orchestrator = BlockOrchestrator::new(config);
    let mut source = VecSource::new(samples);
    let mut sink = RecordingSink::default();

    let produced = orchestrator.decode_next(&mut source, &mut sink).unwrap();
    assert!(produced);
    assert_eq!(sink.tapemarks, 1);
    assert!(sink.blocks.is_empty());
    assert_eq!(sink.noise, 0);
}
