//! Scenario: recording density inferred from transition timing alone.
//! `BlockOrchestrator::calibrate` runs a density pre-pass whenever `EngineConfig::bpi` is left at
//! its `0.0` sentinel, then rewinds the source so the first real `decode_next` starts from
//! sample zero.

mod support;

use tape_decode::{BlockOrchestrator, EngineConfig, Format, NextSample, SampleSource};

use support::{render_periodic_pulses, VecSource};

const BIT_CELL: f64 = 25e-6; // 800 BPI * 50 IPS
const SAMPLE_DT: f64 = 2.5e-6;

#[test]
fn ten_thousand_periodic_transitions_resolve_to_800_bpi() {
    let samples = render_periodic_pulses(10_001, BIT_CELL, SAMPLE_DT);

    let mut config = EngineConfig::new(Format::Nrzi, 1, 50.0);
    config.sample_dt = Some(SAMPLE_DT);
    assert_eq!(config.bpi, 0.0);

    let mut orchestrator = BlockOrchestrator::new(config);
    let mut source = VecSource::new(samples);

    orchestrator.calibrate(&mut source).unwrap();

    assert_eq!(orchestrator.config().bpi, 800.0);
}

#[test]
fn too_few_transitions_before_end_of_stream_is_an_error() {
    let samples = render_periodic_pulses(50, BIT_CELL, SAMPLE_DT);

    let mut config = EngineConfig::new(Format::Nrzi, 1, 50.0);
    config.sample_dt = Some(SAMPLE_DT);

    let mut orchestrator = BlockOrchestrator::new(config);
    let mut source = VecSource::new(samples);

    assert!(orchestrator.calibrate(&mut source).is_err());
}

#[test]
fn calibrate_rewinds_the_source_to_its_starting_position() {
    let samples = render_periodic_pulses(10_001, BIT_CELL, SAMPLE_DT);
    let total = samples.len();

    let mut config = EngineConfig::new(Format::Nrzi, 1, 50.0);
    config.sample_dt = Some(SAMPLE_DT);

    let mut orchestrator = BlockOrchestrator::new(config);
    let mut source = VecSource::new(samples);

    orchestrator.calibrate(&mut source).unwrap();

    let mut read = 0usize;
    while !matches!(source.read_sample(), NextSample::EndOfStream) {
        read += 1;
    }
    assert_eq!(read, total);
}
