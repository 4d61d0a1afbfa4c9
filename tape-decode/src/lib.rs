//! `tape-decode` is the facade crate: it wires the PE/NRZI/GCR decoders (`tape-codec-pe`,
//! `tape-codec-nrzi`, `tape-codec-gcr`) behind [`engine::SampleEngine`] and [`orchestrator::BlockOrchestrator`]
//! so a caller only has to supply an [`config::EngineConfig`], a [`tape_core::io::SampleSource`],
//! and a [`sink::BlockSink`].
//!
//! Reading capture files, writing decoded output, and a command-line front end are all out of
//! scope here — exactly the seam `tape-core`'s [`tape_core::io::SampleSource`] and this crate's
//! [`sink::BlockSink`] are drawn at.
//!
//! ```no_run
//! use tape_core::units::Format;
//! use tape_decode::config::EngineConfig;
//! use tape_decode::orchestrator::BlockOrchestrator;
//!
//! # fn run(mut source: impl tape_core::io::SampleSource, mut sink: impl tape_decode::sink::BlockSink) -> tape_core::Result<()> {
//! let config = EngineConfig::new(Format::Nrzi, 9, 50.0);
//! let mut orchestrator = BlockOrchestrator::new(config);
//! orchestrator.calibrate(&mut source)?;
//! while orchestrator.decode_next(&mut source, &mut sink)? {}
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations)]

mod bytes;
mod decoders;

pub mod config;
pub mod engine;
pub mod orchestrator;
pub mod sink;

pub use config::EngineConfig;
pub use engine::SampleEngine;
pub use orchestrator::BlockOrchestrator;
pub use sink::{BlockMetadata, BlockSink};

pub use tape_core::block::BlockKind;
pub use tape_core::io::{NextSample, Position, SampleSource};
pub use tape_core::sample::{Sample, TrackOrder};
pub use tape_core::units::{Format, TrackRole};
pub use tape_core::{Result, TapeError};
