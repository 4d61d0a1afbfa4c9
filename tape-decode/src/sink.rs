//! The `sink` module defines the block sink interface, the callback boundary between the core
//! and the caller's (out-of-scope) `.tap`/per-file writers.

use tape_core::block::{BlockKind, ErrorCounts, WarningCounts};
use tape_core::units::Seconds;

/// Everything [`crate::orchestrator::BlockOrchestrator`] reports alongside a decoded block's
/// bytes, passed to `on_block`.
#[derive(Clone, Debug)]
pub struct BlockMetadata {
    pub minbits: usize,
    pub maxbits: usize,
    pub errors: ErrorCounts,
    pub warnings: WarningCounts,
    pub avg_bit_spacing: Seconds,
    pub max_agc_gain: f64,
    /// Per-byte parity bit, parallel to the decoded byte slice `on_block` receives.
    pub parity: Vec<bool>,
    /// The name of the parameter set that produced this decoding.
    pub parmset: String,
    /// How many parameter sets were attempted before this one was chosen.
    pub tries: u32,
}

impl BlockMetadata {
    pub fn errcount(&self) -> u32 {
        self.errors.total()
    }

    pub fn warncount(&self) -> u32 {
        self.warnings.total()
    }
}

/// The callback boundary the core emits decoded blocks through. Implemented by the (out-of-scope)
/// caller-side writers: a `.tap` encoder, a per-file binary dump, an interpreted text dump, ...
pub trait BlockSink {
    fn on_tapemark(&mut self);

    /// `bytes` are already parity-stripped; `kind` is `Block` or `BadBlock` (never `Tapemark`,
    /// `Noise`, or `None`, which have their own callbacks or are not emitted at all).
    fn on_block(&mut self, bytes: &[u8], kind: BlockKind, metadata: &BlockMetadata);

    /// Called when the best available attempt still classified as pure noise. The default is a
    /// no-op: most callers only care about framed blocks and tapemarks.
    fn on_noise(&mut self) {}
}
