//! Shared configuration, error, and latency-slot types for the `bolson`
//! JSON-to-Arrow-to-Pulsar pipeline.
//!
//! This crate has no Arrow dependency so it can be pulled in by both the
//! core engine and the CLI without pulling in the Arrow toolchain twice.

pub mod config;
pub mod error;
pub mod latency;

pub use config::{
    AllocatorKind, BatchingOptions, BufferOptions, ConvertOptions, FpgaOptions,
    IngestOptions, LatencyOptions, ParserKind, PipelineOptions, PublishOptions,
};
pub use error::{aggregate, AllocError, PipelineError, Result, WorkerOutcome};
pub use latency::TimeSlot;

/// The inclusive range of global sequence numbers carried by a buffer,
/// batch, or IPC message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SeqRange {
    pub first: u64,
    pub last: u64,
}

impl SeqRange {
    pub fn new(first: u64, last: u64) -> Self {
        assert!(last >= first, "seq_range must be non-empty: {first}..={last}");
        SeqRange { first, last }
    }

    /// Number of sequence numbers covered, inclusive on both ends.
    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Always `false`: `SeqRange` cannot represent an empty range.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Splits this range into two contiguous ranges at `offset` records
    /// from the start, where `offset` is in `1..self.len()`.
    pub fn split_at(&self, offset: u64) -> (SeqRange, SeqRange) {
        assert!(offset > 0 && offset < self.len());
        let mid = self.first + offset;
        (
            SeqRange::new(self.first, mid - 1),
            SeqRange::new(mid, self.last),
        )
    }
}
