//! The pluggable parser contract and its backends.

pub mod arrow_backend;
pub mod fpga;

use crate::buffer::JsonBuffer;
use arrow_schema::SchemaRef;
use bolson_types::{Result, SeqRange};
use std::sync::Arc;

/// An Arrow record batch together with the sequence range of the JSON
/// documents that produced it.
#[derive(Clone)]
pub struct ParsedBatch {
    pub batch: arrow::record_batch::RecordBatch,
    pub seq_range: SeqRange,
}

impl ParsedBatch {
    pub fn new(batch: arrow::record_batch::RecordBatch, seq_range: SeqRange) -> Self {
        debug_assert_eq!(batch.num_rows() as u64, seq_range.len());
        ParsedBatch { batch, seq_range }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

/// Identifies which parser implementation a [`PipelineOptions::parser`]
/// selects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Impl {
    /// The CPU backend built on Arrow's own JSON parser.
    Arrow,
    /// The FPGA backend for the battery-status schema.
    OpaeBattery,
    /// The FPGA backend for the trip-report schema.
    OpaeTrip,
}

impl std::fmt::Display for Impl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Impl::Arrow => "arrow",
            Impl::OpaeBattery => "fpga-battery",
            Impl::OpaeTrip => "fpga-trip",
        };
        f.write_str(s)
    }
}

/// Converts the bytes of one or more filled `JsonBuffer`s into Arrow record
/// batches.
///
/// # Contract
/// - Preconditions: every input buffer has `size() > 0` and its bytes are
///   valid newline-terminated JSON documents conforming to
///   [`Parser::input_schema`].
/// - Postcondition: the union of returned batches' `seq_range`s equals the
///   union of the inputs' `seq_range`s; each output batch's `seq_range` is
///   contiguous and drawn from exactly one input buffer.
pub trait Parser: Send + Sync {
    /// Converts each input buffer into one (or, for implementations that
    /// choose to split internally, more) `ParsedBatch`.
    fn parse(&self, inputs: &[&JsonBuffer]) -> Result<Vec<ParsedBatch>>;

    /// The schema this backend expects its input JSON to conform to, if
    /// meaningful (FPGA backends have a fixed, hard-coded schema and still
    /// report it here for introspection, even though callers cannot change
    /// it).
    fn input_schema(&self) -> SchemaRef;

    /// The schema of batches this backend produces.
    fn output_schema(&self) -> SchemaRef;

    /// Advisory number of converter threads this backend parallelizes well
    /// with. The orchestrator clamps the configured thread count to this.
    fn preferred_thread_count(&self) -> usize {
        1
    }

    /// Advisory number of input buffers this backend parallelizes well
    /// with.
    fn preferred_buffer_count(&self) -> usize {
        self.preferred_thread_count()
    }
}

/// Shared handle to a parser backend, as stored by the pipeline
/// orchestrator and handed to each converter thread.
pub type SharedParser = Arc<dyn Parser>;
