//! The pipeline-wide error hierarchy.
//!
//! Every fallible operation in the pipeline returns [`PipelineError`] so that
//! worker threads can store a single value on their shared status slot and
//! the orchestrator can aggregate them without downcasting.

use std::fmt;
use thiserror::Error;

/// A convenience alias used throughout the `bolson` crates.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The top-level error kind returned by every fallible pipeline operation.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// TCP or filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A schema could not be loaded, or a supplied schema did not match what
    /// a backend expects.
    #[error("schema error: {0}")]
    Schema(String),

    /// Allocator failed to provide a buffer.
    #[error("allocation error: {0}")]
    Alloc(#[from] AllocError),

    /// A parser backend failed to convert JSON bytes into a record batch.
    #[error("parse error: {message} (buffer: {buffer_excerpt:?})")]
    Parse {
        message: String,
        buffer_excerpt: String,
    },

    /// The FPGA platform or an MMIO call failed.
    #[error("device error: {0}")]
    Device(String),

    /// A serialized IPC message exceeded the configured size cap.
    #[error("IPC message of {actual} bytes exceeds the {max} byte cap")]
    IpcTooLarge { actual: usize, max: usize },

    /// An attempt was made to use the IPC queue after shutdown.
    #[error("queue closed")]
    QueueClosed,

    /// The Pulsar client failed to send a message.
    #[error("publish error: {0}")]
    Publish(String),

    /// An FPGA poll loop exceeded its configured timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid CLI flags or configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A batch of per-worker outcomes, at least one of which is an error.
    #[error("{} of {} workers reported an error", .0.iter().filter(|s| s.is_err()).count(), .0.len())]
    Aggregated(Vec<WorkerOutcome>),
}

/// One worker's terminal status, kept so [`PipelineError::Aggregated`] can
/// report which worker failed and how without losing the others' outcomes.
#[derive(Debug)]
pub struct WorkerOutcome {
    pub worker: String,
    pub result: std::result::Result<(), PipelineError>,
}

impl WorkerOutcome {
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

impl fmt::Display for WorkerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(()) => write!(f, "{}: ok", self.worker),
            Err(e) => write!(f, "{}: {}", self.worker, e),
        }
    }
}

/// Errors specific to buffer allocation.
#[derive(Error, Debug)]
pub enum AllocError {
    /// The `FpgaFixed` allocator only ever hands out buffers of its one
    /// configured capacity.
    #[error("requested {requested} bytes but the FPGA-fixed allocator is locked to {fixed} bytes")]
    WrongSize { requested: usize, fixed: usize },

    /// The underlying system allocation call failed.
    #[error("system allocation of {0} bytes failed")]
    OutOfMemory(usize),
}

/// Aggregates a set of per-worker outcomes into a single pipeline-level
/// result. The first non-OK outcome (in worker-start order) becomes the
/// pipeline's outcome, matching the reference implementation's
/// "first non-OK status wins" rule.
pub fn aggregate(outcomes: Vec<WorkerOutcome>) -> Result<()> {
    if outcomes.iter().any(WorkerOutcome::is_err) {
        Err(PipelineError::Aggregated(outcomes))
    } else {
        Ok(())
    }
}
