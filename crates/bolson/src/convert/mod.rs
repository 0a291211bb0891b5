//! The resize/serialize chain run by each converter thread after a parser
//! backend produces a batch.

pub mod resizer;
pub mod serializer;
pub mod stats;

pub use resizer::resize;
pub use serializer::{empty_message_overhead, initial_max_rows_budget, serialize, IpcMessage};
pub use stats::ConvertStats;

use crate::parse::ParsedBatch;
use arrow_schema::SchemaRef;
use bolson_types::{PipelineError, Result};

/// Resizes `batch` to `max_rows` and serializes every piece, halving
/// `max_rows` and retrying once if any piece still comes back
/// [`PipelineError::IpcTooLarge`] (the orchestrator-level recovery the
/// serializer's own doc comment defers to).
///
/// A second `IpcTooLarge` after the retry propagates, matching the "retry
/// once" recovery rule; a caller that wants unbounded halving can call this
/// again with half the `max_rows` it started with.
pub fn resize_and_serialize(
    batch: ParsedBatch,
    schema: SchemaRef,
    max_rows: usize,
    max_ipc_size: usize,
) -> Result<Vec<IpcMessage>> {
    match try_resize_and_serialize(batch.clone(), schema.clone(), max_rows, max_ipc_size) {
        Ok(msgs) => Ok(msgs),
        Err(PipelineError::IpcTooLarge { .. }) => {
            let halved = (max_rows / 2).max(1);
            log::warn!(
                "IPC message exceeded {max_ipc_size} bytes at max_rows={max_rows}; retrying once with max_rows={halved}"
            );
            try_resize_and_serialize(batch, schema, halved, max_ipc_size)
        }
        Err(e) => Err(e),
    }
}

fn try_resize_and_serialize(
    batch: ParsedBatch,
    schema: SchemaRef,
    max_rows: usize,
    max_ipc_size: usize,
) -> Result<Vec<IpcMessage>> {
    resize(batch, max_rows)
        .into_iter()
        .map(|piece| serialize(schema.clone(), piece, max_ipc_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{StringArray, UInt64Array};
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema};
    use bolson_types::SeqRange;
    use std::sync::Arc;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::UInt64, false)]))
    }

    fn batch_of(n: u64) -> ParsedBatch {
        let array = UInt64Array::from((0..n).collect::<Vec<_>>());
        let batch = RecordBatch::try_new(schema(), vec![Arc::new(array)]).unwrap();
        ParsedBatch::new(batch, SeqRange::new(0, n - 1))
    }

    #[test]
    fn fits_without_retry_when_already_under_cap() {
        let msgs = resize_and_serialize(batch_of(4), schema(), 1000, 1 << 20).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].num_rows, 4);
    }

    /// A schema whose per-row cost is large and predictable (a fixed-length
    /// string), so a cap can be sized to fit one row but not two without
    /// depending on the Arrow IPC writer's exact small-batch byte count.
    fn wide_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("s", DataType::Utf8, false)]))
    }

    fn wide_batch_of(n: u64, row_bytes: usize) -> ParsedBatch {
        let value = "x".repeat(row_bytes);
        let array = StringArray::from(vec![value; n as usize]);
        let batch = RecordBatch::try_new(wide_schema(), vec![Arc::new(array)]).unwrap();
        ParsedBatch::new(batch, SeqRange::new(0, n - 1))
    }

    #[test]
    fn halves_max_rows_once_when_the_first_attempt_is_too_large() {
        let row_bytes = 4096;
        let overhead = empty_message_overhead(wide_schema()).unwrap();
        // Comfortably fits one row of `row_bytes` plus overhead, but two rows
        // (the un-retried attempt at max_rows=2) cannot fit.
        let cap = overhead + row_bytes + 512;
        let msgs = resize_and_serialize(wide_batch_of(2, row_bytes), wide_schema(), 2, cap).unwrap();
        let total: usize = msgs.iter().map(|m| m.num_rows).sum();
        assert_eq!(total, 2);
        assert!(msgs.len() >= 2, "retry should have split into per-row messages");
        assert!(msgs.iter().all(|m| m.bytes.len() <= cap));
    }

    #[test]
    fn propagates_ipc_too_large_when_even_the_retry_does_not_fit() {
        let row_bytes = 4096;
        let overhead = empty_message_overhead(wide_schema()).unwrap();
        // Too small even for a single row, so halving max_rows to 1 cannot
        // help: the retry still exceeds the cap and the error propagates.
        let cap = overhead + row_bytes / 2;
        let err = resize_and_serialize(wide_batch_of(2, row_bytes), wide_schema(), 2, cap).unwrap_err();
        assert!(matches!(err, PipelineError::IpcTooLarge { .. }));
    }
}
