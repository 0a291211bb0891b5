//! Serializes record batches to Arrow IPC (stream format), enforcing the
//! configured message-size cap.

use crate::parse::ParsedBatch;
use arrow::ipc::writer::StreamWriter;
use arrow_schema::SchemaRef;
use bolson_types::{PipelineError, Result, SeqRange};

/// A serialized IPC message, ready to hand to the publish queue.
pub struct IpcMessage {
    pub bytes: Vec<u8>,
    pub seq_range: SeqRange,
    pub num_rows: usize,
}

/// Serializes `batch` to the Arrow IPC stream format, returning
/// [`PipelineError::IpcTooLarge`] if the result exceeds `max_ipc_size`.
///
/// Callers that need every message under the cap should resize the batch to
/// a row count small enough first; this function never splits a batch
/// itself, matching the reference pipeline's "resize before serialize"
/// staging order.
pub fn serialize(schema: SchemaRef, batch: ParsedBatch, max_ipc_size: usize) -> Result<IpcMessage> {
    let mut buf = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buf, &schema)
            .map_err(|e| PipelineError::Schema(format!("failed to open IPC writer: {e}")))?;
        writer
            .write(&batch.batch)
            .map_err(|e| PipelineError::Schema(format!("failed to write IPC batch: {e}")))?;
        writer
            .finish()
            .map_err(|e| PipelineError::Schema(format!("failed to finish IPC stream: {e}")))?;
    }

    if buf.len() > max_ipc_size {
        return Err(PipelineError::IpcTooLarge {
            actual: buf.len(),
            max: max_ipc_size,
        });
    }

    Ok(IpcMessage {
        bytes: buf,
        seq_range: batch.seq_range,
        num_rows: batch.num_rows(),
    })
}

/// Assumed worst-case bytes per row when turning an empty-message overhead
/// probe into a conservative row-count budget. Deliberately generous (most
/// JSON-derived rows serialize far smaller) since under-budgeting only costs
/// a few extra IPC messages, while over-budgeting risks `IpcTooLarge`.
const ASSUMED_BYTES_PER_ROW: usize = 256;

/// Probes `schema`'s empty-batch IPC overhead and derives a conservative
/// `max_rows` budget that keeps a full message under `max_ipc_size`, per the
/// orchestrator's startup auto-tuning step (an empty batch measures the
/// fixed header cost; the rest of the cap is divided into a row budget using
/// [`ASSUMED_BYTES_PER_ROW`]).
pub fn initial_max_rows_budget(schema: SchemaRef, max_ipc_size: usize) -> Result<usize> {
    let overhead = empty_message_overhead(schema)?;
    if overhead >= max_ipc_size {
        return Err(PipelineError::Config(format!(
            "max_ipc_size ({max_ipc_size} bytes) is smaller than this schema's empty-message \
             IPC overhead ({overhead} bytes); no batch could ever fit"
        )));
    }
    Ok(((max_ipc_size - overhead) / ASSUMED_BYTES_PER_ROW).max(1))
}

/// Serializes a single zero-row batch of `schema` and returns its size. Used
/// at startup to auto-tune `max_rows` against `max_ipc_size`: the empty
/// message's size is the fixed per-message overhead a row-count budget must
/// leave headroom for.
pub fn empty_message_overhead(schema: SchemaRef) -> Result<usize> {
    let mut buf = Vec::new();
    let mut writer = StreamWriter::try_new(&mut buf, &schema)
        .map_err(|e| PipelineError::Schema(format!("failed to open IPC writer: {e}")))?;
    let empty = arrow::record_batch::RecordBatch::new_empty(schema);
    writer
        .write(&empty)
        .map_err(|e| PipelineError::Schema(format!("failed to write empty IPC batch: {e}")))?;
    writer
        .finish()
        .map_err(|e| PipelineError::Schema(format!("failed to finish IPC stream: {e}")))?;
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::UInt64Array;
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema};
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
    fn serializes_under_cap() {
        let msg = serialize(schema(), batch_of(4), 1 << 20).unwrap();
        assert_eq!(msg.num_rows, 4);
        assert_eq!(msg.seq_range, SeqRange::new(0, 3));
        assert!(!msg.bytes.is_empty());
    }

    #[test]
    fn rejects_oversized_message() {
        let err = serialize(schema(), batch_of(1000), 8).unwrap_err();
        assert!(matches!(err, PipelineError::IpcTooLarge { .. }));
    }

    #[test]
    fn empty_message_overhead_is_positive() {
        let overhead = empty_message_overhead(schema()).unwrap();
        assert!(overhead > 0);
    }

    #[test]
    fn initial_max_rows_budget_shrinks_with_a_tight_cap() {
        let overhead = empty_message_overhead(schema()).unwrap();
        let loose = initial_max_rows_budget(schema(), overhead + 1_000_000).unwrap();
        let tight = initial_max_rows_budget(schema(), overhead + 256).unwrap();
        assert!(tight <= loose);
        assert!(tight >= 1);
    }

    #[test]
    fn initial_max_rows_budget_rejects_a_cap_under_the_overhead() {
        let overhead = empty_message_overhead(schema()).unwrap();
        let err = initial_max_rows_budget(schema(), overhead - 1).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
