//! Splits a parsed batch into row-capped slices, zero-copy.

use crate::parse::ParsedBatch;
use bolson_types::SeqRange;

/// Splits `batch` into consecutive slices of at most `max_rows` rows each.
///
/// Uses `RecordBatch::slice`, which shares the underlying Arrow buffers
/// rather than copying, so resizing a batch that already fits costs nothing
/// beyond a single `Vec` with one element.
pub fn resize(batch: ParsedBatch, max_rows: usize) -> Vec<ParsedBatch> {
    if max_rows == 0 || batch.num_rows() <= max_rows {
        return vec![batch];
    }

    let mut out = Vec::with_capacity((batch.num_rows() + max_rows - 1) / max_rows);
    let mut offset = 0usize;
    let first = batch.seq_range.first;
    while offset < batch.num_rows() {
        let len = max_rows.min(batch.num_rows() - offset);
        let slice = batch.batch.slice(offset, len);
        let range_first = first + offset as u64;
        let range = SeqRange::new(range_first, range_first + len as u64 - 1);
        out.push(ParsedBatch::new(slice, range));
        offset += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::UInt64Array;
    use arrow::record_batch::RecordBatch;
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    fn batch_of(n: u64) -> ParsedBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::UInt64, false)]));
        let array = UInt64Array::from((0..n).collect::<Vec<_>>());
        let batch = RecordBatch::try_new(schema, vec![Arc::new(array)]).unwrap();
        ParsedBatch::new(batch, SeqRange::new(0, n - 1))
    }

    #[test]
    fn passes_through_when_under_cap() {
        let out = resize(batch_of(5), 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].num_rows(), 5);
    }

    #[test]
    fn splits_into_capped_slices() {
        let out = resize(batch_of(10), 3);
        assert_eq!(out.len(), 4);
        assert_eq!(out.iter().map(|b| b.num_rows()).collect::<Vec<_>>(), vec![3, 3, 3, 1]);
        assert_eq!(out[0].seq_range, SeqRange::new(0, 2));
        assert_eq!(out[3].seq_range, SeqRange::new(9, 9));
        let total: u64 = out.iter().map(|b| b.seq_range.len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn zero_cap_is_a_no_op() {
        let out = resize(batch_of(5), 0);
        assert_eq!(out.len(), 1);
    }
}
