//! Software parser backend: delegates to Arrow's own JSON table reader.

use crate::buffer::JsonBuffer;
use crate::parse::{ParsedBatch, Parser};
use arrow::array::UInt64Array;
use arrow::compute::concat_batches;
use arrow::json::ReaderBuilder;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bolson_types::{PipelineError, Result, SeqRange};
use std::io::Cursor;
use std::sync::Arc;

/// Name of the sequence-number column optionally prepended to each output
/// batch, matching the reference implementation's `bolson_seq` column.
pub const SEQ_COLUMN_NAME: &str = "bolson_seq";

/// Options for the Arrow-native parser backend.
pub struct ArrowParserOptions {
    /// The caller-supplied input schema, read from the external schema file.
    pub input_schema: SchemaRef,
    /// Whether to prepend a `bolson_seq` column with the buffer's sequence
    /// range.
    pub seq_column: bool,
    /// Batch size used by the underlying JSON reader; large enough that a
    /// single staging buffer typically yields one chunk.
    pub batch_size: usize,
}

impl ArrowParserOptions {
    pub fn output_schema(&self) -> SchemaRef {
        with_seq_field(&self.input_schema, self.seq_column)
    }
}

fn with_seq_field(input: &Schema, seq_column: bool) -> SchemaRef {
    if !seq_column {
        return Arc::new(input.clone());
    }
    let mut fields = vec![Field::new(SEQ_COLUMN_NAME, DataType::UInt64, false)];
    fields.extend(input.fields().iter().map(|f| f.as_ref().clone()));
    Arc::new(Schema::new(fields))
}

/// Parser backend built on Arrow's `json::Reader`.
///
/// One instance may be shared by several converter threads: it holds no
/// mutable state beyond its construction-time options.
pub struct ArrowParser {
    input_schema: SchemaRef,
    output_schema: SchemaRef,
    seq_column: bool,
    batch_size: usize,
}

impl ArrowParser {
    pub fn new(opts: ArrowParserOptions) -> Self {
        let output_schema = opts.output_schema();
        ArrowParser {
            input_schema: opts.input_schema,
            output_schema,
            seq_column: opts.seq_column,
            batch_size: opts.batch_size,
        }
    }

    fn parse_one(&self, buf: &JsonBuffer) -> Result<ParsedBatch> {
        let seq_range = buf.seq_range().ok_or_else(|| {
            PipelineError::Parse {
                message: "buffer has no sequence range (empty buffer)".to_string(),
                buffer_excerpt: String::new(),
            }
        })?;

        let cursor = Cursor::new(buf.data());
        let mut reader = ReaderBuilder::new(self.input_schema.clone())
            .with_batch_size(self.batch_size)
            .build(cursor)
            .map_err(|e| self.parse_error(buf, e))?;

        let mut chunks = Vec::new();
        loop {
            match reader.next() {
                Some(Ok(batch)) => chunks.push(batch),
                Some(Err(e)) => return Err(self.parse_error(buf, e)),
                None => break,
            }
        }

        let combined = if chunks.is_empty() {
            RecordBatch::new_empty(self.input_schema.clone())
        } else if chunks.len() == 1 {
            chunks.into_iter().next().unwrap()
        } else {
            concat_batches(&self.input_schema, &chunks)
                .map_err(|e| self.parse_error(buf, e))?
        };

        let final_batch = if self.seq_column {
            let seq: UInt64Array = (seq_range.first..=seq_range.last).collect();
            let mut columns: Vec<arrow::array::ArrayRef> = vec![Arc::new(seq)];
            columns.extend(combined.columns().iter().cloned());
            RecordBatch::try_new(self.output_schema.clone(), columns)
                .map_err(|e| self.parse_error(buf, e))?
        } else {
            combined
        };

        Ok(ParsedBatch::new(final_batch, seq_range))
    }

    fn parse_error(&self, buf: &JsonBuffer, e: impl std::fmt::Display) -> PipelineError {
        let excerpt: String = String::from_utf8_lossy(buf.data())
            .chars()
            .take(256)
            .collect();
        PipelineError::Parse {
            message: e.to_string(),
            buffer_excerpt: excerpt,
        }
    }
}

impl Parser for ArrowParser {
    fn parse(&self, inputs: &[&JsonBuffer]) -> Result<Vec<ParsedBatch>> {
        inputs.iter().map(|b| self.parse_one(b)).collect()
    }

    fn input_schema(&self) -> SchemaRef {
        self.input_schema.clone()
    }

    fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    fn preferred_thread_count(&self) -> usize {
        // The Arrow JSON reader does its own internal parallelism only when
        // asked to; Bolson always handles threading itself (matching the
        // reference's `read_opts.use_threads = false`), so any number of
        // converter threads is fine.
        usize::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Allocator, JsonBuffer};
    use bolson_types::AllocatorKind;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("voltage", DataType::Int64, false)]))
    }

    fn buffer_with(lines: &[(u64, &str)]) -> JsonBuffer {
        let a = Allocator::new(AllocatorKind::System, 0);
        let mut b = JsonBuffer::new(a.allocate(4096).unwrap());
        for (seq, line) in lines {
            b.append(*seq, line.as_bytes());
        }
        b
    }

    #[test]
    fn parses_and_prepends_seq_column() {
        let parser = ArrowParser::new(ArrowParserOptions {
            input_schema: schema(),
            seq_column: true,
            batch_size: 1024,
        });
        let buf = buffer_with(&[(0, r#"{"voltage":1}"#), (1, r#"{"voltage":2}"#)]);
        let out = parser.parse(&[&buf]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].num_rows(), 2);
        assert_eq!(out[0].seq_range, SeqRange::new(0, 1));
        assert_eq!(out[0].batch.schema().field(0).name(), SEQ_COLUMN_NAME);
        let seq_col = out[0]
            .batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .unwrap();
        assert_eq!(seq_col.value(0), 0);
        assert_eq!(seq_col.value(1), 1);
    }

    #[test]
    fn parses_without_seq_column() {
        let parser = ArrowParser::new(ArrowParserOptions {
            input_schema: schema(),
            seq_column: false,
            batch_size: 1024,
        });
        let buf = buffer_with(&[(0, r#"{"voltage":1}"#)]);
        let out = parser.parse(&[&buf]).unwrap();
        assert_eq!(out[0].batch.num_columns(), 1);
        assert_eq!(out[0].batch.schema().field(0).name(), "voltage");
    }
}
