//! Converter thread body: filled buffer in, serialized IPC messages out.

use crate::buffer::BufferPool;
use crate::convert::{resize_and_serialize, ConvertStats};
use crate::latency::LatencyTracker;
use crate::parse::SharedParser;
use crate::queue::IpcQueue;
use bolson_types::{ConvertOptions, Result, TimeSlot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Runs one converter thread's body: poll the pool for a filled buffer,
/// parse it, split it to `max_rows`, serialize each piece, and push the
/// result onto the shared IPC queue, until `shutdown` is observed and the
/// pool is empty.
pub fn run_converter_worker(
    pool: Arc<BufferPool>,
    parser: SharedParser,
    queue: Arc<IpcQueue>,
    stats: Arc<ConvertStats>,
    latency: Arc<LatencyTracker>,
    opts: ConvertOptions,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let schema = parser.output_schema();
    loop {
        let guard = match pool.try_acquire_filled() {
            Some(g) => g,
            None => {
                if shutdown.load(Ordering::Acquire) {
                    return Ok(());
                }
                std::thread::sleep(opts.queue_wait);
                continue;
            }
        };

        let seq_range = guard.seq_range();
        let parsed = parser.parse(&[&*guard]);
        if let Some(range) = seq_range {
            latency.put_range(range, TimeSlot::Parsed, Instant::now());
        }

        let mut guard = guard;
        guard.reset();
        pool.release_empty(guard);

        let batches = match parsed {
            Ok(b) => b,
            Err(e) => {
                stats.record_parse_error();
                shutdown.store(true, Ordering::Release);
                return Err(e);
            }
        };

        for batch in batches {
            stats.record_batch(batch.num_rows());
            if let Some(range) = seq_range {
                latency.put_range(range, TimeSlot::Batched, Instant::now());
            }
            let messages = match resize_and_serialize(batch, schema.clone(), opts.max_rows, opts.max_ipc_size) {
                Ok(m) => m,
                Err(e) => {
                    shutdown.store(true, Ordering::Release);
                    return Err(e);
                }
            };
            for msg in messages {
                latency.put_range(msg.seq_range, TimeSlot::Serialized, Instant::now());
                stats.record_message(msg.bytes.len());

                let mut pending = msg;
                loop {
                    match queue.push(pending, opts.queue_wait) {
                        Ok(None) => break,
                        Ok(Some(returned)) => pending = returned, // queue was momentarily full; retry
                        Err(e) => {
                            shutdown.store(true, Ordering::Release);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Allocator;
    use crate::parse::arrow_backend::{ArrowParser, ArrowParserOptions};
    use bolson_types::{AllocatorKind, LatencyOptions};
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc as StdArc;

    #[test]
    fn converts_one_filled_buffer_into_a_queued_message() {
        let allocator = Allocator::new(AllocatorKind::System, 0);
        let pool = StdArc::new(BufferPool::new(&allocator, 2, 4096).unwrap());
        {
            let mut g = pool.acquire_writable();
            g.append(0, br#"{"v":1}"#);
            g.append(1, br#"{"v":2}"#);
            pool.release_filled(g);
        }

        let schema = StdArc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let parser: SharedParser = StdArc::new(ArrowParser::new(ArrowParserOptions {
            input_schema: schema,
            seq_column: false,
            batch_size: 1024,
        }));
        let queue = StdArc::new(IpcQueue::new(4));
        let stats = StdArc::new(ConvertStats::new());
        let latency = StdArc::new(LatencyTracker::new(&LatencyOptions::default()));
        let shutdown = StdArc::new(AtomicBool::new(true));

        // One pass: pool has the filled buffer, then shutdown + empty pool
        // ends the loop.
        run_converter_worker(
            pool,
            parser,
            queue.clone(),
            stats.clone(),
            latency,
            ConvertOptions::default(),
            shutdown,
        )
        .unwrap();

        assert_eq!(stats.batches_converted(), 1);
        assert_eq!(stats.rows_converted(), 2);
        let msg = queue.pop(std::time::Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(msg.num_rows, 2);
    }
}
