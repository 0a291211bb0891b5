//! Reads newline-delimited JSON off a TCP stream into the buffer pool.

use crate::buffer::BufferPool;
use crate::latency::LatencyTracker;
use bolson_types::{IngestOptions, PipelineError, Result, TimeSlot};
use std::io::{BufRead, BufReader, Read};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Assigns globally increasing sequence numbers to incoming JSON documents,
/// shared across every connection Ingest accepts.
#[derive(Default)]
pub struct SeqCounter(AtomicU64);

impl SeqCounter {
    pub fn new() -> Self {
        SeqCounter::default()
    }

    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Accepts one connection at a time on `listener`, reading newline-delimited
/// JSON documents into `pool`'s buffers until `shutdown` is observed.
///
/// Each document is appended to the current writable buffer; a buffer is
/// released to the converter side either when it's full
/// ([`JsonBuffer::would_overflow`](crate::buffer::JsonBuffer::would_overflow))
/// or after `idle_flush` elapses with no new bytes, matching the reference
/// pipeline's "flush on idle" rule so low-throughput streams don't stall
/// behind an unfilled buffer.
pub fn run_ingest_worker(
    listener: TcpListener,
    pool: Arc<BufferPool>,
    seq: Arc<SeqCounter>,
    latency: Arc<LatencyTracker>,
    opts: IngestOptions,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    listener.set_nonblocking(true)?;
    loop {
        if shutdown.load(Ordering::Acquire) {
            return Ok(());
        }
        match listener.accept() {
            Ok((stream, _addr)) => {
                let result = (|| -> Result<()> {
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(opts.idle_flush))?;
                    handle_connection(stream, &pool, &seq, &latency, &opts, &shutdown)
                })();
                if let Err(e) = result {
                    shutdown.store(true, Ordering::Release);
                    return Err(e);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(opts.idle_flush.min(std::time::Duration::from_millis(10)));
            }
            Err(e) => {
                shutdown.store(true, Ordering::Release);
                return Err(PipelineError::Io(e));
            }
        }
    }
}

fn handle_connection(
    stream: impl Read,
    pool: &BufferPool,
    seq: &SeqCounter,
    latency: &LatencyTracker,
    opts: &IngestOptions,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut guard = pool.acquire_writable();
    let mut last_activity = Instant::now();

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break, // connection closed
            Ok(_) => {
                let received_at = Instant::now();
                while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.is_empty() {
                    continue;
                }
                let this_seq = seq.next();
                latency.put(this_seq, TimeSlot::Received, received_at);

                if guard.would_overflow(line.len() + 1) && !guard.is_empty() {
                    flush(pool, guard, latency);
                    guard = pool.acquire_writable();
                }
                guard.append(this_seq, &line);
                latency.put(this_seq, TimeSlot::Buffered, Instant::now());
                last_activity = Instant::now();
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                if !guard.is_empty() && last_activity.elapsed() >= opts.idle_flush {
                    flush(pool, guard, latency);
                    guard = pool.acquire_writable();
                    last_activity = Instant::now();
                }
            }
            Err(e) => return Err(PipelineError::Io(e)),
        }
    }

    if !guard.is_empty() {
        flush(pool, guard, latency);
    } else {
        pool.release_empty(guard);
    }
    Ok(())
}

fn flush<'a>(pool: &'a BufferPool, guard: crate::buffer::BufferPoolGuard<'a>, latency: &LatencyTracker) {
    if let Some(range) = guard.seq_range() {
        latency.put_range(range, TimeSlot::BufferFlushed, Instant::now());
    }
    pool.release_filled(guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Allocator;
    use bolson_types::{AllocatorKind, LatencyOptions};
    use std::io::Cursor;

    #[test]
    fn appends_lines_and_flushes_on_close() {
        let allocator = Allocator::new(AllocatorKind::System, 0);
        let pool = Arc::new(BufferPool::new(&allocator, 2, 4096).unwrap());
        let seq = Arc::new(SeqCounter::new());
        let latency = Arc::new(LatencyTracker::new(&LatencyOptions::default()));
        let shutdown = AtomicBool::new(false);
        let opts = IngestOptions::default();

        let data = b"{\"a\":1}\n{\"a\":2}\n".to_vec();
        handle_connection(Cursor::new(data), &pool, &seq, &latency, &opts, &shutdown).unwrap();

        let filled = pool.try_acquire_filled().expect("a filled buffer");
        assert_eq!(filled.num_jsons(), 2);
    }
}
