//! Publisher worker pool: dequeues serialized IPC messages and hands them
//! to the Pulsar client.

pub mod metrics;

pub use metrics::PublishStats;

use crate::convert::IpcMessage;
use crate::latency::LatencyTracker;
use crate::queue::IpcQueue;
use bolson_types::{PipelineError, PublishOptions, Result, TimeSlot};
use pulsar::{Producer, Pulsar, TokioExecutor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One connection to the broker plus the single-threaded Tokio runtime that
/// drives it.
///
/// The pipeline otherwise runs on plain OS threads (see
/// `crate::pipeline::converter`), matching the reference implementation's
/// thread model; Pulsar's client is async-only, so each publisher thread
/// owns one small runtime purely to drive that one client's futures,
/// rather than pulling the rest of the pipeline onto an async executor.
pub struct PulsarPublisher {
    runtime: tokio::runtime::Runtime,
    producer: std::sync::Mutex<Producer<TokioExecutor>>,
}

impl PulsarPublisher {
    pub fn connect(opts: &PublishOptions) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(PipelineError::Io)?;

        let producer = runtime.block_on(async {
            let client: Pulsar<TokioExecutor> = Pulsar::builder(&opts.url, TokioExecutor)
                .build()
                .await
                .map_err(|e| PipelineError::Publish(format!("failed to connect to {}: {e}", opts.url)))?;

            let mut builder = client.producer().with_topic(&opts.topic);
            if opts.batching.enable {
                builder = builder.with_options(pulsar::ProducerOptions {
                    batch_size: Some(opts.batching.max_messages),
                    ..Default::default()
                });
            }
            builder
                .build()
                .await
                .map_err(|e| PipelineError::Publish(format!("failed to create producer on {}: {e}", opts.topic)))
        })?;

        Ok(PulsarPublisher {
            runtime,
            producer: std::sync::Mutex::new(producer),
        })
    }

    /// Sends `msg` and blocks until the broker acknowledges it.
    pub fn publish(&self, msg: &IpcMessage) -> Result<()> {
        let mut producer = self.producer.lock().unwrap();
        let payload = msg.bytes.clone();
        self.runtime.block_on(async {
            producer
                .send(payload)
                .await
                .map_err(|e| PipelineError::Publish(e.to_string()))?
                .await
                .map_err(|e| PipelineError::Publish(e.to_string()))?;
            Ok::<(), PipelineError>(())
        })
    }
}

/// Runs one publisher thread's body: pop a message, send it, record stats,
/// repeat until `shutdown` is set and the queue has drained.
///
/// `queue_wait` bounds how long each `pop` blocks before re-checking
/// `shutdown`, so the thread notices shutdown promptly even when the queue
/// is empty.
pub fn run_publisher_worker(
    queue: Arc<IpcQueue>,
    publisher: Arc<PulsarPublisher>,
    stats: Arc<PublishStats>,
    latency: Arc<LatencyTracker>,
    shutdown: Arc<AtomicBool>,
    queue_wait: Duration,
) -> Result<()> {
    loop {
        match queue.pop(queue_wait)? {
            Some(msg) => {
                latency.put_range(msg.seq_range, TimeSlot::Dequeued, Instant::now());
                let bytes = msg.bytes.len();
                let rows = msg.num_rows;
                let started = Instant::now();
                latency.put_range(msg.seq_range, TimeSlot::PrePublish, Instant::now());
                match publisher.publish(&msg) {
                    Ok(()) => {
                        latency.put_range(msg.seq_range, TimeSlot::Published, Instant::now());
                        stats.record_publish(rows, bytes, started.elapsed());
                    }
                    Err(e) => {
                        stats.record_error();
                        shutdown.store(true, Ordering::Release);
                        return Err(e);
                    }
                }
            }
            None => {
                if shutdown.load(Ordering::Acquire) && queue.is_empty() {
                    return Ok(());
                }
            }
        }
    }
}
