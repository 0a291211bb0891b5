//! Orchestrates Ingest, converter, and publisher workers as a set of OS
//! threads sharing a buffer pool and an IPC queue.

pub mod converter;
pub mod ingest;

use crate::buffer::{Allocator, BufferPool};
use crate::convert::{initial_max_rows_budget, ConvertStats};
use crate::latency::LatencyTracker;
use crate::parse::SharedParser;
use crate::publish::{run_publisher_worker, PublishStats, PulsarPublisher};
use crate::queue::IpcQueue;
use bolson_types::{aggregate, PipelineOptions, Result, WorkerOutcome};
use ingest::SeqCounter;
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Owns every shared component of one `stream` run and the threads driving
/// them.
///
/// Shutdown is cooperative: a shared `AtomicBool` flag, flipped by
/// [`Pipeline::shutdown`] (normally from a Ctrl-C handler installed by the
/// CLI), which every worker polls between units of work so each one winds
/// down and drains its share of in-flight data rather than aborting.
pub struct Pipeline {
    shutdown: Arc<AtomicBool>,
    handles: Vec<(String, JoinHandle<Result<()>>)>,
    pub convert_stats: Arc<ConvertStats>,
    pub publish_stats: Arc<PublishStats>,
    pub latency: Arc<LatencyTracker>,
}

impl Pipeline {
    /// Starts every worker thread: one Ingest acceptor, `opts.convert.num_threads`
    /// converter threads (clamped to `parser.preferred_thread_count()`), and
    /// `opts.publish.num_producers` publisher threads.
    pub fn start(listener: TcpListener, parser: SharedParser, opts: PipelineOptions) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let latency = Arc::new(LatencyTracker::new(&opts.latency));
        let convert_stats = Arc::new(ConvertStats::new());
        let publish_stats = Arc::new(PublishStats::new());

        let allocator = Allocator::new(opts.buffer.allocator, opts.buffer.fpga_fixed_capacity);
        let pool = Arc::new(BufferPool::new(&allocator, opts.buffer.num_buffers, opts.buffer.buffer_capacity)?);
        let queue = Arc::new(IpcQueue::new(opts.buffer.num_buffers.max(1)));
        let seq = Arc::new(SeqCounter::new());

        // Auto-tune max_rows at startup: never let the configured budget
        // exceed what this schema can actually fit under max_ipc_size.
        let mut convert_opts = opts.convert;
        let budget = initial_max_rows_budget(parser.output_schema(), convert_opts.max_ipc_size)?;
        if convert_opts.max_rows > budget {
            log::warn!(
                "configured max_rows={} exceeds this schema's {} byte cap's budget of {budget} rows; clamping",
                convert_opts.max_rows,
                convert_opts.max_ipc_size,
            );
            convert_opts.max_rows = budget;
        }

        let mut handles = Vec::new();

        {
            let pool = pool.clone();
            let seq = seq.clone();
            let latency = latency.clone();
            let shutdown = shutdown.clone();
            let ingest_opts = opts.ingest;
            handles.push((
                "ingest".to_string(),
                std::thread::spawn(move || {
                    ingest::run_ingest_worker(listener, pool, seq, latency, ingest_opts, shutdown)
                }),
            ));
        }

        let num_converters = opts
            .convert
            .num_threads
            .min(parser.preferred_thread_count())
            .max(1);
        for i in 0..num_converters {
            let pool = pool.clone();
            let parser = parser.clone();
            let queue = queue.clone();
            let stats = convert_stats.clone();
            let latency = latency.clone();
            let convert_opts = opts.convert;
            let shutdown = shutdown.clone();
            handles.push((
                format!("converter-{i}"),
                std::thread::spawn(move || {
                    converter::run_converter_worker(pool, parser, queue, stats, latency, convert_opts, shutdown)
                }),
            ));
        }

        for i in 0..opts.publish.num_producers.max(1) {
            let queue = queue.clone();
            let stats = publish_stats.clone();
            let latency = latency.clone();
            let shutdown = shutdown.clone();
            let publish_opts = opts.publish.clone();
            let queue_wait = opts.publish.queue_wait;
            handles.push((
                format!("publisher-{i}"),
                std::thread::spawn(move || -> Result<()> {
                    let publisher = Arc::new(PulsarPublisher::connect(&publish_opts)?);
                    run_publisher_worker(queue, publisher, stats, latency, shutdown, queue_wait)
                }),
            ));
        }

        Ok(Pipeline {
            shutdown,
            handles,
            convert_stats,
            publish_stats,
            latency,
        })
    }

    /// Signals every worker thread to wind down. Does not block; call
    /// [`Pipeline::join`] to wait for completion.
    pub fn shutdown(&self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::Release);
    }

    /// Waits for every worker thread to exit, aggregating their outcomes
    /// into a single result (the first failure, by worker-start order, if
    /// any).
    pub fn join(self) -> Result<()> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for (name, handle) in self.handles {
            let result = match handle.join() {
                Ok(r) => r,
                Err(_) => Err(bolson_types::PipelineError::Device(format!(
                    "worker {name} panicked"
                ))),
            };
            outcomes.push(WorkerOutcome { worker: name, result });
        }
        aggregate(outcomes)
    }
}
