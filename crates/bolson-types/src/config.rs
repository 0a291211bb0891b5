//! Typed configuration for every pipeline component.
//!
//! These structures are populated from CLI flags by `bolson-cli` and are
//! also what the `bench` subcommands serialize to/from disk, so every
//! leaf derives `Serialize`/`Deserialize`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum size of a single Pulsar message, taken from the Pulsar
/// client's own default (5 MiB) minus 10 KiB of slack for message overhead.
pub const fn default_max_ipc_size() -> usize {
    5 * 1024 * 1024 - 10 * 1024
}

/// Default number of FPGA kernels instantiated by either hardware backend.
pub const fn default_fpga_parsers() -> usize {
    8
}

/// Default capacity, in bytes, of a single JSON staging buffer.
pub const fn default_buffer_capacity() -> usize {
    16 * 1024 * 1024
}

/// Which memory backend the [`BufferPool`](crate::AllocatorKind) draws from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocatorKind {
    /// Page-aligned heap allocation, suitable for the Arrow backend.
    #[default]
    System,
    /// 2 MiB / 1 GiB huge pages, used to back FPGA DMA buffers.
    HugePage,
    /// Exactly one fixed-size region, sized for a specific FPGA context.
    FpgaFixed,
}

/// Which parser backend converts JSON buffers into Arrow record batches.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserKind {
    /// Software backend built on Arrow's own JSON table reader.
    #[default]
    Arrow,
    /// FPGA driver for the battery-status kernel array.
    FpgaBattery,
    /// FPGA driver for the trip-report kernel array.
    FpgaTrip,
}

/// Options controlling the [`Allocator`](crate::AllocatorKind) and the
/// [`BufferPool`] it backs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferOptions {
    /// Which allocator backend to use.
    pub allocator: AllocatorKind,
    /// Number of JSON staging buffers in the pool.
    pub num_buffers: usize,
    /// Capacity, in bytes, of each staging buffer.
    pub buffer_capacity: usize,
    /// Fixed capacity required by the `FpgaFixed` allocator. Ignored by
    /// other allocator kinds.
    pub fpga_fixed_capacity: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        BufferOptions {
            allocator: AllocatorKind::default(),
            num_buffers: 16,
            buffer_capacity: default_buffer_capacity(),
            fpga_fixed_capacity: 1024 * 1024 * 1024,
        }
    }
}

/// Options controlling how long Ingest waits before flushing an idle,
/// partially-filled buffer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestOptions {
    /// How long Ingest waits for new bytes before flushing a
    /// partially-filled buffer.
    pub idle_flush: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            idle_flush: Duration::from_millis(100),
        }
    }
}

/// Options shared by the Resizer/Serializer chain.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Maximum number of rows a single IPC message may hold.
    pub max_rows: usize,
    /// Maximum serialized size, in bytes, of a single IPC message.
    pub max_ipc_size: usize,
    /// Number of converter worker threads. Clamped by the parser's
    /// advisory thread count.
    pub num_threads: usize,
    /// How long a converter thread sleeps between `try_acquire_filled`
    /// polls when the pool has nothing ready.
    pub queue_wait: Duration,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            max_rows: 1_000_000,
            max_ipc_size: default_max_ipc_size(),
            num_threads: 1,
            queue_wait: Duration::from_micros(1),
        }
    }
}

/// Pulsar producer batching passthrough options.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingOptions {
    /// Whether the producer batches messages before sending.
    pub enable: bool,
    /// Maximum number of messages per batch.
    pub max_messages: u32,
    /// Maximum cumulative bytes per batch.
    pub max_bytes: usize,
    /// Maximum delay, in milliseconds, before a partial batch is flushed.
    pub max_delay_ms: u64,
}

impl Default for BatchingOptions {
    fn default() -> Self {
        BatchingOptions {
            enable: false,
            max_messages: 1000,
            max_bytes: default_max_ipc_size(),
            max_delay_ms: 10,
        }
    }
}

/// Options for the Pulsar publisher pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishOptions {
    /// Pulsar broker service URL, e.g. `pulsar://localhost:6650`.
    pub url: String,
    /// Topic to publish serialized IPC messages to.
    pub topic: String,
    /// Number of concurrent producer worker threads.
    pub num_producers: usize,
    /// Producer batching passthrough.
    pub batching: BatchingOptions,
    /// How long a publisher thread blocks on `wait_dequeue_timed` before
    /// re-checking the shutdown flag.
    pub queue_wait: Duration,
}

impl Default for PublishOptions {
    fn default() -> Self {
        PublishOptions {
            url: "pulsar://localhost:6650".to_string(),
            topic: "bolson".to_string(),
            num_producers: 1,
            batching: BatchingOptions::default(),
            queue_wait: Duration::from_micros(1),
        }
    }
}

/// Options for the [`LatencyTracker`](crate) sampling policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyOptions {
    /// Maximum number of sequence numbers tracked end-to-end.
    pub max_samples: usize,
    /// Sample every `interval`-th sequence number, starting at 0.
    pub interval: usize,
}

impl Default for LatencyOptions {
    fn default() -> Self {
        LatencyOptions {
            max_samples: 0,
            interval: 1024,
        }
    }
}

/// FPGA tuning knobs common to both the battery and trip backends.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FpgaOptions {
    /// Number of hardware kernel instances to drive.
    pub num_parsers: usize,
    /// Capacity, in bytes, of each kernel's output offsets/values buffers.
    pub output_buffer_capacity: usize,
    /// Maximum time to wait for a kernel's `DONE` status bit.
    pub poll_timeout: Duration,
    /// Interval between MMIO status polls.
    pub poll_interval: Duration,
}

impl Default for FpgaOptions {
    fn default() -> Self {
        FpgaOptions {
            num_parsers: default_fpga_parsers(),
            output_buffer_capacity: 1024 * 1024 * 1024,
            poll_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_micros(10),
        }
    }
}

/// The full set of options for running `stream`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub parser: ParserKind,
    pub buffer: BufferOptions,
    pub ingest: IngestOptions,
    pub convert: ConvertOptions,
    pub publish: PublishOptions,
    pub latency: LatencyOptions,
    pub fpga: FpgaOptions,
}
