//! Named timepoint slots for end-to-end latency tracking.
//!
//! A tracked record's `[Instant; NUM_POINTS]` is indexed by [`TimeSlot`]
//! rather than by raw integer, so the converter/publisher stages can't
//! accidentally transpose two slots.

/// Number of timepoint slots recorded per tracked sequence number.
pub const NUM_POINTS: usize = 11;

/// A single named timepoint in a record's journey through the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum TimeSlot {
    /// Bytes arrived over TCP.
    Received = 0,
    /// The framing envelope was stripped off.
    Unwrapped = 1,
    /// The JSON bytes were appended to a `JsonBuffer`.
    Buffered = 2,
    /// The `JsonBuffer` was released to the converter side, full or idle-flushed.
    BufferFlushed = 3,
    /// The parser backend produced a `ParsedBatch` for this record.
    Parsed = 4,
    /// The per-buffer batch was constructed (seq column added, if any).
    Batched = 5,
    /// Multiple chunks were combined into a single batch.
    Combined = 6,
    /// The batch was serialized to an Arrow IPC message.
    Serialized = 7,
    /// The IPC message was dequeued by a publisher thread.
    Dequeued = 8,
    /// The outgoing Pulsar message was built and ready to send.
    PrePublish = 9,
    /// The Pulsar client's `send` call returned.
    Published = 10,
}

impl TimeSlot {
    pub const ALL: [TimeSlot; NUM_POINTS] = [
        TimeSlot::Received,
        TimeSlot::Unwrapped,
        TimeSlot::Buffered,
        TimeSlot::BufferFlushed,
        TimeSlot::Parsed,
        TimeSlot::Batched,
        TimeSlot::Combined,
        TimeSlot::Serialized,
        TimeSlot::Dequeued,
        TimeSlot::PrePublish,
        TimeSlot::Published,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TimeSlot::Received => "received",
            TimeSlot::Unwrapped => "unwrapped",
            TimeSlot::Buffered => "buffered",
            TimeSlot::BufferFlushed => "buffer_flushed",
            TimeSlot::Parsed => "parsed",
            TimeSlot::Batched => "batched",
            TimeSlot::Combined => "combined",
            TimeSlot::Serialized => "serialized",
            TimeSlot::Dequeued => "dequeued",
            TimeSlot::PrePublish => "pre_publish",
            TimeSlot::Published => "published",
        }
    }
}

/// CSV header fields emitted by `LatencyTracker::write_csv`, in column order.
pub fn csv_header_fields() -> Vec<&'static str> {
    let mut cols: Vec<&str> = vec!["seq"];
    // One column per inter-slot interval, e.g. "unwrapped_to_buffered".
    for i in 1..TimeSlot::ALL.len() {
        cols.push(match TimeSlot::ALL[i] {
            TimeSlot::Unwrapped => "received_to_unwrapped",
            TimeSlot::Buffered => "unwrapped_to_buffered",
            TimeSlot::BufferFlushed => "buffered_to_buffer_flushed",
            TimeSlot::Parsed => "buffer_flushed_to_parsed",
            TimeSlot::Batched => "parsed_to_batched",
            TimeSlot::Combined => "batched_to_combined",
            TimeSlot::Serialized => "combined_to_serialized",
            TimeSlot::Dequeued => "serialized_to_dequeued",
            TimeSlot::PrePublish => "dequeued_to_pre_publish",
            TimeSlot::Published => "pre_publish_to_published",
            TimeSlot::Received => unreachable!(),
        });
    }
    cols.push("total");
    cols.push("first_to_serialized");
    cols
}
