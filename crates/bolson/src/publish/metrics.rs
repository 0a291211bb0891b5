//! Aggregate counters shared by every publisher thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Running totals for the publish stage.
#[derive(Default)]
pub struct PublishStats {
    messages_published: AtomicU64,
    rows_published: AtomicU64,
    bytes_published: AtomicU64,
    publish_errors: AtomicU64,
    /// Total wall-clock time spent inside `PulsarPublisher::publish`, in
    /// nanoseconds, accumulated across every call on this thread's stats
    /// handle. Reported alongside thread lifetime to distinguish time spent
    /// waiting on the broker from time spent idle on the queue.
    publish_nanos: AtomicU64,
}

impl PublishStats {
    pub fn new() -> Self {
        PublishStats::default()
    }

    pub fn record_publish(&self, rows: usize, bytes: usize, elapsed: Duration) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        self.rows_published.fetch_add(rows as u64, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes as u64, Ordering::Relaxed);
        self.publish_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    pub fn rows_published(&self) -> u64 {
        self.rows_published.load(Ordering::Relaxed)
    }

    pub fn bytes_published(&self) -> u64 {
        self.bytes_published.load(Ordering::Relaxed)
    }

    pub fn publish_errors(&self) -> u64 {
        self.publish_errors.load(Ordering::Relaxed)
    }

    pub fn publish_time(&self) -> Duration {
        Duration::from_nanos(self.publish_nanos.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_calls() {
        let s = PublishStats::new();
        s.record_publish(2, 128, Duration::from_millis(5));
        s.record_error();
        assert_eq!(s.messages_published(), 1);
        assert_eq!(s.rows_published(), 2);
        assert_eq!(s.bytes_published(), 128);
        assert_eq!(s.publish_errors(), 1);
        assert_eq!(s.publish_time(), Duration::from_millis(5));
    }
}
