//! End-to-end per-record latency tracking.

use bolson_types::latency::{csv_header_fields, NUM_POINTS};
use bolson_types::{LatencyOptions, SeqRange, TimeSlot};
use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;

/// One tracked sequence number's recorded timepoints. `None` entries mean
/// that slot hasn't been reached yet (or never will be, e.g. a record
/// dropped by a parse error before `Published`).
struct Record {
    seq: u64,
    points: [Option<Instant>; NUM_POINTS],
}

/// Samples a subset of sequence numbers and records the `Instant` each
/// reaches every [`TimeSlot`], to later export as a CSV of inter-stage
/// latencies.
///
/// Sampling, not full tracking, keeps the memory cost bounded under high
/// throughput: only every `interval`-th sequence number (up to
/// `max_samples` of them) is tracked at all.
pub struct LatencyTracker {
    interval: usize,
    max_samples: usize,
    records: Mutex<Vec<Record>>,
}

impl LatencyTracker {
    pub fn new(opts: &LatencyOptions) -> Self {
        LatencyTracker {
            interval: opts.interval.max(1),
            max_samples: opts.max_samples,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Whether tracking is enabled at all (a `max_samples` of 0 disables
    /// it entirely, avoiding the mutex traffic on the hot path).
    pub fn enabled(&self) -> bool {
        self.max_samples > 0
    }

    fn should_sample(&self, seq: u64) -> bool {
        self.enabled() && seq % self.interval as u64 == 0
    }

    /// Records that `seq` reached `slot` at `at`. A no-op for
    /// non-sampled sequence numbers or once `max_samples` distinct
    /// sequence numbers are already tracked.
    pub fn put(&self, seq: u64, slot: TimeSlot, at: Instant) {
        if !self.should_sample(seq) {
            return;
        }
        let mut records = self.records.lock().unwrap();
        if let Some(r) = records.iter_mut().find(|r| r.seq == seq) {
            r.points[slot as usize] = Some(at);
            return;
        }
        if records.len() >= self.max_samples {
            return;
        }
        let mut points = [None; NUM_POINTS];
        points[slot as usize] = Some(at);
        records.push(Record { seq, points });
    }

    /// Records that every sampled sequence number within `range` reached
    /// `slot` at `at`.
    ///
    /// Stages downstream of Ingest (the converter, the publisher) operate on
    /// a whole buffer's or message's [`SeqRange`] rather than one record at a
    /// time, but sampling still tracks individual sequence numbers (e.g. 0,
    /// 1024, 2048). Marking only `range.last` would silently drop every
    /// sampled seq that isn't a range's final one, so this walks every
    /// multiple of the sampling interval inside `range` and marks each.
    pub fn put_range(&self, range: SeqRange, slot: TimeSlot, at: Instant) {
        if !self.enabled() {
            return;
        }
        let interval = self.interval as u64;
        let first_sampled = range.first.div_ceil(interval) * interval;
        let mut seq = first_sampled;
        while seq <= range.last {
            self.put(seq, slot, at);
            seq += interval;
        }
    }

    /// Writes the CSV header plus one row per tracked sequence number whose
    /// `Received` and `Published` timepoints are both set, to `w`.
    ///
    /// Rows for sequence numbers that never reached `Published` (dropped on
    /// a parse or publish error) are omitted rather than emitted with
    /// partial data.
    pub fn write_csv(&self, w: impl Write) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(w);
        wtr.write_record(csv_header_fields())?;
        let records = self.records.lock().unwrap();
        let mut sorted: Vec<&Record> = records.iter().collect();
        sorted.sort_by_key(|r| r.seq);

        for r in sorted {
            let received = match r.points[TimeSlot::Received as usize] {
                Some(t) => t,
                None => continue,
            };
            let published = match r.points[TimeSlot::Published as usize] {
                Some(t) => t,
                None => continue,
            };

            let mut row = vec![r.seq.to_string()];
            let mut prev = received;
            for i in 1..NUM_POINTS {
                match r.points[i] {
                    Some(t) => {
                        row.push(format!("{:.3}", t.duration_since(prev).as_secs_f64() * 1000.0));
                        prev = t;
                    }
                    None => row.push(String::new()),
                }
            }
            row.push(format!("{:.3}", published.duration_since(received).as_secs_f64() * 1000.0));
            let serialized = r.points[TimeSlot::Serialized as usize];
            row.push(match serialized {
                Some(t) => format!("{:.3}", t.duration_since(received).as_secs_f64() * 1000.0),
                None => String::new(),
            });
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn disabled_tracker_ignores_put() {
        let t = LatencyTracker::new(&LatencyOptions { max_samples: 0, interval: 1 });
        assert!(!t.enabled());
        t.put(0, TimeSlot::Received, Instant::now());
        let mut out = Vec::new();
        t.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }

    #[test]
    fn samples_only_every_interval() {
        let t = LatencyTracker::new(&LatencyOptions { max_samples: 100, interval: 2 });
        assert!(t.should_sample(0));
        assert!(!t.should_sample(1));
        assert!(t.should_sample(2));
    }

    #[test]
    fn emits_a_row_once_received_and_published_are_set() {
        let t = LatencyTracker::new(&LatencyOptions { max_samples: 10, interval: 1 });
        let t0 = Instant::now();
        t.put(0, TimeSlot::Received, t0);
        t.put(0, TimeSlot::Published, t0 + Duration::from_millis(5));
        let mut out = Vec::new();
        t.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with('0'));
    }

    #[test]
    fn omits_rows_missing_published() {
        let t = LatencyTracker::new(&LatencyOptions { max_samples: 10, interval: 1 });
        t.put(0, TimeSlot::Received, Instant::now());
        let mut out = Vec::new();
        t.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }

    #[test]
    fn put_range_marks_every_sampled_seq_inside_it_not_just_the_last() {
        let t = LatencyTracker::new(&LatencyOptions { max_samples: 10, interval: 1024 });
        for seq in [0u64, 1024, 2048] {
            t.put(seq, TimeSlot::Received, Instant::now());
        }
        // One buffer spanning seqs 0..=3071 covers all three tracked seqs,
        // not just its last one (3071, which isn't itself tracked).
        t.put_range(SeqRange::new(0, 3071), TimeSlot::Published, Instant::now());

        let mut out = Vec::new();
        t.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 4);
    }

    #[test]
    fn put_range_skips_untracked_seqs_inside_the_range() {
        let t = LatencyTracker::new(&LatencyOptions { max_samples: 10, interval: 1024 });
        t.put_range(SeqRange::new(500, 600), TimeSlot::Received, Instant::now());
        t.put_range(SeqRange::new(500, 600), TimeSlot::Published, Instant::now());
        let mut out = Vec::new();
        t.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }
}
