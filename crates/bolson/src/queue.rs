//! The bounded, blocking queue between converter threads and publisher
//! threads.

use crate::convert::IpcMessage;
use bolson_types::{PipelineError, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::time::Duration;

/// Many-producer, many-consumer bounded queue of serialized IPC messages.
///
/// Backed by `crossbeam::channel`'s bounded channel, matching the
/// reference implementation's lock-free MPMC queue; `push`/`pop` block (with
/// a timeout, so shutdown can be observed) rather than busy-spin.
#[derive(Clone)]
pub struct IpcQueue {
    tx: Sender<IpcMessage>,
    rx: Receiver<IpcMessage>,
}

impl IpcQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam::channel::bounded(capacity.max(1));
        IpcQueue { tx, rx }
    }

    /// Blocks until either a slot frees up or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on success. On timeout, returns `Ok(Some(msg))`
    /// handing the message back so the caller can re-check shutdown state
    /// before retrying the same push. Returns `Err(QueueClosed)` once every
    /// receiver has been dropped.
    pub fn push(&self, msg: IpcMessage, timeout: Duration) -> Result<Option<IpcMessage>> {
        match self.tx.send_timeout(msg, timeout) {
            Ok(()) => Ok(None),
            Err(SendTimeoutError::Timeout(msg)) => Ok(Some(msg)),
            Err(SendTimeoutError::Disconnected(_)) => Err(PipelineError::QueueClosed),
        }
    }

    /// Blocks until either a message is ready or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout (caller should re-check the shutdown
    /// flag and retry) rather than treating it as an error.
    pub fn pop(&self, timeout: Duration) -> Result<Option<IpcMessage>> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::QueueClosed),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolson_types::SeqRange;

    fn msg(n: u64) -> IpcMessage {
        IpcMessage {
            bytes: vec![0u8; 4],
            seq_range: SeqRange::new(n, n),
            num_rows: 1,
        }
    }

    #[test]
    fn push_then_pop_preserves_order() {
        let q = IpcQueue::new(4);
        q.push(msg(0), Duration::from_millis(10)).unwrap();
        q.push(msg(1), Duration::from_millis(10)).unwrap();
        let a = q.pop(Duration::from_millis(10)).unwrap().unwrap();
        let b = q.pop(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(a.seq_range, SeqRange::new(0, 0));
        assert_eq!(b.seq_range, SeqRange::new(1, 1));
    }

    #[test]
    fn pop_times_out_on_empty_queue() {
        let q = IpcQueue::new(4);
        assert!(q.pop(Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn push_times_out_on_full_queue() {
        let q = IpcQueue::new(1);
        assert!(q.push(msg(0), Duration::from_millis(10)).unwrap().is_none());
        assert!(q.push(msg(1), Duration::from_millis(5)).unwrap().is_some());
    }
}
