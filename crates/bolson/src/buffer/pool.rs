//! A fixed set of reusable `JsonBuffer`s shared between the Ingest thread
//! and the converter thread pool.

use crate::buffer::allocator::Allocator;
use crate::buffer::json_buffer::JsonBuffer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

struct Slot {
    buffer: Mutex<JsonBuffer>,
}

/// A guard granting exclusive access to one pool slot.
///
/// Dropping the guard without calling [`BufferPoolGuard::release`] still
/// releases the underlying lock (it is a thin wrapper over `MutexGuard`),
/// but does *not* flip the slot's "filled" flag — call [`BufferPool::release`]
/// explicitly once the buffer's state (`filled` vs. `empty`) is final.
pub struct BufferPoolGuard<'a> {
    pub index: usize,
    guard: MutexGuard<'a, JsonBuffer>,
}

impl<'a> std::ops::Deref for BufferPoolGuard<'a> {
    type Target = JsonBuffer;
    fn deref(&self) -> &JsonBuffer {
        &self.guard
    }
}

impl<'a> std::ops::DerefMut for BufferPoolGuard<'a> {
    fn deref_mut(&mut self) -> &mut JsonBuffer {
        &mut self.guard
    }
}

/// Fixed-size pool of `JsonBuffer`s, each individually lockable.
///
/// Each slot also carries a "non-empty" flag, set by whichever stage last
/// released the slot, so that `try_acquire_filled` can find ready buffers
/// without inspecting their contents under lock contention from Ingest.
pub struct BufferPool {
    slots: Vec<Slot>,
    filled: Vec<AtomicUsize>,
    not_empty: Condvar,
    not_empty_mutex: Mutex<()>,
    rr_writable: AtomicUsize,
    rr_filled: AtomicUsize,
}

impl BufferPool {
    pub fn new(allocator: &Allocator, num_buffers: usize, buffer_capacity: usize) -> bolson_types::Result<Self> {
        let mut slots = Vec::with_capacity(num_buffers);
        let mut filled = Vec::with_capacity(num_buffers);
        for _ in 0..num_buffers {
            let region = allocator.allocate(buffer_capacity)?;
            slots.push(Slot {
                buffer: Mutex::new(JsonBuffer::new(region)),
            });
            filled.push(AtomicUsize::new(0));
        }
        Ok(BufferPool {
            slots,
            filled,
            not_empty: Condvar::new(),
            not_empty_mutex: Mutex::new(()),
            rr_writable: AtomicUsize::new(0),
            rr_filled: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Blocks until an empty buffer is available, then returns a guard
    /// locking it.
    pub fn acquire_writable(&self) -> BufferPoolGuard<'_> {
        loop {
            if let Some(guard) = self.try_acquire_empty() {
                return guard;
            }
            // Wait for a `release` that marks a slot empty again. The
            // timeout bounds how long a spurious miss can delay a retry;
            // it does not affect correctness.
            let lock = self.not_empty_mutex.lock().unwrap();
            let _ = self
                .not_empty
                .wait_timeout(lock, std::time::Duration::from_micros(50))
                .unwrap();
        }
    }

    fn try_acquire_empty(&self) -> Option<BufferPoolGuard<'_>> {
        let n = self.slots.len();
        let start = self.rr_writable.fetch_add(1, Ordering::Relaxed) % n.max(1);
        for offset in 0..n {
            let i = (start + offset) % n;
            if self.filled[i].load(Ordering::Acquire) == 1 {
                continue;
            }
            if let Ok(guard) = self.slots[i].buffer.try_lock() {
                return Some(BufferPoolGuard { index: i, guard });
            }
        }
        None
    }

    /// Returns the first non-empty buffer whose lock can be acquired
    /// without blocking, starting from a round-robin position so
    /// concurrent converter threads spread out across slots.
    pub fn try_acquire_filled(&self) -> Option<BufferPoolGuard<'_>> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        let start = self.rr_filled.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..n {
            let i = (start + offset) % n;
            if self.filled[i].load(Ordering::Acquire) == 0 {
                continue;
            }
            if let Ok(guard) = self.slots[i].buffer.try_lock() {
                return Some(BufferPoolGuard { index: i, guard });
            }
        }
        None
    }

    /// Marks slot `index` as non-empty (has data ready for conversion) and
    /// unlocks it by dropping the guard.
    pub fn release_filled(&self, guard: BufferPoolGuard<'_>) {
        let index = guard.index;
        drop(guard);
        self.filled[index].store(1, Ordering::Release);
    }

    /// Marks slot `index` as empty (ready to be written into again),
    /// wakes any thread blocked in `acquire_writable`, and unlocks it by
    /// dropping the guard.
    pub fn release_empty(&self, guard: BufferPoolGuard<'_>) {
        let index = guard.index;
        drop(guard);
        self.filled[index].store(0, Ordering::Release);
        let _lock = self.not_empty_mutex.lock().unwrap();
        self.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolson_types::AllocatorKind;
    use std::sync::Arc;
    use std::thread;

    fn pool(n: usize, cap: usize) -> BufferPool {
        let a = Allocator::new(AllocatorKind::System, 0);
        BufferPool::new(&a, n, cap).unwrap()
    }

    #[test]
    fn acquire_writable_finds_empty_slot() {
        let p = pool(2, 64);
        let g = p.acquire_writable();
        assert!(g.index < 2);
    }

    #[test]
    fn try_acquire_filled_returns_none_when_all_empty() {
        let p = pool(2, 64);
        assert!(p.try_acquire_filled().is_none());
    }

    #[test]
    fn release_filled_then_try_acquire_filled_finds_it() {
        let p = pool(2, 64);
        let mut g = p.acquire_writable();
        g.append(0, b"{}");
        p.release_filled(g);
        let g2 = p.try_acquire_filled().expect("should find filled slot");
        assert_eq!(g2.num_jsons(), 1);
    }

    #[test]
    fn acquire_writable_blocks_until_release() {
        let p = Arc::new(pool(1, 64));
        let g = p.acquire_writable();
        // Mark it filled so the only slot is unavailable for writing.
        p.release_filled(g);

        let p2 = Arc::clone(&p);
        let handle = thread::spawn(move || {
            let g = p2.acquire_writable();
            assert_eq!(g.index, 0);
        });

        thread::sleep(std::time::Duration::from_millis(20));
        let filled = p.try_acquire_filled().unwrap();
        p.release_empty(filled);

        handle.join().unwrap();
    }
}
