//! Bounded single-producer single-consumer record queues.
//!
//! Producers never block: a full queue drops the record and bumps a
//! diagnostic counter. Capacity is fixed at compile time (batch size
//! plus a small reserve), so the hot path never allocates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use heapless::Deque;

/// Create a bounded SPSC channel of capacity `N`.
pub fn channel<T, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let shared = Arc::new(Shared {
        buf: Mutex::new(Deque::new()),
        dropped: AtomicU32::new(0),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

#[derive(Debug)]
struct Shared<T, const N: usize> {
    buf: Mutex<Deque<T, N>>,
    dropped: AtomicU32,
}

impl<T, const N: usize> Shared<T, N> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Deque<T, N>> {
        match self.buf.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Sending half. Held by exactly one producer task.
#[derive(Debug)]
pub struct Producer<T, const N: usize> {
    shared: Arc<Shared<T, N>>,
}

impl<T, const N: usize> Producer<T, N> {
    /// Enqueue without blocking. Returns `false` (and counts the drop)
    /// when the queue is full.
    pub fn send(&self, value: T) -> bool {
        match self.shared.lock().push_back(value) {
            Ok(()) => true,
            Err(_) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Records dropped on overflow so far.
    pub fn dropped(&self) -> u32 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half. Held by the connection task.
#[derive(Debug)]
pub struct Consumer<T, const N: usize> {
    shared: Arc<Shared<T, N>>,
}

impl<T, const N: usize> Consumer<T, N> {
    /// Dequeue the oldest record, if any.
    pub fn recv(&self) -> Option<T> {
        self.shared.lock().pop_front()
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records dropped on overflow so far.
    pub fn dropped(&self) -> u32 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Drain up to `n` records into `out` in timestamp order.
    pub fn drain_into(&self, out: &mut Vec<T>, n: usize) {
        let mut buf = self.shared.lock();
        for _ in 0..n {
            match buf.pop_front() {
                Some(value) => out.push(value),
                None => break,
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let (tx, rx) = channel::<u32, 4>();
        assert!(tx.send(1));
        assert!(tx.send(2));
        assert!(tx.send(3));
        assert_eq!(rx.recv(), Some(1));
        assert_eq!(rx.recv(), Some(2));
        assert_eq!(rx.recv(), Some(3));
        assert_eq!(rx.recv(), None);
    }

    #[test]
    fn overflow_drops_and_counts() {
        let (tx, rx) = channel::<u32, 2>();
        assert!(tx.send(1));
        assert!(tx.send(2));
        assert!(!tx.send(3));
        assert!(!tx.send(4));
        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.len(), 2);
        // The oldest records survive; the overflow was dropped.
        assert_eq!(rx.recv(), Some(1));
    }

    #[test]
    fn drain_into_respects_limit() {
        let (tx, rx) = channel::<u32, 8>();
        for i in 0..6 {
            tx.send(i);
        }
        let mut out = Vec::new();
        rx.drain_into(&mut out, 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn cross_thread_handoff() {
        let (tx, rx) = channel::<u32, 64>();
        let handle = std::thread::spawn(move || {
            for i in 0..50 {
                tx.send(i);
            }
        });
        handle.join().unwrap();
        let mut got = Vec::new();
        rx.drain_into(&mut got, 64);
        assert_eq!(got.len(), 50);
        assert!(got.windows(2).all(|w| w[0] < w[1]));
    }
}
