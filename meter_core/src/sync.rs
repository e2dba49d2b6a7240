//! Notification words and lock-free cells.
//!
//! Tasks signal each other through bit-accumulating notification words:
//! a notifier ORs bits in and wakes the waiter; the waiter accumulates
//! until the bits it needs are present (or a deadline passes) and clears
//! explicitly. Bits are never lost between a notify and a wait.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use bitflags::bitflags;

bitflags! {
    /// Bits in the low-speed task's notification word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RendezvousBits: u32 {
        /// The IMU task completed a rotation.
        const ROTATION = 1 << 0;
        /// The left side published its per-rotation average power.
        const LEFT = 1 << 1;
        /// The right side published its per-rotation average power.
        const RIGHT = 1 << 2;
    }
}

bitflags! {
    /// Bits in the connection task's notification word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkBits: u32 {
        /// Bring the connection subsystem up.
        const ENABLE = 1 << 0;
        /// Quiesce and release the transport.
        const DISABLE = 1 << 1;
    }
}

// ─── Notification Word ──────────────────────────────────────────────

/// A bit-accumulating notification word with blocking waits.
#[derive(Debug, Default)]
pub struct NotifyWord {
    bits: Mutex<u32>,
    condvar: Condvar,
}

impl NotifyWord {
    pub fn new() -> Self {
        Self::default()
    }

    /// OR `bits` into the word and wake every waiter.
    pub fn notify(&self, bits: u32) {
        let mut word = self.lock();
        *word |= bits;
        self.condvar.notify_all();
    }

    /// Wait until **all** bits of `mask` are set, accumulating across
    /// wakeups without clearing. Returns the whole word; on timeout the
    /// caller sees whichever bits did arrive.
    pub fn wait_all(&self, mask: u32, timeout: Duration) -> u32 {
        self.wait(timeout, |word| word & mask == mask)
    }

    /// Wait until **any** bit of `mask` is set. Returns the whole word.
    pub fn wait_any(&self, mask: u32, timeout: Duration) -> u32 {
        self.wait(timeout, |word| word & mask != 0)
    }

    fn wait(&self, timeout: Duration, ready: impl Fn(u32) -> bool) -> u32 {
        let deadline = Instant::now() + timeout;
        let mut word = self.lock();
        loop {
            if ready(*word) {
                return *word;
            }
            let now = Instant::now();
            if now >= deadline {
                return *word;
            }
            let (guard, _) = match self.condvar.wait_timeout(word, deadline - now) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            word = guard;
        }
    }

    /// Current word without waiting.
    pub fn peek(&self) -> u32 {
        *self.lock()
    }

    /// Clear the whole word.
    pub fn clear(&self) {
        *self.lock() = 0;
    }

    /// Clear only `mask`'s bits.
    pub fn clear_bits(&self, mask: u32) {
        *self.lock() &= !mask;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, u32> {
        match self.bits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ─── Accept-Data Gate ───────────────────────────────────────────────

/// The single flag every producer consults before enqueueing.
///
/// A plain atomic word: producers that observe `false` drop silently
/// and never block.
#[derive(Debug, Default)]
pub struct DataGate {
    accept: AtomicBool,
}

impl DataGate {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn accepting(&self) -> bool {
        self.accept.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_accepting(&self, accept: bool) {
        self.accept.store(accept, Ordering::Release);
    }
}

// ─── Atomic f32 Cell ────────────────────────────────────────────────

/// A lock-free f32 cell (bit-cast through `AtomicU32`).
///
/// Used for single-writer scalars read by other tasks: the per-side
/// average power, the cached side temperatures, the last IMU die
/// temperature.
#[derive(Debug)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
