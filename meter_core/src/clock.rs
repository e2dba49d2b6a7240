//! Wrapping microsecond clock.
//!
//! Timestamps are unsigned 32-bit microseconds since boot and wrap at
//! ≈71.6 minutes. All deltas use wrapping subtraction, so a wrap between
//! two captures never produces a negative interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Microseconds between `now` and an `earlier` capture, across wrap.
#[inline]
pub fn delta_us(now: u32, earlier: u32) -> u32 {
    now.wrapping_sub(earlier)
}

/// Seconds between `now` and an `earlier` capture, across wrap.
#[inline]
pub fn delta_s(now: u32, earlier: u32) -> f32 {
    delta_us(now, earlier) as f32 * 1e-6
}

/// Source of `micros()` timestamps.
///
/// The monotonic source truncates a process-wide `Instant` to 32 bits,
/// which reproduces the wrap behavior of the hardware counter. The
/// manual source is driven by tests.
#[derive(Debug, Clone)]
pub struct Clock {
    source: Source,
}

#[derive(Debug, Clone)]
enum Source {
    Monotonic(Instant),
    Manual(Arc<AtomicU32>),
}

impl Clock {
    /// Clock counting from now.
    pub fn monotonic() -> Self {
        Self {
            source: Source::Monotonic(Instant::now()),
        }
    }

    /// Test clock starting at `start_us`; advance with [`Clock::advance_us`].
    pub fn manual(start_us: u32) -> Self {
        Self {
            source: Source::Manual(Arc::new(AtomicU32::new(start_us))),
        }
    }

    /// Current timestamp [µs since boot], wrapping at 2³².
    #[inline]
    pub fn now_us(&self) -> u32 {
        match &self.source {
            Source::Monotonic(epoch) => epoch.elapsed().as_micros() as u32,
            Source::Manual(word) => word.load(Ordering::Acquire),
        }
    }

    /// Advance a manual clock. No-op on the monotonic source.
    pub fn advance_us(&self, delta: u32) {
        if let Source::Manual(word) = &self.source {
            word.fetch_add(delta, Ordering::AcqRel);
        }
    }

    /// Set a manual clock. No-op on the monotonic source.
    pub fn set_us(&self, value: u32) {
        if let Source::Manual(word) = &self.source {
            word.store(value, Ordering::Release);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
