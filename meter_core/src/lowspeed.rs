//! Low-speed task: per-rotation rendezvous and summary records.
//!
//! Waits (bounded at 3 s) until both per-side tasks have reported their
//! average for the rotation that just completed, accumulating
//! notification bits across wakeups without clearing on entry. On
//! success the record carries total power and right-side balance; on
//! timeout it reports power 0 / balance 50 with the last known rotation
//! metadata, so the stream keeps flowing when a side dies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use meter_common::config::SLOW_QUEUE_CAPACITY;
use meter_common::records::LowSpeedRecord;
use tracing::{debug, info, trace};

use crate::imu::RotationCell;
use crate::queues::Producer;
use crate::sync::{AtomicF32, DataGate, NotifyWord, RendezvousBits};

/// Rendezvous bound.
const RENDEZVOUS_WAIT: Duration = Duration::from_secs(3);

/// The low-speed summary task.
pub struct LowSpeedTask {
    rendezvous: Arc<NotifyWord>,
    rotation: Arc<RotationCell>,
    left_power: Arc<AtomicF32>,
    right_power: Arc<AtomicF32>,
    gate: Arc<DataGate>,
    queue: Producer<LowSpeedRecord, SLOW_QUEUE_CAPACITY>,
}

impl LowSpeedTask {
    pub fn new(
        rendezvous: Arc<NotifyWord>,
        rotation: Arc<RotationCell>,
        left_power: Arc<AtomicF32>,
        right_power: Arc<AtomicF32>,
        gate: Arc<DataGate>,
        queue: Producer<LowSpeedRecord, SLOW_QUEUE_CAPACITY>,
    ) -> Self {
        Self {
            rendezvous,
            rotation,
            left_power,
            right_power,
            gate,
            queue,
        }
    }

    /// Task loop.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!("low-speed task started");
        while running.load(Ordering::Acquire) {
            self.step(RENDEZVOUS_WAIT);
        }
        debug!("low-speed task stopped");
    }

    /// One rendezvous cycle; the timeout is a parameter so tests do not
    /// wait three real seconds.
    pub fn step(&mut self, timeout: Duration) -> LowSpeedRecord {
        let sides = (RendezvousBits::LEFT | RendezvousBits::RIGHT).bits();
        let word = self.rendezvous.wait_all(sides, timeout);

        let (power, balance) = if word & sides == sides {
            let left = self.left_power.load();
            let right = self.right_power.load();
            let total = left + right;
            if total > 0.0 {
                (total, 100.0 * right / total)
            } else {
                (total, 50.0)
            }
        } else {
            trace!(word, "rendezvous timed out");
            (0.0, 50.0)
        };

        let meta = self.rotation.snapshot();
        let cadence = if meta.last_duration_us > 0 {
            60.0e6 / meta.last_duration_us as f32
        } else {
            0.0
        };

        let record = LowSpeedRecord {
            rotation_time_us: meta.last_time_us,
            cadence,
            rotations: meta.count,
            power,
            balance,
        };
        if self.gate.accepting() {
            self.queue.send(record);
        }
        self.rendezvous.clear();
        record
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
