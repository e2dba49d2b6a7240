//! Top-level meter state machine: Active / Sleep / Flat.
//!
//! Every transition away from Active sends a disable to the connection
//! subsystem and quiesces the data producers before any hardware is
//! power-gated. Flat is terminal: it also stops the task loops, and
//! only a recharge and power cycle bring the meter back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use meter_common::state::MeterState;
use tracing::{debug, info, warn};

use crate::housekeeping::SupervisorEvent;
use crate::sync::{DataGate, LinkBits, NotifyWord};

/// One sample period: producers observe the closed gate within this.
const QUIESCE_WAIT: Duration = Duration::from_millis(10);

/// Event feeding the top-level machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterEvent {
    /// No rotation within the configured sleep timeout.
    SleepTimeout,
    /// Motion wake interrupt from the IMU.
    MotionWake,
    /// Battery exhausted (persistent under-voltage).
    FlatBattery,
}

/// Result of a transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition taken; carries the new state.
    Ok(MeterState),
    /// Transition rejected; carries the reason.
    Rejected(&'static str),
}

/// The bare transition table; side effects live in [`PowerController`].
#[derive(Debug, Clone)]
pub struct MeterStateMachine {
    state: MeterState,
}

impl MeterStateMachine {
    pub const fn new() -> Self {
        Self {
            state: MeterState::Active,
        }
    }

    #[inline]
    pub const fn state(&self) -> MeterState {
        self.state
    }

    /// Attempt a transition.
    pub fn handle_event(&mut self, event: MeterEvent) -> TransitionResult {
        use MeterEvent::*;
        use MeterState::*;

        let next = match (self.state, event) {
            (Active, SleepTimeout) => Sleep,
            (Sleep, MotionWake) => Active,
            (Active, FlatBattery) => Flat,
            (Flat, _) => return TransitionResult::Rejected("Flat is terminal"),
            (Active, MotionWake) => return TransitionResult::Rejected("already awake"),
            (Sleep, SleepTimeout) => return TransitionResult::Rejected("already asleep"),
            (Sleep, FlatBattery) => {
                return TransitionResult::Rejected("housekeeping only runs while active");
            }
        };
        self.state = next;
        TransitionResult::Ok(next)
    }
}

impl Default for MeterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Controller ─────────────────────────────────────────────────────

/// Drives the machine and executes the transition contract against the
/// connection subsystem and the data gate.
#[derive(Debug)]
pub struct PowerController {
    machine: Mutex<MeterStateMachine>,
    link_notify: Arc<NotifyWord>,
    gate: Arc<DataGate>,
    running: Arc<AtomicBool>,
}

impl PowerController {
    pub fn new(
        link_notify: Arc<NotifyWord>,
        gate: Arc<DataGate>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            machine: Mutex::new(MeterStateMachine::new()),
            link_notify,
            gate,
            running,
        }
    }

    pub fn state(&self) -> MeterState {
        self.lock().state()
    }

    /// Feed one event; returns whether a transition was taken.
    pub fn handle(&self, event: MeterEvent) -> bool {
        let result = self.lock().handle_event(event);
        match result {
            TransitionResult::Ok(next) => {
                info!(?event, ?next, "meter transition");
                self.enter(next);
                true
            }
            TransitionResult::Rejected(reason) => {
                debug!(?event, reason, "meter event ignored");
                false
            }
        }
    }

    /// Map a housekeeping policy event onto the machine.
    pub fn supervise(&self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::SleepTimeout => {
                self.handle(MeterEvent::SleepTimeout);
            }
            SupervisorEvent::FlatBattery => {
                self.handle(MeterEvent::FlatBattery);
            }
        }
    }

    /// Motion observed by the IMU task; wakes a sleeping meter.
    pub fn notify_motion(&self) {
        if self.state() == MeterState::Sleep {
            self.handle(MeterEvent::MotionWake);
        }
    }

    fn enter(&self, next: MeterState) {
        match next {
            MeterState::Active => {
                self.link_notify.notify(LinkBits::ENABLE.bits());
            }
            MeterState::Sleep => {
                self.quiesce();
                // Hardware power gating happens beyond this point; the
                // IMU motion interrupt stays armed as the wake source.
            }
            MeterState::Flat => {
                self.quiesce();
                warn!("battery flat; meter halted");
                self.running.store(false, Ordering::Release);
            }
        }
    }

    /// Stop producers, then the connection: close the gate, send the
    /// disable, and give in-flight enqueues one sample period to drain.
    fn quiesce(&self) {
        self.gate.set_accepting(false);
        self.link_notify.notify(LinkBits::DISABLE.bits());
        std::thread::sleep(QUIESCE_WAIT);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MeterStateMachine> {
        match self.machine.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
