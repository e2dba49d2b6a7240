//! Connection subsystem.
//!
//! A single task drives the link state machine
//! `Disabled → Connect → Active → Shutdown → Disabled` and drains all
//! four record queues while Active. Producers never talk to the
//! transport: they enqueue (gated by the accept-data flag) and the
//! connection task publishes.
//!
//! High-speed records are published only when a queue holds a full
//! batch; each batch is the contiguous little-endian concatenation of
//! the record wire layout. Slow records are published as JSON payloads
//! as soon as they arrive.

pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use meter_common::config::{
    Config, HIGH_SPEED_QUEUE_CAPACITY, SLOW_QUEUE_CAPACITY, SharedConfig,
};
use meter_common::records::{
    AboutRecord, HousekeepingRecord, ImuRecord, LowSpeedRecord, SideRecord,
};
use meter_common::state::LinkState;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::queues::Consumer;
use crate::sync::{DataGate, LinkBits, NotifyWord};

use transport::{LinkError, Topic, Transport};

/// Disable-check bound between publish cycles (≈1 scheduler tick).
const ACTIVE_TICK: Duration = Duration::from_millis(10);

/// Wait bound while Disabled, and the Connect retry backoff.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Firmware identity advertised in the about-device record. The
/// hardware revision and build stamp come from the build system.
const DEVICE_SW_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEVICE_HW_VERSION: &str = match option_env!("METER_HW_VERSION") {
    Some(v) => v,
    None => "unknown",
};
const DEVICE_BUILD_STAMP: &str = match option_env!("METER_BUILD_STAMP") {
    Some(v) => v,
    None => "unknown",
};
const DEVICE_MAC: &str = match option_env!("METER_MAC") {
    Some(v) => v,
    None => "00:00:00:00:00:00",
};

// ─── Wire Packing ───────────────────────────────────────────────────

trait WireRecord: Copy {
    fn append_bytes(&self, out: &mut Vec<u8>);
}

impl WireRecord for ImuRecord {
    fn append_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bytes());
    }
}

impl WireRecord for SideRecord {
    fn append_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bytes());
    }
}

// ─── Queue Bundle ───────────────────────────────────────────────────

/// Consumer ends of every queue the connection drains.
pub struct ConnectionQueues {
    pub imu: Consumer<ImuRecord, HIGH_SPEED_QUEUE_CAPACITY>,
    pub left: Consumer<SideRecord, HIGH_SPEED_QUEUE_CAPACITY>,
    pub right: Consumer<SideRecord, HIGH_SPEED_QUEUE_CAPACITY>,
    pub low_speed: Consumer<LowSpeedRecord, SLOW_QUEUE_CAPACITY>,
    pub housekeeping: Consumer<HousekeepingRecord, SLOW_QUEUE_CAPACITY>,
}

// ─── Connection Task ────────────────────────────────────────────────

/// The connection task: state machine driver plus queue drainer.
pub struct ConnectionTask {
    state: LinkState,
    transport: Transport,
    queues: ConnectionQueues,
    notify: Arc<NotifyWord>,
    gate: Arc<DataGate>,
    config: SharedConfig,
    clock: Clock,
}

impl ConnectionTask {
    pub fn new(
        transport: Transport,
        queues: ConnectionQueues,
        notify: Arc<NotifyWord>,
        gate: Arc<DataGate>,
        config: SharedConfig,
        clock: Clock,
    ) -> Self {
        Self {
            state: LinkState::Disabled,
            transport,
            queues,
            notify,
            gate,
            config,
            clock,
        }
    }

    #[inline]
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Task loop. On exit the transport is always released.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!("connection task started");
        while running.load(Ordering::Acquire) {
            self.step();
        }
        if self.state != LinkState::Disabled {
            self.gate.set_accepting(false);
            self.transport.shutdown();
        }
        debug!("connection task stopped");
    }

    /// One state-machine iteration.
    pub fn step(&mut self) {
        match self.state {
            LinkState::Disabled => self.disabled_step(),
            LinkState::Connect => self.connect_step(),
            LinkState::Active => self.active_step(),
            LinkState::Shutdown => self.shutdown_step(),
        }
    }

    fn enter(&mut self, next: LinkState) {
        info!(from = ?self.state, to = ?next, "link transition");
        self.state = next;
        if next == LinkState::Active {
            self.gate.set_accepting(true);
        }
    }

    fn disable_requested(&self) -> bool {
        self.notify.peek() & LinkBits::DISABLE.bits() != 0
    }

    fn disabled_step(&mut self) {
        let mask = (LinkBits::ENABLE | LinkBits::DISABLE).bits();
        let word = self.notify.wait_any(mask, IDLE_WAIT);
        // A disable while already down is stale; drop it.
        if word & LinkBits::DISABLE.bits() != 0 {
            self.notify.clear_bits(LinkBits::DISABLE.bits());
        }
        if word & LinkBits::ENABLE.bits() != 0 {
            self.notify.clear_bits(LinkBits::ENABLE.bits());
            self.enter(LinkState::Connect);
        }
    }

    fn connect_step(&mut self) {
        if self.disable_requested() {
            self.notify.clear_bits(LinkBits::DISABLE.bits());
            self.enter(LinkState::Shutdown);
            return;
        }
        let config = self.config.snapshot();
        match self.transport.connect(&config.connection) {
            Ok(()) => {
                let about = self.about_record(&config);
                match self.transport.publish(Topic::About, about.to_json().as_bytes()) {
                    Ok(()) => self.enter(LinkState::Active),
                    Err(e) => {
                        warn!("about-device publish failed: {e}");
                        std::thread::sleep(IDLE_WAIT);
                    }
                }
            }
            Err(e) => {
                warn!("transport connect failed: {e}");
                std::thread::sleep(IDLE_WAIT);
            }
        }
    }

    fn active_step(&mut self) {
        if let Err(e) = self.publish_cycle() {
            warn!("connectivity lost: {e}");
            self.enter(LinkState::Connect);
            return;
        }
        let word = self.notify.wait_any(LinkBits::DISABLE.bits(), ACTIVE_TICK);
        if word & LinkBits::DISABLE.bits() != 0 {
            self.notify.clear_bits(LinkBits::DISABLE.bits());
            self.enter(LinkState::Shutdown);
        }
    }

    /// Shutdown stops producers first, then releases the transport.
    fn shutdown_step(&mut self) {
        self.gate.set_accepting(false);
        self.transport.shutdown();
        self.enter(LinkState::Disabled);
    }

    /// Drain every queue once: slow records immediately, high-speed
    /// records in full batches only.
    fn publish_cycle(&mut self) -> Result<(), LinkError> {
        while let Some(record) = self.queues.housekeeping.recv() {
            self.transport
                .publish(Topic::Housekeeping, record.to_json().as_bytes())?;
        }
        while let Some(record) = self.queues.low_speed.recv() {
            let json = serde_json::to_string(&record).unwrap_or_default();
            self.transport.publish(Topic::LowSpeed, json.as_bytes())?;
        }

        let batch = self.config.snapshot().connection.batch_size;
        publish_batches(&mut self.transport, &self.queues.imu, Topic::ImuBatch, batch)?;
        publish_batches(&mut self.transport, &self.queues.left, Topic::LeftBatch, batch)?;
        publish_batches(&mut self.transport, &self.queues.right, Topic::RightBatch, batch)?;
        Ok(())
    }

    fn about_record(&self, config: &Config) -> AboutRecord {
        let calibration = serde_json::json!({
            "left": config.left,
            "right": config.right,
        });
        AboutRecord {
            name: config.connection.device_name.clone(),
            compiled: DEVICE_BUILD_STAMP.into(),
            sw_version: DEVICE_SW_VERSION.into(),
            hw_version: DEVICE_HW_VERSION.into(),
            connect_time_us: self.clock.now_us(),
            calibration,
            mac: DEVICE_MAC.into(),
        }
    }
}

/// Publish full batches from one high-speed queue.
fn publish_batches<T: WireRecord, const N: usize>(
    transport: &mut Transport,
    queue: &Consumer<T, N>,
    topic: Topic,
    batch: usize,
) -> Result<(), LinkError> {
    while queue.len() >= batch {
        let mut records: Vec<T> = Vec::with_capacity(batch);
        queue.drain_into(&mut records, batch);
        let mut bytes = Vec::with_capacity(batch * 40);
        for record in &records {
            record.append_bytes(&mut bytes);
        }
        transport.publish(topic, &bytes)?;
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
