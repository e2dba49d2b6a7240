//! Housekeeping supervisor.
//!
//! Every ≈10 s: read both strain-gauge-side temperatures (synchronous
//! conversions; sentinel on bus failure), pick up the cached IMU
//! temperature and the active zero offsets, sample the battery, and
//! enqueue one housekeeping record. The supervisor also owns the two
//! top-level policy checks: the flat-battery countdown and the
//! sleep-on-idle timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use meter_common::config::{SLOW_QUEUE_CAPACITY, SharedConfig};
use meter_common::records::{HousekeepingRecord, TEMPERATURE_SENTINEL_C};
use meter_hal::env::{BatteryMonitor, TempSensor};
use tracing::{debug, info, warn};

use crate::clock::{Clock, delta_s};
use crate::imu::RotationCell;
use crate::queues::Producer;
use crate::sync::{AtomicF32, DataGate};

/// Supervisor cycle period.
const CYCLE: Duration = Duration::from_secs(10);

/// Slice the cycle sleep so a stop request is honored promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Policy events the supervisor reports to the top-level state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// No completed rotation within the configured sleep timeout.
    SleepTimeout,
    /// Battery under the cutoff for the configured number of
    /// consecutive samples. Terminal.
    FlatBattery,
}

/// The housekeeping supervisor task.
pub struct HousekeepingTask {
    left_sensor: Box<dyn TempSensor>,
    right_sensor: Box<dyn TempSensor>,
    battery: Box<dyn BatteryMonitor>,
    config: SharedConfig,
    rotation: Arc<RotationCell>,
    clock: Clock,
    gate: Arc<DataGate>,
    queue: Producer<HousekeepingRecord, SLOW_QUEUE_CAPACITY>,
    imu_temperature: Arc<AtomicF32>,
    /// Cached side temperatures consumed by the torque compensation.
    left_temperature: Arc<AtomicF32>,
    right_temperature: Arc<AtomicF32>,
    under_voltage_count: u32,
}

impl HousekeepingTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left_sensor: Box<dyn TempSensor>,
        right_sensor: Box<dyn TempSensor>,
        battery: Box<dyn BatteryMonitor>,
        config: SharedConfig,
        rotation: Arc<RotationCell>,
        clock: Clock,
        gate: Arc<DataGate>,
        queue: Producer<HousekeepingRecord, SLOW_QUEUE_CAPACITY>,
        imu_temperature: Arc<AtomicF32>,
        left_temperature: Arc<AtomicF32>,
        right_temperature: Arc<AtomicF32>,
    ) -> Self {
        Self {
            left_sensor,
            right_sensor,
            battery,
            config,
            rotation,
            clock,
            gate,
            queue,
            imu_temperature,
            left_temperature,
            right_temperature,
            under_voltage_count: 0,
        }
    }

    /// Task loop. Policy events go to `on_event` (wired to the
    /// top-level state machine by the runtime).
    pub fn run(
        mut self,
        running: Arc<AtomicBool>,
        on_event: impl Fn(SupervisorEvent),
    ) {
        info!("housekeeping supervisor started");
        while running.load(Ordering::Acquire) {
            if let Some(event) = self.step() {
                on_event(event);
            }
            let mut slept = Duration::ZERO;
            while slept < CYCLE && running.load(Ordering::Acquire) {
                std::thread::sleep(SLEEP_SLICE);
                slept += SLEEP_SLICE;
            }
        }
        debug!("housekeeping supervisor stopped");
    }

    /// One supervisor cycle.
    pub fn step(&mut self) -> Option<SupervisorEvent> {
        let config = self.config.snapshot();

        let left = read_or_sentinel(self.left_sensor.as_mut(), "left");
        let right = read_or_sentinel(self.right_sensor.as_mut(), "right");
        self.left_temperature.store(left);
        self.right_temperature.store(right);

        let battery_mv = match self.battery.read_millivolts() {
            Ok(mv) => Some(mv),
            Err(e) => {
                warn!("battery read failed: {e}");
                None
            }
        };

        let record = HousekeepingRecord {
            left_temperature_c: left,
            right_temperature_c: right,
            imu_temperature_c: self.imu_temperature.load(),
            battery_mv: battery_mv.unwrap_or(0.0),
            left_offset: config.left.zero_offset,
            right_offset: config.right.zero_offset,
        };
        if self.gate.accepting() {
            self.queue.send(record);
        }

        if let Some(mv) = battery_mv {
            if mv < config.battery.flat_cutoff_mv {
                self.under_voltage_count += 1;
                warn!(
                    mv,
                    count = self.under_voltage_count,
                    "battery under flat cutoff"
                );
                if self.under_voltage_count >= config.battery.flat_sample_count {
                    return Some(SupervisorEvent::FlatBattery);
                }
            } else {
                self.under_voltage_count = 0;
            }
        }

        if config.sleep_timeout_s > 0 {
            let idle_s = delta_s(self.clock.now_us(), self.rotation.snapshot().last_time_us);
            if idle_s > config.sleep_timeout_s as f32 {
                return Some(SupervisorEvent::SleepTimeout);
            }
        }

        None
    }
}

fn read_or_sentinel(sensor: &mut dyn TempSensor, side: &str) -> f32 {
    match sensor.read_temperature_c() {
        Ok(celsius) => celsius,
        Err(e) => {
            warn!(side, "temperature read failed: {e}");
            TEMPERATURE_SENTINEL_C
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use meter_common::config::Config;
    use meter_hal::sim::{SimBattery, SimTempSensor};

    use crate::queues::{Consumer, channel};

    struct Fixture {
        task: HousekeepingTask,
        queue: Consumer<HousekeepingRecord, SLOW_QUEUE_CAPACITY>,
        rotation: Arc<RotationCell>,
        clock: Clock,
        left_cell: Arc<AtomicF32>,
    }

    fn fixture(
        left: SimTempSensor,
        right: SimTempSensor,
        battery: SimBattery,
        config: Config,
    ) -> Fixture {
        let gate = Arc::new(DataGate::new());
        gate.set_accepting(true);
        let rotation = Arc::new(RotationCell::new());
        let clock = Clock::manual(0);
        let left_cell = Arc::new(AtomicF32::new(TEMPERATURE_SENTINEL_C));
        let (tx, rx) = channel();
        let task = HousekeepingTask::new(
            Box::new(left),
            Box::new(right),
            Box::new(battery),
            SharedConfig::new(config),
            Arc::clone(&rotation),
            clock.clone(),
            gate,
            tx,
            Arc::new(AtomicF32::new(30.0)),
            Arc::clone(&left_cell),
            Arc::new(AtomicF32::new(TEMPERATURE_SENTINEL_C)),
        );
        Fixture {
            task,
            queue: rx,
            rotation,
            clock,
            left_cell,
        }
    }

    #[test]
    fn record_carries_temperatures_battery_and_offsets() {
        let mut config = Config::default();
        config.left.zero_offset = 9_848_390.0;
        config.right.zero_offset = 6_252_516.0;
        let mut fx = fixture(
            SimTempSensor::fixed(24.0),
            SimTempSensor::fixed(26.5),
            SimBattery::constant(3712.0),
            config,
        );
        assert_eq!(fx.task.step(), None);
        let record = fx.queue.recv().unwrap();
        assert_eq!(record.left_temperature_c, 24.0);
        assert_eq!(record.right_temperature_c, 26.5);
        assert_eq!(record.imu_temperature_c, 30.0);
        assert_eq!(record.battery_mv, 3712.0);
        assert_eq!(record.left_offset, 9_848_390.0);
        assert_eq!(record.right_offset, 6_252_516.0);
        // The side temperature cache was refreshed for the torque path.
        assert_eq!(fx.left_cell.load(), 24.0);
    }

    #[test]
    fn unreadable_sensor_reports_sentinel_and_continues() {
        let mut fx = fixture(
            SimTempSensor::failing(),
            SimTempSensor::fixed(25.0),
            SimBattery::constant(3700.0),
            Config::default(),
        );
        assert_eq!(fx.task.step(), None);
        let record = fx.queue.recv().unwrap();
        assert_eq!(record.left_temperature_c, TEMPERATURE_SENTINEL_C);
        assert_eq!(record.right_temperature_c, 25.0);
    }

    #[test]
    fn flat_battery_after_consecutive_samples() {
        let mut config = Config::default();
        config.battery.flat_cutoff_mv = 3400.0;
        config.battery.flat_sample_count = 3;
        let mut fx = fixture(
            SimTempSensor::fixed(25.0),
            SimTempSensor::fixed(25.0),
            SimBattery::constant(3300.0),
            config,
        );
        assert_eq!(fx.task.step(), None);
        assert_eq!(fx.task.step(), None);
        assert_eq!(fx.task.step(), Some(SupervisorEvent::FlatBattery));
    }

    #[test]
    fn recovered_battery_resets_the_countdown() {
        let mut fx = fixture(
            SimTempSensor::fixed(25.0),
            SimTempSensor::fixed(25.0),
            SimBattery::sequence(vec![3300.0, 3300.0, 3600.0, 3300.0, 3300.0]),
            Config::default(),
        );
        assert_eq!(fx.task.step(), None);
        assert_eq!(fx.task.step(), None);
        // Recovery sample resets the count.
        assert_eq!(fx.task.step(), None);
        assert_eq!(fx.task.step(), None);
        assert_eq!(fx.task.step(), None);
        // A third consecutive low sample would now be needed.
        assert_eq!(fx.task.step(), Some(SupervisorEvent::FlatBattery));
    }

    #[test]
    fn sleep_timeout_fires_after_idle() {
        let mut config = Config::default();
        config.sleep_timeout_s = 30;
        let mut fx = fixture(
            SimTempSensor::fixed(25.0),
            SimTempSensor::fixed(25.0),
            SimBattery::constant(3700.0),
            config,
        );
        fx.rotation.complete(1_000_000);
        fx.clock.set_us(10_000_000);
        assert_eq!(fx.task.step(), None, "9 s idle is under the timeout");
        fx.clock.set_us(32_000_000);
        assert_eq!(fx.task.step(), Some(SupervisorEvent::SleepTimeout));
    }

    #[test]
    fn zero_timeout_disables_sleep() {
        let mut config = Config::default();
        config.sleep_timeout_s = 0;
        let mut fx = fixture(
            SimTempSensor::fixed(25.0),
            SimTempSensor::fixed(25.0),
            SimBattery::constant(3700.0),
            config,
        );
        fx.clock.set_us(4_000_000_000);
        assert_eq!(fx.task.step(), None);
    }
}
