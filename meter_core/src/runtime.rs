//! Runtime root: owns the shared cells, builds the task set, spawns the
//! task threads.
//!
//! A single owned structure replaces any file-scope singletons: every
//! shared value lives in an `Arc`-held cell created here and handed to
//! exactly the tasks that need it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use meter_common::config::{Config, SharedConfig};
use meter_common::records::{Side, TEMPERATURE_SENTINEL_C};
use meter_common::store::ConfigStore;
use meter_hal::env::{BatteryMonitor, TempSensor};
use meter_hal::imu::ImuSensor;
use meter_hal::strain::StrainAdc;
use tracing::warn;

use crate::clock::Clock;
use crate::connection::transport::Transport;
use crate::connection::{ConnectionQueues, ConnectionTask};
use crate::housekeeping::HousekeepingTask;
use crate::imu::{ImuTask, RotationCell};
use crate::kalman::{KalmanFilter, SharedFilter};
use crate::lowspeed::LowSpeedTask;
use crate::power::PowerController;
use crate::queues::channel;
use crate::rt;
use crate::side::{CalibrationCell, SideTask};
use crate::sync::{AtomicF32, DataGate, LinkBits, NotifyWord};

/// The sensor drivers the pipeline runs on.
pub struct SensorSet {
    pub imu: Box<dyn ImuSensor>,
    pub left_adc: Box<dyn StrainAdc>,
    pub right_adc: Box<dyn StrainAdc>,
    pub left_temp: Box<dyn TempSensor>,
    pub right_temp: Box<dyn TempSensor>,
    pub battery: Box<dyn BatteryMonitor>,
}

/// Shared cells exposed to the console, the command dispatch and tests.
#[derive(Clone)]
pub struct MeterShared {
    pub config: SharedConfig,
    pub gate: Arc<DataGate>,
    pub link_notify: Arc<NotifyWord>,
    pub rotation: Arc<RotationCell>,
    pub controller: Arc<PowerController>,
    pub left_calibration: Arc<CalibrationCell>,
    pub right_calibration: Arc<CalibrationCell>,
    pub running: Arc<AtomicBool>,
}

/// Fully wired but not yet spawned task set.
pub struct Runtime {
    imu_task: ImuTask,
    left_task: SideTask,
    right_task: SideTask,
    low_speed_task: LowSpeedTask,
    housekeeping_task: HousekeepingTask,
    connection_task: ConnectionTask,
    shared: MeterShared,
}

impl Runtime {
    /// Build every cell, queue and task. Nothing runs yet.
    pub fn new(
        config: Config,
        store: Option<Arc<ConfigStore>>,
        sensors: SensorSet,
        transport: Transport,
        clock: Clock,
    ) -> Self {
        let shared_config = SharedConfig::new(config.clone());
        let filter = Arc::new(SharedFilter::new(KalmanFilter::new(
            &config.kalman,
            clock.now_us(),
        )));
        let rotation = Arc::new(RotationCell::new());
        let gate = Arc::new(DataGate::new());
        let rendezvous = Arc::new(NotifyWord::new());
        let link_notify = Arc::new(NotifyWord::new());
        let running = Arc::new(AtomicBool::new(true));
        let controller = Arc::new(PowerController::new(
            Arc::clone(&link_notify),
            Arc::clone(&gate),
            Arc::clone(&running),
        ));

        let imu_temperature = Arc::new(AtomicF32::new(0.0));
        let left_temperature = Arc::new(AtomicF32::new(TEMPERATURE_SENTINEL_C));
        let right_temperature = Arc::new(AtomicF32::new(TEMPERATURE_SENTINEL_C));
        let left_power = Arc::new(AtomicF32::new(0.0));
        let right_power = Arc::new(AtomicF32::new(0.0));
        let left_calibration = Arc::new(CalibrationCell::new());
        let right_calibration = Arc::new(CalibrationCell::new());

        let (imu_tx, imu_rx) = channel();
        let (left_tx, left_rx) = channel();
        let (right_tx, right_rx) = channel();
        let (low_tx, low_rx) = channel();
        let (hk_tx, hk_rx) = channel();

        let imu_task = ImuTask::new(
            sensors.imu,
            Arc::clone(&filter),
            Arc::clone(&rotation),
            shared_config.clone(),
            Arc::clone(&gate),
            imu_tx,
            Arc::clone(&rendezvous),
            Arc::clone(&imu_temperature),
        )
        .with_controller(Arc::clone(&controller));

        let mut left_task = SideTask::new(
            Side::Left,
            sensors.left_adc,
            Arc::clone(&filter),
            Arc::clone(&rotation),
            shared_config.clone(),
            Arc::clone(&gate),
            left_tx,
            Arc::clone(&rendezvous),
            clock.clone(),
            Arc::clone(&left_temperature),
            Arc::clone(&left_power),
            Arc::clone(&left_calibration),
        );
        let mut right_task = SideTask::new(
            Side::Right,
            sensors.right_adc,
            Arc::clone(&filter),
            Arc::clone(&rotation),
            shared_config.clone(),
            Arc::clone(&gate),
            right_tx,
            Arc::clone(&rendezvous),
            clock.clone(),
            Arc::clone(&right_temperature),
            Arc::clone(&right_power),
            Arc::clone(&right_calibration),
        );
        if let Some(store) = &store {
            left_task = left_task.with_store(Arc::clone(store));
            right_task = right_task.with_store(Arc::clone(store));
        }

        let low_speed_task = LowSpeedTask::new(
            Arc::clone(&rendezvous),
            Arc::clone(&rotation),
            left_power,
            right_power,
            Arc::clone(&gate),
            low_tx,
        );

        let housekeeping_task = HousekeepingTask::new(
            sensors.left_temp,
            sensors.right_temp,
            sensors.battery,
            shared_config.clone(),
            Arc::clone(&rotation),
            clock.clone(),
            Arc::clone(&gate),
            hk_tx,
            imu_temperature,
            left_temperature,
            right_temperature,
        );

        let connection_task = ConnectionTask::new(
            transport,
            ConnectionQueues {
                imu: imu_rx,
                left: left_rx,
                right: right_rx,
                low_speed: low_rx,
                housekeeping: hk_rx,
            },
            Arc::clone(&link_notify),
            Arc::clone(&gate),
            shared_config.clone(),
            clock,
        );

        let shared = MeterShared {
            config: shared_config,
            gate,
            link_notify,
            rotation,
            controller,
            left_calibration,
            right_calibration,
            running,
        };

        Self {
            imu_task,
            left_task,
            right_task,
            low_speed_task,
            housekeeping_task,
            connection_task,
            shared,
        }
    }

    /// Spawn the task threads with their priorities.
    pub fn spawn(self) -> std::io::Result<MeterHandles> {
        if let Err(e) = rt::lock_memory() {
            warn!("memory locking unavailable: {e}");
        }

        let shared = self.shared.clone();
        let running = &shared.running;
        let mut threads = Vec::with_capacity(6);

        let imu_task = self.imu_task;
        threads.push(spawn_task("imu", rt::PRIORITY_IMU, Arc::clone(running), move |r| {
            imu_task.run(r)
        })?);

        let left_task = self.left_task;
        threads.push(spawn_task(
            "side-left",
            rt::PRIORITY_SIDE,
            Arc::clone(running),
            move |r| left_task.run(r),
        )?);

        let right_task = self.right_task;
        threads.push(spawn_task(
            "side-right",
            rt::PRIORITY_SIDE,
            Arc::clone(running),
            move |r| right_task.run(r),
        )?);

        let low_speed_task = self.low_speed_task;
        threads.push(spawn_task(
            "low-speed",
            rt::PRIORITY_LOW_SPEED,
            Arc::clone(running),
            move |r| low_speed_task.run(r),
        )?);

        let connection_task = self.connection_task;
        threads.push(spawn_task(
            "connection",
            rt::PRIORITY_CONNECTION,
            Arc::clone(running),
            move |r| connection_task.run(r),
        )?);

        let housekeeping_task = self.housekeeping_task;
        let controller = Arc::clone(&shared.controller);
        threads.push(spawn_task(
            "housekeeping",
            rt::PRIORITY_HOUSEKEEPING,
            Arc::clone(running),
            move |r| housekeeping_task.run(r, move |event| controller.supervise(event)),
        )?);

        Ok(MeterHandles { shared, threads })
    }
}

fn spawn_task(
    name: &str,
    priority: i32,
    running: Arc<AtomicBool>,
    body: impl FnOnce(Arc<AtomicBool>) + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    let task_name = name.to_owned();
    std::thread::Builder::new().name(task_name.clone()).spawn(move || {
        if let Err(e) = rt::set_current_thread_priority(priority) {
            warn!(task = %task_name, "running without RT priority: {e}");
        }
        body(running);
    })
}

// ─── Handles ────────────────────────────────────────────────────────

/// Running meter: shared cells plus the task threads.
pub struct MeterHandles {
    pub shared: MeterShared,
    threads: Vec<JoinHandle<()>>,
}

impl MeterHandles {
    /// Enable the connection subsystem (boot, or wake).
    pub fn enable_connection(&self) {
        self.shared.link_notify.notify(LinkBits::ENABLE.bits());
    }

    /// The task loops are still alive (cleared by the Flat transition).
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop every task and join the threads.
    pub fn shutdown(mut self) {
        self.shared.gate.set_accepting(false);
        self.shared.link_notify.notify(LinkBits::DISABLE.bits());
        self.shared.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("task thread panicked during shutdown");
            }
        }
    }
}
