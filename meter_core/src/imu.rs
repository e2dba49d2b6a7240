//! IMU ingest task.
//!
//! Drains the IMU FIFO on each watermark interrupt, scales the raw
//! six-axis readings, removes the centripetal terms from the body-plane
//! accelerations, reconstructs the measured crank angle, feeds the
//! Kalman filter, emits decimated high-speed records, and detects
//! completed rotations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meter_common::config::{HIGH_SPEED_QUEUE_CAPACITY, SharedConfig};
use meter_common::records::ImuRecord;
use meter_hal::imu::{ImuSample, ImuSensor, accel_scale, gyro_scale};
use tracing::{debug, error, info, warn};

use crate::angle::{RotationDetector, normalize};
use crate::clock::delta_us;
use crate::kalman::SharedFilter;
use crate::power::PowerController;
use crate::queues::Producer;
use crate::sync::{AtomicF32, DataGate, NotifyWord, RendezvousBits};

/// How long one watermark wait blocks before re-checking the stop flag.
const WATERMARK_WAIT: Duration = Duration::from_millis(20);

// ─── Rotation Metadata ──────────────────────────────────────────────

/// Rotation metadata published by the IMU task on each completed
/// rotation and read by the per-side tasks and the low-speed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationMeta {
    /// Cumulative rotation count since boot. Monotonic non-decreasing.
    pub count: u32,
    /// Timestamp of the most recent completed rotation [µs].
    pub last_time_us: u32,
    /// Duration of the most recent rotation [µs].
    pub last_duration_us: u32,
}

/// The shared metadata cell. Publisher and consumers both go through
/// the same critical section.
#[derive(Debug, Default)]
pub struct RotationCell {
    inner: Mutex<RotationMeta>,
}

impl RotationCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent copy of the current metadata.
    pub fn snapshot(&self) -> RotationMeta {
        *self.lock()
    }

    /// Record a rotation completed at `t_us`; returns the new metadata.
    pub fn complete(&self, t_us: u32) -> RotationMeta {
        let mut meta = self.lock();
        meta.count += 1;
        meta.last_duration_us = delta_us(t_us, meta.last_time_us);
        meta.last_time_us = t_us;
        *meta
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RotationMeta> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ─── IMU Task ───────────────────────────────────────────────────────

/// The IMU ingest task. One instance; owns the filter's writer role.
pub struct ImuTask {
    driver: Box<dyn ImuSensor>,
    filter: Arc<SharedFilter>,
    rotation: Arc<RotationCell>,
    config: SharedConfig,
    gate: Arc<DataGate>,
    queue: Producer<ImuRecord, HIGH_SPEED_QUEUE_CAPACITY>,
    rendezvous: Arc<NotifyWord>,
    imu_temperature: Arc<AtomicF32>,
    controller: Option<Arc<PowerController>>,
    detector: RotationDetector,
    decimation_count: u32,
    invalid_samples: u32,
    fifo: Vec<ImuSample>,
}

impl ImuTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Box<dyn ImuSensor>,
        filter: Arc<SharedFilter>,
        rotation: Arc<RotationCell>,
        config: SharedConfig,
        gate: Arc<DataGate>,
        queue: Producer<ImuRecord, HIGH_SPEED_QUEUE_CAPACITY>,
        rendezvous: Arc<NotifyWord>,
        imu_temperature: Arc<AtomicF32>,
    ) -> Self {
        Self {
            driver,
            filter,
            rotation,
            config,
            gate,
            queue,
            rendezvous,
            imu_temperature,
            controller: None,
            detector: RotationDetector::new(),
            decimation_count: 0,
            invalid_samples: 0,
            fifo: Vec::with_capacity(32),
        }
    }

    /// Wire the top-level state machine so a completed rotation doubles
    /// as the motion-wake source while sleeping.
    pub fn with_controller(mut self, controller: Arc<PowerController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Samples dropped for invalid validity flags so far.
    pub fn invalid_samples(&self) -> u32 {
        self.invalid_samples
    }

    /// Task loop: wait for the watermark, drain, process.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!("imu task started");
        while running.load(Ordering::Acquire) {
            let Some(t_capture) = self.driver.wait_watermark(WATERMARK_WAIT) else {
                continue;
            };
            let mut fifo = std::mem::take(&mut self.fifo);
            match self.driver.drain_fifo(&mut fifo) {
                Ok(()) => {
                    if self.driver.overrun() {
                        warn!("imu fifo overrun; remaining samples dropped");
                    }
                    self.handle_batch(t_capture, &fifo);
                }
                Err(e) => warn!("imu fifo drain failed: {e}"),
            }
            self.fifo = fifo;
        }
        debug!("imu task stopped");
    }

    /// Process one watermark's worth of FIFO content. Every sample in
    /// the batch carries the interrupt's capture timestamp.
    pub fn handle_batch(&mut self, t_capture: u32, samples: &[ImuSample]) {
        let config = self.config.snapshot();
        let a_scale = accel_scale(config.imu.accel_range_g);
        let g_scale = gyro_scale(config.imu.gyro_range_dps);

        for sample in samples {
            if !sample.is_valid() {
                self.invalid_samples += 1;
                error!("invalid imu sample dropped (accel/gyro validity flag)");
                continue;
            }
            self.imu_temperature.store(sample.temperature_c);

            let accel = [
                sample.accel_raw[0] as f32 * a_scale,
                sample.accel_raw[1] as f32 * a_scale,
                sample.accel_raw[2] as f32 * a_scale,
            ];
            let gyro = [
                sample.gyro_raw[0] as f32 * g_scale,
                sample.gyro_raw[1] as f32 * g_scale,
                sample.gyro_raw[2] as f32 * g_scale,
            ];
            let omega = gyro[2];

            // Remove the centripetal terms so gravity dominates the
            // body-plane signal.
            let centripetal = omega * omega;
            let ax = accel[0] + config.imu.radius_x_m * centripetal;
            let ay = accel[1] + config.imu.radius_y_m * centripetal;

            let mut measured = normalize(ay.atan2(ax));
            if config.imu.invert_angle {
                measured = -measured;
            }

            let Some(estimate) = self.filter.update(measured, omega, t_capture) else {
                error!("non-finite imu measurement rejected");
                continue;
            };

            self.decimation_count += 1;
            if self.decimation_count >= config.imu.decimation {
                self.decimation_count = 0;
                if self.gate.accepting() {
                    self.queue.send(ImuRecord {
                        timestamp_us: t_capture,
                        velocity: estimate.velocity,
                        angle: estimate.angle,
                        accel,
                        gyro,
                    });
                }
            }

            if self.detector.advance(estimate.angle) {
                let meta = self.rotation.complete(t_capture);
                debug!(count = meta.count, duration_us = meta.last_duration_us, "rotation complete");
                self.rendezvous.notify(RendezvousBits::ROTATION.bits());
                if let Some(controller) = &self.controller {
                    controller.notify_motion();
                }
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use meter_common::config::Config;
    use meter_hal::sim::synth_sample;
    use std::f32::consts::PI;

    use crate::kalman::KalmanFilter;
    use crate::queues::{Consumer, channel};

    struct Fixture {
        task: ImuTask,
        queue: Consumer<ImuRecord, HIGH_SPEED_QUEUE_CAPACITY>,
        rotation: Arc<RotationCell>,
        rendezvous: Arc<NotifyWord>,
        gate: Arc<DataGate>,
        config: SharedConfig,
    }

    /// Driver stub for tests that feed `handle_batch` directly.
    struct NullImu;

    impl ImuSensor for NullImu {
        fn wait_watermark(&mut self, _timeout: Duration) -> Option<u32> {
            None
        }
        fn drain_fifo(&mut self, out: &mut Vec<ImuSample>) -> Result<(), meter_hal::SensorError> {
            out.clear();
            Ok(())
        }
        fn overrun(&mut self) -> bool {
            false
        }
    }

    fn fixture(config: Config) -> Fixture {
        let shared_config = SharedConfig::new(config.clone());
        let filter = Arc::new(SharedFilter::new(KalmanFilter::new(&config.kalman, 0)));
        let rotation = Arc::new(RotationCell::new());
        let gate = Arc::new(DataGate::new());
        gate.set_accepting(true);
        let rendezvous = Arc::new(NotifyWord::new());
        let (tx, rx) = channel();
        let task = ImuTask::new(
            Box::new(NullImu),
            filter,
            Arc::clone(&rotation),
            shared_config.clone(),
            Arc::clone(&gate),
            tx,
            Arc::clone(&rendezvous),
            Arc::new(AtomicF32::new(0.0)),
        );
        Fixture {
            task,
            queue: rx,
            rotation,
            rendezvous,
            gate,
            config: shared_config,
        }
    }

    /// Feed `n` samples of a uniform rotation at `omega`, one batch per
    /// sample, 10 ms apart, starting at angle −π + ε.
    fn feed_rotation(fx: &mut Fixture, n: u32, omega: f32) {
        let config = fx.config.snapshot();
        let mut theta = -PI + 1e-3;
        for i in 0..n {
            let t = 10_000u32.wrapping_mul(i + 1);
            let sample = synth_sample(&config.imu, theta, omega, 26.0);
            fx.task.handle_batch(t, &[sample]);
            theta = normalize(theta + omega * 0.01);
        }
    }

    #[test]
    fn uniform_rotation_counts_rotations() {
        let mut fx = fixture(Config::default());
        // One revolution per second for 2.5 s.
        feed_rotation(&mut fx, 250, 2.0 * PI);
        let meta = fx.rotation.snapshot();
        assert!(meta.count >= 2, "expected rotations, got {}", meta.count);
        // Rotation duration close to one second.
        assert!(
            (meta.last_duration_us as f32 - 1.0e6).abs() < 5.0e4,
            "duration {}",
            meta.last_duration_us
        );
        // The low-speed word saw the rotation bit.
        assert_ne!(fx.rendezvous.peek() & RendezvousBits::ROTATION.bits(), 0);
    }

    #[test]
    fn records_are_emitted_in_timestamp_order() {
        let mut fx = fixture(Config::default());
        feed_rotation(&mut fx, 50, 2.0 * PI);
        let mut out = Vec::new();
        fx.queue.drain_into(&mut out, 64);
        assert_eq!(out.len(), 50);
        assert!(
            out.windows(2).all(|w| w[0].timestamp_us < w[1].timestamp_us),
            "timestamps must be monotonic"
        );
        // Every emitted angle is normalized.
        assert!(out.iter().all(|r| r.angle > -PI && r.angle <= PI));
    }

    #[test]
    fn decimation_thins_the_stream() {
        let mut config = Config::default();
        config.imu.decimation = 5;
        let mut fx = fixture(config);
        feed_rotation(&mut fx, 50, 2.0 * PI);
        assert_eq!(fx.queue.len(), 10);
    }

    #[test]
    fn closed_gate_blocks_emission() {
        let mut fx = fixture(Config::default());
        fx.gate.set_accepting(false);
        feed_rotation(&mut fx, 50, 2.0 * PI);
        assert!(fx.queue.is_empty(), "no record may be enqueued with the gate closed");
    }

    #[test]
    fn invalid_samples_are_dropped_without_advancing_the_filter() {
        let mut fx = fixture(Config::default());
        let config = fx.config.snapshot();
        let good = synth_sample(&config.imu, 0.2, 1.0, 25.0);
        fx.task.handle_batch(10_000, &[good]);

        let bad = ImuSample {
            accel_valid: false,
            ..good
        };
        fx.task.handle_batch(20_000, &[bad]);
        assert_eq!(fx.task.invalid_samples(), 1);
        assert_eq!(fx.queue.len(), 1, "invalid sample must not emit a record");

        // Next valid sample's dt spans the gap; the filter still accepts it.
        fx.task.handle_batch(30_000, &[good]);
        assert_eq!(fx.queue.len(), 2);
    }

    #[test]
    fn reverse_rotation_produces_no_rotation_events() {
        let mut fx = fixture(Config::default());
        let config = fx.config.snapshot();
        let omega = -2.0 * PI;
        let mut theta = PI - 1e-3;
        for i in 0..250 {
            let t = 10_000u32.wrapping_mul(i + 1);
            let sample = synth_sample(&config.imu, theta, omega, 25.0);
            fx.task.handle_batch(t, &[sample]);
            theta = normalize(theta + omega * 0.01);
        }
        assert_eq!(fx.rotation.snapshot().count, 0);
    }

    #[test]
    fn imu_temperature_is_cached() {
        let temperature = Arc::new(AtomicF32::new(0.0));
        let config = Config::default();
        let shared_config = SharedConfig::new(config.clone());
        let filter = Arc::new(SharedFilter::new(KalmanFilter::new(&config.kalman, 0)));
        let (tx, _rx) = channel();
        let mut task = ImuTask::new(
            Box::new(NullImu),
            filter,
            Arc::new(RotationCell::new()),
            shared_config,
            Arc::new(DataGate::new()),
            tx,
            Arc::new(NotifyWord::new()),
            Arc::clone(&temperature),
        );
        let sample = synth_sample(&config.imu, 0.0, 0.0, 31.5);
        task.handle_batch(5_000, &[sample]);
        assert_eq!(temperature.load(), 31.5);
    }
}
