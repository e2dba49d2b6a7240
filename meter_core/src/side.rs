//! Per-side strain-ADC ingest task.
//!
//! Each pedal side runs one instance. The task waits on the ADC
//! data-ready notification (bounded at 100 ms so a dead sensor cannot
//! stall the rotation rendezvous), queries the filter's predict-only
//! path at the interrupt timestamp, clocks the conversion out, converts
//! to torque with temperature compensation, emits a high-speed record,
//! and integrates energy for the per-rotation average power.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meter_common::config::{HIGH_SPEED_QUEUE_CAPACITY, SharedConfig, StrainCalibration};
use meter_common::records::{Side, SideRecord, TEMPERATURE_SENTINEL_C};
use meter_common::store::ConfigStore;
use meter_hal::SensorError;
use meter_hal::strain::StrainAdc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, delta_s};
use crate::imu::RotationCell;
use crate::kalman::SharedFilter;
use crate::queues::Producer;
use crate::sync::{AtomicF32, DataGate, NotifyWord, RendezvousBits};

/// Per-side notify-wait bound.
const SAMPLE_WAIT: Duration = Duration::from_millis(100);

// ─── Zero-Offset Calibration ────────────────────────────────────────

/// Progress of one zero-offset averaging pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    /// No calibration armed; the sample takes the normal torque path.
    Inactive,
    /// Sample absorbed into the average; torque emission is skipped.
    Accumulating,
    /// This sample finished the countdown; the new offset is ready.
    Complete(f32),
}

#[derive(Debug, Default)]
struct CalibrationState {
    remaining: u32,
    total: u32,
    /// Raw readings summed in f64 so a 200-sample average of 24-bit
    /// values reproduces an exact constant input exactly.
    sum: f64,
}

/// Shared per-side calibration countdown, armed by the
/// `perform-adc-zero-offset` command (and the operator console).
#[derive(Debug, Default)]
pub struct CalibrationCell {
    inner: Mutex<CalibrationState>,
}

impl CalibrationCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm an averaging pass over `samples` readings.
    pub fn arm(&self, samples: u32) {
        let mut state = self.lock();
        state.remaining = samples;
        state.total = samples;
        state.sum = 0.0;
    }

    /// A countdown is in progress (drives the ADC offset pulse mode).
    pub fn active(&self) -> bool {
        self.lock().remaining > 0
    }

    /// Absorb one raw reading into the running average.
    pub fn absorb(&self, raw: u32) -> CalibrationStep {
        let mut state = self.lock();
        if state.remaining == 0 {
            return CalibrationStep::Inactive;
        }
        state.sum += raw as f64;
        state.remaining -= 1;
        if state.remaining == 0 {
            CalibrationStep::Complete((state.sum / state.total as f64) as f32)
        } else {
            CalibrationStep::Accumulating
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CalibrationState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ─── Side Task ──────────────────────────────────────────────────────

/// One pedal side's ingest task.
pub struct SideTask {
    side: Side,
    adc: Box<dyn StrainAdc>,
    filter: Arc<SharedFilter>,
    rotation: Arc<RotationCell>,
    config: SharedConfig,
    store: Option<Arc<ConfigStore>>,
    gate: Arc<DataGate>,
    queue: Producer<SideRecord, HIGH_SPEED_QUEUE_CAPACITY>,
    rendezvous: Arc<NotifyWord>,
    clock: Clock,
    /// Cached side temperature, written by the housekeeping supervisor.
    temperature: Arc<AtomicF32>,
    /// Published per-rotation average, read by the low-speed task after
    /// the rendezvous notification; no further synchronization needed.
    average_power: Arc<AtomicF32>,
    calibration: Arc<CalibrationCell>,
    energy_j: f32,
    t_last_sample_us: u32,
    segment_start_us: u32,
    samples_in_segment: u32,
    observed_rotations: u32,
}

impl SideTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        side: Side,
        adc: Box<dyn StrainAdc>,
        filter: Arc<SharedFilter>,
        rotation: Arc<RotationCell>,
        config: SharedConfig,
        gate: Arc<DataGate>,
        queue: Producer<SideRecord, HIGH_SPEED_QUEUE_CAPACITY>,
        rendezvous: Arc<NotifyWord>,
        clock: Clock,
        temperature: Arc<AtomicF32>,
        average_power: Arc<AtomicF32>,
        calibration: Arc<CalibrationCell>,
    ) -> Self {
        let now = clock.now_us();
        Self {
            side,
            adc,
            filter,
            rotation,
            config,
            store: None,
            gate,
            queue,
            rendezvous,
            clock,
            temperature,
            average_power,
            calibration,
            energy_j: 0.0,
            t_last_sample_us: now,
            segment_start_us: now,
            samples_in_segment: 0,
            observed_rotations: 0,
        }
    }

    /// Persist the configuration after a finished calibration pass.
    pub fn with_store(mut self, store: Arc<ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Task loop.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!(side = self.side.name(), "side task started");
        while running.load(Ordering::Acquire) {
            self.step();
        }
        debug!(side = self.side.name(), "side task stopped");
    }

    /// One wait/process cycle. The timeout path keeps the rotation
    /// rendezvous alive when this side's sensor stops delivering.
    pub fn step(&mut self) {
        match self.adc.wait_ready(SAMPLE_WAIT) {
            Some(t_interrupt) => {
                if let Err(e) = self.handle_sample(t_interrupt) {
                    warn!(side = self.side.name(), "adc read failed: {e}");
                }
                self.rotation_bookkeeping(t_interrupt);
            }
            None => {
                let t_now = self.clock.now_us();
                self.rotation_bookkeeping(t_now);
            }
        }
    }

    fn handle_sample(&mut self, t_interrupt: u32) -> Result<(), SensorError> {
        let config = self.config.snapshot();
        let prediction = self.filter.predict(t_interrupt);

        // With an armed offset pass the ADC is clocked with the extra
        // calibration pulses and the trailing bits dropped.
        let offset_mode = self.calibration.active();
        let raw = self.adc.read_raw(offset_mode)?;

        match self.calibration.absorb(raw) {
            CalibrationStep::Complete(offset) => self.finish_calibration(offset),
            CalibrationStep::Accumulating => {}
            CalibrationStep::Inactive => {
                let calibration = config.calibration(self.side);
                let torque = self.torque(raw, calibration);
                if self.gate.accepting() {
                    self.queue.send(SideRecord {
                        timestamp_us: t_interrupt,
                        velocity: prediction.velocity,
                        angle: prediction.angle,
                        raw: raw & SideRecord::RAW_MASK,
                        torque,
                        power: torque * prediction.velocity,
                    });
                }
                self.energy_j +=
                    prediction.velocity * torque * delta_s(t_interrupt, self.t_last_sample_us);
            }
        }
        self.t_last_sample_us = t_interrupt;
        self.samples_in_segment += 1;
        Ok(())
    }

    /// τ = (raw − zero_offset) · coefficient · (1 − k_T · (T − T_ref)).
    ///
    /// The sentinel temperature (side sensor unreadable) disables the
    /// compensation term rather than applying a wild correction.
    fn torque(&self, raw: u32, calibration: &StrainCalibration) -> f32 {
        let temperature = self.temperature.load();
        let compensation = if temperature <= TEMPERATURE_SENTINEL_C + 1.0 {
            1.0
        } else {
            1.0 - calibration.temperature_coefficient
                * (temperature - calibration.temperature_reference_c)
        };
        (raw as f32 - calibration.zero_offset) * calibration.coefficient * compensation
    }

    fn finish_calibration(&self, offset: f32) {
        info!(side = self.side.name(), offset, "zero-offset calibration complete");
        self.config
            .update(|config| config.calibration_mut(self.side).zero_offset = offset);
        if let Some(store) = &self.store {
            let snapshot = self.config.snapshot();
            if let Err(e) = store.save(&snapshot) {
                warn!("failed to persist calibrated offset: {e}");
            }
        }
    }

    /// Publish the per-rotation average when the IMU-maintained counter
    /// moved since this side last looked.
    ///
    /// A side whose sensor delivered nothing during the rotation cuts
    /// its segment without joining the rendezvous: the low-speed task's
    /// own bound then reports the dead-side result (power 0, balance
    /// 50) instead of attributing everything to the live side.
    fn rotation_bookkeeping(&mut self, t_now: u32) {
        let rotations = self.rotation.snapshot().count;
        if rotations == self.observed_rotations {
            return;
        }
        self.observed_rotations = rotations;

        let segment_s = delta_s(t_now, self.segment_start_us);
        let average = if segment_s > 0.0 {
            self.energy_j / segment_s
        } else {
            0.0
        };
        self.average_power.store(average);
        self.segment_start_us = t_now;
        self.energy_j = 0.0;

        let had_samples = self.samples_in_segment > 0;
        self.samples_in_segment = 0;
        if had_samples {
            let bit = match self.side {
                Side::Left => RendezvousBits::LEFT,
                Side::Right => RendezvousBits::RIGHT,
            };
            self.rendezvous.notify(bit.bits());
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use meter_common::config::{Config, ZERO_OFFSET_SAMPLES};
    use meter_hal::sim::SimStrainAdc;

    use crate::kalman::KalmanFilter;
    use crate::queues::{Consumer, channel};

    struct Fixture {
        task: SideTask,
        queue: Consumer<SideRecord, HIGH_SPEED_QUEUE_CAPACITY>,
        rotation: Arc<RotationCell>,
        rendezvous: Arc<NotifyWord>,
        config: SharedConfig,
        calibration: Arc<CalibrationCell>,
        average_power: Arc<AtomicF32>,
        temperature: Arc<AtomicF32>,
        filter: Arc<SharedFilter>,
        clock: Clock,
    }

    fn fixture(side: Side, adc: SimStrainAdc, config: Config) -> Fixture {
        let shared_config = SharedConfig::new(config.clone());
        let filter = Arc::new(SharedFilter::new(KalmanFilter::new(&config.kalman, 0)));
        let rotation = Arc::new(RotationCell::new());
        let gate = Arc::new(DataGate::new());
        gate.set_accepting(true);
        let rendezvous = Arc::new(NotifyWord::new());
        let calibration = Arc::new(CalibrationCell::new());
        let average_power = Arc::new(AtomicF32::new(0.0));
        let temperature = Arc::new(AtomicF32::new(TEMPERATURE_SENTINEL_C));
        let clock = Clock::manual(0);
        let (tx, rx) = channel();
        let task = SideTask::new(
            side,
            Box::new(adc),
            Arc::clone(&filter),
            Arc::clone(&rotation),
            shared_config.clone(),
            gate,
            tx,
            Arc::clone(&rendezvous),
            clock.clone(),
            Arc::clone(&temperature),
            Arc::clone(&average_power),
            Arc::clone(&calibration),
        );
        Fixture {
            task,
            queue: rx,
            rotation,
            rendezvous,
            config: shared_config,
            calibration,
            average_power,
            temperature,
            filter,
            clock,
        }
    }

    #[test]
    fn record_power_is_torque_times_velocity() {
        let mut config = Config::default();
        config.left.zero_offset = 1_000_000.0;
        config.left.coefficient = 2.5e-6;
        let mut adc = SimStrainAdc::new();
        adc.script_constant(10_000, 10_000, 20, 1_400_000);
        let mut fx = fixture(Side::Left, adc, config);
        // Give the filter a known velocity.
        fx.filter.update(0.0, 3.0, 5_000);

        for _ in 0..20 {
            fx.task.step();
        }
        let mut out = Vec::new();
        fx.queue.drain_into(&mut out, 32);
        assert_eq!(out.len(), 20);
        for record in &out {
            assert_eq!(record.power, record.torque * record.velocity, "bit-exact");
            assert_eq!(record.raw, 1_400_000);
        }
        assert!(
            out.windows(2).all(|w| w[0].timestamp_us < w[1].timestamp_us),
            "per-side timestamps are monotonic"
        );
    }

    #[test]
    fn zero_offset_calibration_is_exact() {
        let mut adc = SimStrainAdc::new();
        adc.script_constant(10_000, 5_000, ZERO_OFFSET_SAMPLES, 9_848_390);
        let mut fx = fixture(Side::Left, adc, Config::default());
        fx.calibration.arm(ZERO_OFFSET_SAMPLES);

        for _ in 0..ZERO_OFFSET_SAMPLES {
            fx.task.step();
        }
        assert_eq!(
            fx.config.snapshot().left.zero_offset,
            9_848_390.0,
            "200-sample average of a constant input is exact"
        );
        // No torque records were emitted while calibrating.
        assert!(fx.queue.is_empty());
        assert!(!fx.calibration.active());
    }

    #[test]
    fn torque_is_exactly_zero_on_offset_raw() {
        let mut config = Config::default();
        config.right.zero_offset = 6_252_516.0;
        config.right.coefficient = 1.0;
        let mut adc = SimStrainAdc::new();
        adc.script_event(10_000, 6_252_516);
        let mut fx = fixture(Side::Right, adc, config);
        fx.task.step();
        let record = fx.queue.recv().unwrap();
        assert_eq!(record.torque, 0.0);
        assert_eq!(record.power, 0.0);
    }

    #[test]
    fn temperature_compensation_scales_torque() {
        let mut config = Config::default();
        config.left.zero_offset = 0.0;
        config.left.coefficient = 1.0;
        config.left.temperature_reference_c = 25.0;
        config.left.temperature_coefficient = 0.01;
        let mut adc = SimStrainAdc::new();
        adc.script_event(10_000, 100);
        adc.script_event(20_000, 100);
        let mut fx = fixture(Side::Left, adc, config);

        // Sentinel temperature: no compensation.
        fx.task.step();
        assert_eq!(fx.queue.recv().unwrap().torque, 100.0);

        // 10 °C above reference with k = 0.01 → factor 0.9.
        fx.temperature.store(35.0);
        fx.task.step();
        let compensated = fx.queue.recv().unwrap().torque;
        assert!((compensated - 90.0).abs() < 1e-3, "got {compensated}");
    }

    #[test]
    fn rotation_publishes_average_power_and_notifies() {
        let mut config = Config::default();
        config.left.zero_offset = 0.0;
        config.left.coefficient = 1.0;
        let mut adc = SimStrainAdc::new();
        // Samples every 10 ms, raw 10 counts → torque 10 N·m.
        adc.script_constant(10_000, 10_000, 101, 10);
        let mut fx = fixture(Side::Left, adc, config);
        // Constant ω = 2 rad/s.
        fx.filter.update(0.0, 2.0, 0);

        // 50 samples, then a rotation completes at 510 ms.
        for _ in 0..50 {
            fx.task.step();
        }
        fx.rotation.complete(510_000);
        fx.task.step();

        let average = fx.average_power.load();
        // ∫ω·τ dt over the segment ≈ 2 · 10 · 0.51 s across 0.51 s.
        assert!((average - 20.0).abs() < 1.5, "average {average}");
        assert_ne!(fx.rendezvous.peek() & RendezvousBits::LEFT.bits(), 0);

        for _ in 0..49 {
            fx.task.step();
        }
        // Energy was re-zeroed at the cut; a second rotation sees only
        // the second segment.
        fx.rotation.complete(1_005_000);
        fx.task.step();
        let second = fx.average_power.load();
        assert!((second - 20.0).abs() < 1.5, "second segment average {second}");
    }

    #[test]
    fn dead_sensor_cuts_the_segment_without_joining_the_rendezvous() {
        // No scripted samples: every wait times out.
        let adc = SimStrainAdc::new();
        let mut fx = fixture(Side::Right, adc, Config::default());
        fx.clock.set_us(1_000_000);
        fx.rotation.complete(900_000);

        fx.task.step();
        assert_eq!(
            fx.rendezvous.peek() & RendezvousBits::RIGHT.bits(),
            0,
            "an empty segment must not join the rendezvous"
        );
        assert_eq!(fx.average_power.load(), 0.0);
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn slow_sensor_joins_the_rendezvous_from_the_timeout_path() {
        let mut config = Config::default();
        config.left.coefficient = 1.0;
        let mut adc = SimStrainAdc::new();
        adc.script_event(10_000, 100);
        let mut fx = fixture(Side::Left, adc, config);

        // One sample lands, then the sensor goes quiet.
        fx.task.step();
        fx.rotation.complete(500_000);
        fx.clock.set_us(600_000);
        // Timeout path: the segment had a sample, so the cut notifies.
        fx.task.step();
        assert_ne!(fx.rendezvous.peek() & RendezvousBits::LEFT.bits(), 0);
    }

    #[test]
    fn offset_pulse_mode_follows_armed_calibration() {
        let mut adc = SimStrainAdc::new();
        adc.script_constant(10_000, 5_000, 3, 500);
        let mut fx = fixture(Side::Left, adc, Config::default());
        fx.calibration.arm(2);
        fx.task.step();
        fx.task.step();
        // Calibration finished; the third read goes back to 24 clocks.
        fx.task.step();
        assert!(!fx.calibration.active());
    }
}
