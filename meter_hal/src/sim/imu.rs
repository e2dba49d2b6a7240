//! Scripted IMU simulation.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::thread;
use std::time::Duration;

use meter_common::config::ImuConfig;

use crate::error::SensorError;
use crate::imu::{ImuSample, ImuSensor, STANDARD_GRAVITY, accel_scale, gyro_scale};

/// One watermark interrupt worth of FIFO content.
#[derive(Debug, Clone)]
pub struct ImuBatch {
    /// Timestamp latched when the watermark edge fired [µs].
    pub t_capture_us: u32,
    /// FIFO content drained by the task.
    pub samples: Vec<ImuSample>,
}

/// Parameters for a synthetic constant-rate rotation.
#[derive(Debug, Clone, Copy)]
pub struct RotationScript {
    /// Timestamp of the first sample [µs].
    pub start_us: u32,
    /// Sample spacing [µs].
    pub interval_us: u32,
    /// Number of samples to generate.
    pub samples: u32,
    /// Constant angular velocity [rad/s].
    pub omega_rad_s: f32,
    /// Crank angle at the first sample [rad].
    pub start_angle_rad: f32,
    /// Samples per watermark batch (1 = one interrupt per sample).
    pub batch_len: u32,
    /// Die temperature reported on every sample [°C].
    pub temperature_c: f32,
}

/// Build one raw sample whose accelerations reconstruct `angle` after
/// the core applies its centripetal correction and sign convention.
///
/// The inverse of the ingest path: gravity is projected onto the body
/// plane at the target reconstruction angle, then the centripetal terms
/// the core will add back are subtracted out.
pub fn synth_sample(config: &ImuConfig, angle: f32, omega: f32, temperature_c: f32) -> ImuSample {
    let reconstructed = if config.invert_angle { -angle } else { angle };
    let a_scale = accel_scale(config.accel_range_g);
    let g_scale = gyro_scale(config.gyro_range_dps);

    let centripetal = omega * omega;
    let ax = STANDARD_GRAVITY * reconstructed.cos() - config.radius_x_m * centripetal;
    let ay = STANDARD_GRAVITY * reconstructed.sin() - config.radius_y_m * centripetal;

    let counts = |value: f32, scale: f32| (value / scale).round().clamp(-32767.0, 32767.0) as i16;

    ImuSample {
        accel_raw: [counts(ax, a_scale), counts(ay, a_scale), 0],
        gyro_raw: [0, 0, counts(omega, g_scale)],
        temperature_c,
        accel_valid: true,
        gyro_valid: true,
    }
}

fn wrap_angle(theta: f32) -> f32 {
    let mut t = theta;
    while t > PI {
        t -= 2.0 * PI;
    }
    while t <= -PI {
        t += 2.0 * PI;
    }
    t
}

/// Scripted IMU driver.
#[derive(Debug, Default)]
pub struct SimImu {
    script: VecDeque<ImuBatch>,
    overrun: bool,
}

impl SimImu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one pre-built batch.
    pub fn push_batch(&mut self, batch: ImuBatch) {
        self.script.push_back(batch);
    }

    /// Append a synthetic constant-rate rotation (see [`RotationScript`]).
    pub fn script_rotation(&mut self, config: &ImuConfig, script: RotationScript) {
        let mut angle = script.start_angle_rad;
        let dt_s = script.interval_us as f32 * 1e-6;
        let mut batch: Vec<ImuSample> = Vec::new();

        for i in 0..script.samples {
            batch.push(synth_sample(config, angle, script.omega_rad_s, script.temperature_c));
            let t = script.start_us.wrapping_add(i.wrapping_mul(script.interval_us));
            angle = wrap_angle(angle + script.omega_rad_s * dt_s);

            if batch.len() as u32 >= script.batch_len.max(1) || i + 1 == script.samples {
                self.script.push_back(ImuBatch {
                    t_capture_us: t,
                    samples: std::mem::take(&mut batch),
                });
            }
        }
    }

    /// Mark the next status read as an overrun.
    pub fn flag_overrun(&mut self) {
        self.overrun = true;
    }

    /// Remaining scripted batches.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl ImuSensor for SimImu {
    fn wait_watermark(&mut self, timeout: Duration) -> Option<u32> {
        match self.script.front() {
            Some(batch) => Some(batch.t_capture_us),
            None => {
                thread::sleep(timeout.min(Duration::from_millis(5)));
                None
            }
        }
    }

    fn drain_fifo(&mut self, out: &mut Vec<ImuSample>) -> Result<(), SensorError> {
        out.clear();
        match self.script.pop_front() {
            Some(batch) => {
                out.extend(batch.samples);
                Ok(())
            }
            None => Err(SensorError::NotReady),
        }
    }

    fn overrun(&mut self) -> bool {
        std::mem::take(&mut self.overrun)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
