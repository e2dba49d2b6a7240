//! Six-axis IMU driver trait.

use std::f32::consts::PI;
use std::time::Duration;

use crate::error::SensorError;

/// Standard gravity [m/s²].
pub const STANDARD_GRAVITY: f32 = 9.80665;

/// Accelerometer counts → m/s², for a full-scale range in g.
#[inline]
pub fn accel_scale(range_g: f32) -> f32 {
    range_g * STANDARD_GRAVITY / 32767.0
}

/// Gyroscope counts → rad/s, for a full-scale range in °/s.
#[inline]
pub fn gyro_scale(range_dps: f32) -> f32 {
    range_dps * PI / 180.0 / 32767.0
}

/// One raw sample event drained from the IMU FIFO.
///
/// Readings are left in device counts; the acquisition core owns the
/// scaling to SI units because the full-scale ranges live in the
/// configuration snapshot, not in the driver.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    /// Raw accelerations (x, y, z) [counts].
    pub accel_raw: [i16; 3],
    /// Raw angular rates (x, y, z) [counts].
    pub gyro_raw: [i16; 3],
    /// Device die temperature, already scaled by the driver [°C].
    pub temperature_c: f32,
    /// Accelerometer validity flag from the sample header.
    pub accel_valid: bool,
    /// Gyroscope validity flag from the sample header.
    pub gyro_valid: bool,
}

impl ImuSample {
    /// Both sensors flagged the sample as valid.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.accel_valid && self.gyro_valid
    }
}

/// Six-axis IMU with a watermarked FIFO and an edge interrupt.
pub trait ImuSensor: Send {
    /// Block until the FIFO watermark interrupt fires, or `timeout`.
    ///
    /// Returns the capture timestamp [µs since boot] latched by the
    /// interrupt handler the moment the edge fired.
    fn wait_watermark(&mut self, timeout: Duration) -> Option<u32>;

    /// Drain every sample currently in the FIFO into `out`.
    ///
    /// `out` is cleared first; the caller reuses one buffer across
    /// interrupts to keep the hot path allocation-free.
    fn drain_fifo(&mut self, out: &mut Vec<ImuSample>) -> Result<(), SensorError>;

    /// FIFO overrun flag from the status register. Reading clears it.
    fn overrun(&mut self) -> bool;
}
