//! Temperature and battery monitoring traits.

use crate::error::SensorError;

/// Strain-gauge-side temperature sensor on the I²C bus.
pub trait TempSensor: Send {
    /// Trigger a conversion and block until the result is out
    /// (≈12 ms conversion time on the supported parts).
    fn read_temperature_c(&mut self) -> Result<f32, SensorError>;
}

/// Battery voltage monitor.
pub trait BatteryMonitor: Send {
    /// Battery voltage [mV].
    fn read_millivolts(&mut self) -> Result<f32, SensorError>;
}
