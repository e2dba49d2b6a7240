//! Strain-gauge ADC driver trait.

use std::time::Duration;

use crate::error::SensorError;

/// 24-bit strain-gauge ADC read over a bit-banged serial bus, with a
/// falling-edge data-ready line.
///
/// The data-ready handler detaches itself, latches `micros()`, and hands
/// the timestamp to the waiting task as the notification value; the task
/// re-attaches the interrupt after clocking the conversion out. Drivers
/// encapsulate that detach/re-attach cycle inside
/// [`StrainAdc::wait_ready`] / [`StrainAdc::read_raw`].
pub trait StrainAdc: Send {
    /// Block until a conversion is ready, or `timeout` (the per-side
    /// tasks pass 100 ms so a dead sensor cannot stall the rotation
    /// rendezvous).
    ///
    /// Returns the data-ready timestamp [µs since boot] latched in the
    /// interrupt handler.
    fn wait_ready(&mut self, timeout: Duration) -> Option<u32>;

    /// Clock the pending conversion off the bus.
    ///
    /// Normally 24 clocks. With `offset_pulse` set the device is driven
    /// with two extra clocks, arming its internal offset-calibration
    /// mode, and the two trailing bits are dropped from the result.
    fn read_raw(&mut self, offset_pulse: bool) -> Result<u32, SensorError>;
}
