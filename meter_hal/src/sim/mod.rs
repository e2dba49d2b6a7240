//! Scripted simulation drivers.
//!
//! Each driver replays a pre-built script of sensor events, which makes
//! the full acquisition pipeline runnable and testable without hardware.
//! Timestamps come from the scripts, so tests are deterministic.

mod env;
mod imu;
mod strain;

pub use env::{SimBattery, SimTempSensor};
pub use imu::{ImuBatch, RotationScript, SimImu, synth_sample};
pub use strain::{AdcEvent, SimStrainAdc};
