//! Scripted temperature and battery simulation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::env::{BatteryMonitor, TempSensor};
use crate::error::SensorError;

/// Settable temperature sensor. Cloning shares the underlying value, so
/// a test can keep a handle while the supervisor owns the boxed driver.
#[derive(Debug, Clone)]
pub struct SimTempSensor {
    value: Arc<Mutex<Result<f32, ()>>>,
}

impl SimTempSensor {
    /// Sensor that always reads `celsius`.
    pub fn fixed(celsius: f32) -> Self {
        Self {
            value: Arc::new(Mutex::new(Ok(celsius))),
        }
    }

    /// Sensor whose bus is down.
    pub fn failing() -> Self {
        Self {
            value: Arc::new(Mutex::new(Err(()))),
        }
    }

    /// Change the reading.
    pub fn set(&self, celsius: f32) {
        if let Ok(mut guard) = self.value.lock() {
            *guard = Ok(celsius);
        }
    }

    /// Start failing.
    pub fn fail(&self) {
        if let Ok(mut guard) = self.value.lock() {
            *guard = Err(());
        }
    }
}

impl TempSensor for SimTempSensor {
    fn read_temperature_c(&mut self) -> Result<f32, SensorError> {
        match self.value.lock() {
            Ok(guard) => (*guard).map_err(|_| SensorError::Bus("simulated I2C failure".into())),
            Err(_) => Err(SensorError::Bus("simulated I2C failure".into())),
        }
    }
}

/// Battery monitor replaying a voltage sequence, then holding the last
/// value. Cloning shares the sequence.
#[derive(Debug, Clone)]
pub struct SimBattery {
    inner: Arc<Mutex<BatteryScript>>,
}

#[derive(Debug)]
struct BatteryScript {
    sequence: VecDeque<f32>,
    last: f32,
}

impl SimBattery {
    /// Monitor that always reads `mv`.
    pub fn constant(mv: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BatteryScript {
                sequence: VecDeque::new(),
                last: mv,
            })),
        }
    }

    /// Monitor replaying `sequence`, then holding its final value.
    pub fn sequence(sequence: Vec<f32>) -> Self {
        let last = sequence.last().copied().unwrap_or(0.0);
        Self {
            inner: Arc::new(Mutex::new(BatteryScript {
                sequence: sequence.into(),
                last,
            })),
        }
    }

    /// Append readings to the sequence.
    pub fn push(&self, mv: f32) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.sequence.push_back(mv);
            guard.last = mv;
        }
    }
}

impl BatteryMonitor for SimBattery {
    fn read_millivolts(&mut self) -> Result<f32, SensorError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| SensorError::Bus("battery monitor poisoned".into()))?;
        if let Some(next) = guard.sequence.pop_front() {
            guard.last = next;
        }
        Ok(guard.last)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
