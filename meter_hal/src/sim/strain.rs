//! Scripted strain-ADC simulation.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::error::SensorError;
use crate::strain::StrainAdc;

/// One data-ready event: the latched timestamp and the conversion that
/// will be clocked out.
#[derive(Debug, Clone, Copy)]
pub struct AdcEvent {
    pub t_us: u32,
    pub raw: u32,
}

/// Scripted strain-ADC driver. An exhausted script behaves like a dead
/// sensor: every wait times out.
#[derive(Debug, Default)]
pub struct SimStrainAdc {
    script: VecDeque<AdcEvent>,
    current: Option<AdcEvent>,
    offset_pulse_reads: u32,
}

impl SimStrainAdc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one data-ready event.
    pub fn script_event(&mut self, t_us: u32, raw: u32) {
        self.script.push_back(AdcEvent { t_us, raw });
    }

    /// Append `n` events of the same raw value at a fixed interval.
    pub fn script_constant(&mut self, start_us: u32, interval_us: u32, n: u32, raw: u32) {
        for i in 0..n {
            self.script_event(start_us.wrapping_add(i.wrapping_mul(interval_us)), raw);
        }
    }

    /// How many reads were performed with the offset pulse armed.
    pub fn offset_pulse_reads(&self) -> u32 {
        self.offset_pulse_reads
    }

    /// Remaining scripted events (pending one included).
    pub fn remaining(&self) -> usize {
        self.script.len() + usize::from(self.current.is_some())
    }
}

impl StrainAdc for SimStrainAdc {
    fn wait_ready(&mut self, timeout: Duration) -> Option<u32> {
        if self.current.is_none() {
            self.current = self.script.pop_front();
        }
        match &self.current {
            Some(event) => Some(event.t_us),
            None => {
                trace!("sim adc script exhausted; timing out");
                thread::sleep(timeout.min(Duration::from_millis(5)));
                None
            }
        }
    }

    fn read_raw(&mut self, offset_pulse: bool) -> Result<u32, SensorError> {
        if offset_pulse {
            self.offset_pulse_reads += 1;
        }
        match self.current.take() {
            Some(event) => Ok(event.raw & 0x00FF_FFFF),
            None => Err(SensorError::NotReady),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_pair_wait_and_read() {
        let mut adc = SimStrainAdc::new();
        adc.script_event(100, 9_848_390);
        adc.script_event(200, 9_848_391);

        assert_eq!(adc.wait_ready(Duration::from_millis(1)), Some(100));
        assert_eq!(adc.read_raw(false).unwrap(), 9_848_390);
        assert_eq!(adc.wait_ready(Duration::from_millis(1)), Some(200));
        assert_eq!(adc.read_raw(false).unwrap(), 9_848_391);
        assert_eq!(adc.wait_ready(Duration::from_millis(1)), None);
    }

    #[test]
    fn read_without_ready_fails() {
        let mut adc = SimStrainAdc::new();
        assert!(matches!(adc.read_raw(false), Err(SensorError::NotReady)));
    }

    #[test]
    fn constant_script_spacing() {
        let mut adc = SimStrainAdc::new();
        adc.script_constant(0, 10_000, 3, 42);
        assert_eq!(adc.wait_ready(Duration::from_millis(1)), Some(0));
        adc.read_raw(false).unwrap();
        assert_eq!(adc.wait_ready(Duration::from_millis(1)), Some(10_000));
        adc.read_raw(true).unwrap();
        assert_eq!(adc.offset_pulse_reads(), 1);
    }

    #[test]
    fn raw_is_masked_to_24_bits() {
        let mut adc = SimStrainAdc::new();
        adc.script_event(0, 0xFFFF_FFFF);
        adc.wait_ready(Duration::from_millis(1));
        assert_eq!(adc.read_raw(false).unwrap(), 0x00FF_FFFF);
    }
}
