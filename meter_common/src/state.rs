//! State enums for the two state machines in the firmware core.
//!
//! All enums use `#[repr(u8)]` for compact layout. The transition logic
//! lives in `meter_core` (`power` and `connection` modules); these types
//! only name the states so both the core and its consumers agree on them.

use serde::{Deserialize, Serialize};

// ─── Top-Level Meter State ──────────────────────────────────────────

/// Top-level meter lifecycle state.
///
/// `Flat` is terminal: it disables every wake source and is only left by
/// physically recharging and power-cycling the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MeterState {
    /// Sampling, fusing and streaming.
    Active = 0,
    /// Low-power idle; the IMU motion interrupt is the only wake source.
    Sleep = 1,
    /// Battery exhausted. Terminal.
    Flat = 2,
}

impl MeterState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Active),
            1 => Some(Self::Sleep),
            2 => Some(Self::Flat),
            _ => None,
        }
    }
}

impl Default for MeterState {
    fn default() -> Self {
        Self::Active
    }
}

// ─── Connection State ───────────────────────────────────────────────

/// Connection subsystem state.
///
/// `Disabled → Connect → Active → Shutdown → Disabled`, with `Connect`
/// re-entered from `Active` on transport-level connectivity loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LinkState {
    /// Transport released; waiting for an enable notification.
    Disabled = 0,
    /// Bringing the transport up; retries indefinitely until disabled.
    Connect = 1,
    /// Draining queues and publishing.
    Active = 2,
    /// Quiescing producers and releasing transport resources.
    Shutdown = 3,
}

impl LinkState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Disabled),
            1 => Some(Self::Connect),
            2 => Some(Self::Active),
            3 => Some(Self::Shutdown),
            _ => None,
        }
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::Disabled
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_state_u8_round_trip() {
        for state in [MeterState::Active, MeterState::Sleep, MeterState::Flat] {
            assert_eq!(MeterState::from_u8(state as u8), Some(state));
        }
        assert_eq!(MeterState::from_u8(3), None);
    }

    #[test]
    fn link_state_u8_round_trip() {
        for state in [
            LinkState::Disabled,
            LinkState::Connect,
            LinkState::Active,
            LinkState::Shutdown,
        ] {
            assert_eq!(LinkState::from_u8(state as u8), Some(state));
        }
        assert_eq!(LinkState::from_u8(4), None);
    }

    #[test]
    fn defaults() {
        assert_eq!(MeterState::default(), MeterState::Active);
        assert_eq!(LinkState::default(), LinkState::Disabled);
    }
}
