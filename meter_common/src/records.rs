//! Data records produced by the acquisition pipeline.
//!
//! Two record families exist:
//!
//! - **High-speed records** ([`ImuRecord`], [`SideRecord`]) are packed into
//!   fixed little-endian byte layouts and streamed in contiguous binary
//!   batches. Their wire sizes are load-bearing for existing consumers and
//!   pinned by compile-time assertions.
//! - **Slow records** ([`LowSpeedRecord`], [`HousekeepingRecord`],
//!   [`AboutRecord`]) are published as JSON key-value payloads; the key
//!   names are fixed by existing consumers.
//!
//! All wire values are little-endian; floats are IEEE-754 binary32.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

// ─── Side Identifier ────────────────────────────────────────────────

/// Pedal side. Each side has its own strain ADC, ingest task and queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    /// Lower-case name, used in log messages and JSON keys.
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

// ─── IMU Record (36 bytes) ──────────────────────────────────────────

/// One post-filter IMU sample.
///
/// Timestamp is microseconds since boot in an unsigned 32-bit counter
/// (wraps at ≈71.6 minutes). `velocity` and `angle` are the filter state
/// after the update that consumed this sample; the raw six-axis readings
/// follow in scaled SI units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuRecord {
    /// Capture timestamp [µs since boot], latched in the interrupt handler.
    pub timestamp_us: u32,
    /// Angular velocity after the filter update [rad/s].
    pub velocity: f32,
    /// Crank angle after the filter update, in (−π, π] [rad].
    pub angle: f32,
    /// Linear accelerations (x, y, z) [m/s²].
    pub accel: [f32; 3],
    /// Angular rates (x, y, z) [rad/s].
    pub gyro: [f32; 3],
}

impl ImuRecord {
    /// Serialized size: 12-byte base header + six floats.
    pub const WIRE_SIZE: usize = 36;

    /// Pack into the fixed little-endian wire layout.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.timestamp_us.to_le_bytes());
        buf[4..8].copy_from_slice(&self.velocity.to_le_bytes());
        buf[8..12].copy_from_slice(&self.angle.to_le_bytes());
        for (i, v) in self.accel.iter().chain(self.gyro.iter()).enumerate() {
            let off = 12 + i * 4;
            buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
        }
        buf
    }

    /// Unpack from the wire layout produced by [`Self::to_bytes`].
    pub fn from_bytes(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        let f32_at = |off: usize| f32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        Self {
            timestamp_us: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            velocity: f32_at(4),
            angle: f32_at(8),
            accel: [f32_at(12), f32_at(16), f32_at(20)],
            gyro: [f32_at(24), f32_at(28), f32_at(32)],
        }
    }
}

const_assert_eq!(ImuRecord::WIRE_SIZE, 36);

// ─── Side High-Speed Record (24 bytes) ──────────────────────────────

/// One strain-gauge sample for a single pedal side.
///
/// Shares the 12-byte (timestamp, velocity, angle) base header with
/// [`ImuRecord`]; velocity and angle come from the filter's predict-only
/// query at the ADC interrupt timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SideRecord {
    /// ADC data-ready timestamp [µs since boot].
    pub timestamp_us: u32,
    /// Predicted angular velocity at `timestamp_us` [rad/s].
    pub velocity: f32,
    /// Predicted crank angle at `timestamp_us`, in (−π, π] [rad].
    pub angle: f32,
    /// Raw 24-bit ADC reading, stored in the low bits of a 32-bit field.
    pub raw: u32,
    /// Torque [N·m].
    pub torque: f32,
    /// Instantaneous power: `torque · velocity` [W].
    pub power: f32,
}

impl SideRecord {
    /// Serialized size: 12-byte base header + raw + torque + power.
    pub const WIRE_SIZE: usize = 24;

    /// Mask for the 24 significant bits of the raw reading.
    pub const RAW_MASK: u32 = 0x00FF_FFFF;

    /// Pack into the fixed little-endian wire layout.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.timestamp_us.to_le_bytes());
        buf[4..8].copy_from_slice(&self.velocity.to_le_bytes());
        buf[8..12].copy_from_slice(&self.angle.to_le_bytes());
        buf[12..16].copy_from_slice(&(self.raw & Self::RAW_MASK).to_le_bytes());
        buf[16..20].copy_from_slice(&self.torque.to_le_bytes());
        buf[20..24].copy_from_slice(&self.power.to_le_bytes());
        buf
    }

    /// Unpack from the wire layout produced by [`Self::to_bytes`].
    pub fn from_bytes(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        let f32_at = |off: usize| f32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        Self {
            timestamp_us: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            velocity: f32_at(4),
            angle: f32_at(8),
            raw: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            torque: f32_at(16),
            power: f32_at(20),
        }
    }
}

const_assert_eq!(SideRecord::WIRE_SIZE, 24);

// ─── Low-Speed Record (per-rotation summary) ────────────────────────

/// Per-rotation summary, published as a JSON key-value payload.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LowSpeedRecord {
    /// Timestamp of the most recent complete rotation [µs since boot].
    #[serde(rename = "timestamp")]
    pub rotation_time_us: u32,
    /// Cadence derived from the last rotation's duration [RPM].
    pub cadence: f32,
    /// Cumulative rotation count since boot.
    pub rotations: u32,
    /// Total power over the last rotation: left + right averages [W].
    /// Zero when the rendezvous timed out.
    pub power: f32,
    /// Percentage of total power attributed to the right side.
    /// 0 = all-left, 100 = all-right, 50 = balanced (and on timeout).
    pub balance: f32,
}

// ─── Housekeeping Record ────────────────────────────────────────────

/// Temperature unreadable sentinel (I²C failure on the side sensor).
pub const TEMPERATURE_SENTINEL_C: f32 = -1000.0;

/// Slow housekeeping snapshot: temperatures, battery, zero offsets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HousekeepingRecord {
    /// Left strain-gauge-side temperature [°C]; sentinel −1000.0 if unreadable.
    pub left_temperature_c: f32,
    /// Right strain-gauge-side temperature [°C]; sentinel −1000.0 if unreadable.
    pub right_temperature_c: f32,
    /// Last IMU die temperature cached by the IMU task [°C].
    pub imu_temperature_c: f32,
    /// Battery voltage [mV].
    pub battery_mv: f32,
    /// Left ADC zero offset currently applied by the torque formula.
    pub left_offset: f32,
    /// Right ADC zero offset currently applied by the torque formula.
    pub right_offset: f32,
}

/// JSON shape for [`HousekeepingRecord`]; key names fixed by consumers.
#[derive(Debug, Serialize)]
struct HousekeepingPayload {
    temps: TemperaturePayload,
    battery: f32,
    #[serde(rename = "left-offset")]
    left_offset: f32,
    #[serde(rename = "right-offset")]
    right_offset: f32,
}

#[derive(Debug, Serialize)]
struct TemperaturePayload {
    left: f32,
    right: f32,
    imu: f32,
}

impl HousekeepingRecord {
    /// Serialize into the consumer-facing JSON payload.
    pub fn to_json(&self) -> String {
        let payload = HousekeepingPayload {
            temps: TemperaturePayload {
                left: self.left_temperature_c,
                right: self.right_temperature_c,
                imu: self.imu_temperature_c,
            },
            battery: self.battery_mv,
            left_offset: self.left_offset,
            right_offset: self.right_offset,
        };
        // Serialization of a plain numeric struct cannot fail.
        serde_json::to_string(&payload).unwrap_or_default()
    }
}

// ─── About-Device Record ────────────────────────────────────────────

/// Device identification, published once when a transport attaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboutRecord {
    /// Device name advertised on the transport.
    pub name: String,
    /// Build timestamp string.
    pub compiled: String,
    /// Firmware version.
    pub sw_version: String,
    /// Hardware revision.
    pub hw_version: String,
    /// Connection timestamp [µs since boot].
    #[serde(rename = "connect-time")]
    pub connect_time_us: u32,
    /// Active strain calibration, mirrored from the configuration snapshot.
    pub calibration: serde_json::Value,
    /// Transport MAC/identity string.
    pub mac: String,
}

impl AboutRecord {
    /// Serialize into the consumer-facing JSON payload.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imu_record_round_trip() {
        let rec = ImuRecord {
            timestamp_us: 123_456_789,
            velocity: 6.2831855,
            angle: -1.5707964,
            accel: [0.25, -9.81, 0.0],
            gyro: [0.01, -0.02, 6.28],
        };
        assert_eq!(ImuRecord::from_bytes(&rec.to_bytes()), rec);
    }

    #[test]
    fn imu_record_layout_is_little_endian() {
        let rec = ImuRecord {
            timestamp_us: 0x0403_0201,
            velocity: 1.0,
            ..Default::default()
        };
        let bytes = rec.to_bytes();
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        // 1.0f32 = 0x3F800000 little-endian.
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x80, 0x3F]);
    }

    #[test]
    fn side_record_round_trip() {
        let rec = SideRecord {
            timestamp_us: u32::MAX,
            velocity: 2.5,
            angle: 3.1415925,
            raw: 0x00AB_CDEF,
            torque: 42.5,
            power: 106.25,
        };
        assert_eq!(SideRecord::from_bytes(&rec.to_bytes()), rec);
    }

    #[test]
    fn side_record_masks_raw_to_24_bits() {
        let rec = SideRecord {
            raw: 0xFFFF_FFFF,
            ..Default::default()
        };
        let decoded = SideRecord::from_bytes(&rec.to_bytes());
        assert_eq!(decoded.raw, 0x00FF_FFFF);
    }

    #[test]
    fn side_record_timestamp_wrap_survives_round_trip() {
        let rec = SideRecord {
            timestamp_us: u32::MAX - 1,
            ..Default::default()
        };
        assert_eq!(SideRecord::from_bytes(&rec.to_bytes()).timestamp_us, u32::MAX - 1);
    }

    #[test]
    fn low_speed_record_json_keys() {
        let rec = LowSpeedRecord {
            rotation_time_us: 1_000_000,
            cadence: 60.0,
            rotations: 42,
            power: 250.0,
            balance: 52.5,
        };
        let json = serde_json::to_string(&rec).unwrap();
        for key in ["timestamp", "cadence", "rotations", "power", "balance"] {
            assert!(json.contains(&format!("\"{key}\"")), "missing key {key}: {json}");
        }
    }

    #[test]
    fn housekeeping_json_shape() {
        let rec = HousekeepingRecord {
            left_temperature_c: 24.5,
            right_temperature_c: TEMPERATURE_SENTINEL_C,
            imu_temperature_c: 31.0,
            battery_mv: 3712.0,
            left_offset: 9_848_390.0,
            right_offset: 6_252_516.0,
        };
        let json = rec.to_json();
        assert!(json.contains("\"temps\""), "{json}");
        assert!(json.contains("\"left-offset\""), "{json}");
        assert!(json.contains("\"right-offset\""), "{json}");
        assert!(json.contains("-1000.0"), "{json}");
    }

    #[test]
    fn about_record_json_keys() {
        let rec = AboutRecord {
            name: "power-meter".into(),
            compiled: "2026-08-01T00:00:00Z".into(),
            sw_version: "0.1.0".into(),
            hw_version: "rev-b".into(),
            connect_time_us: 5_000,
            calibration: serde_json::json!({"left": {"zero_offset": 0.0}}),
            mac: "00:11:22:33:44:55".into(),
        };
        let json = rec.to_json();
        assert!(json.contains("\"connect-time\""), "{json}");
        assert!(json.contains("\"mac\""), "{json}");
    }

    #[test]
    fn side_names() {
        assert_eq!(Side::Left.name(), "left");
        assert_eq!(Side::Right.name(), "right");
    }
}
