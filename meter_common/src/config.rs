//! Configuration snapshot consumed by the acquisition core.
//!
//! The snapshot is loaded once from the persistent store at boot and
//! replaced atomically on an explicit `set-configuration` command. The
//! core reads fields at loop head through [`SharedConfig`]; no
//! same-sample coherence is guaranteed or required.
//!
//! The same serde model serves the on-disk TOML store and the JSON
//! command payload (the JSON shape is fixed by existing consumers).

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::records::Side;

/// Capacity of each high-speed record queue: the default batch size plus
/// a small reserve so a batch boundary never forces a drop.
pub const HIGH_SPEED_QUEUE_CAPACITY: usize = 192;

/// Capacity of the low-speed and housekeeping queues.
pub const SLOW_QUEUE_CAPACITY: usize = 8;

/// Samples averaged by a zero-offset calibration pass.
pub const ZERO_OFFSET_SAMPLES: u32 = 200;

/// A 2×2 covariance in row-major order.
pub type Covariance2 = [[f32; 2]; 2];

// ─── Sub-Structures ─────────────────────────────────────────────────

/// Kalman filter covariances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Environment (process) covariance Q.
    pub environment_covariance: Covariance2,
    /// Measurement covariance R.
    pub measurement_covariance: Covariance2,
    /// Initial covariance P₀; high so early measurements dominate.
    pub initial_covariance: Covariance2,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            environment_covariance: [[2e-3, 0.0], [0.0, 0.1]],
            measurement_covariance: [[100.0, 0.0], [0.0, 1e-2]],
            initial_covariance: [[1e6, 0.0], [0.0, 1e6]],
        }
    }
}

/// IMU scaling, mounting and emission policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Accelerometer full-scale range [g].
    pub accel_range_g: f32,
    /// Gyroscope full-scale range [°/s].
    pub gyro_range_dps: f32,
    /// Emit one IMU record per `decimation` samples (1 = every sample).
    pub decimation: u32,
    /// IMU x offset from the rotation center, for the centripetal
    /// correction of the x acceleration [m].
    pub radius_x_m: f32,
    /// IMU y offset from the rotation center, for the centripetal
    /// correction of the y acceleration [m].
    pub radius_y_m: f32,
    /// Negate the reconstructed angle before the filter update. The
    /// mounting orientation of the sensor fixes the sign convention.
    pub invert_angle: bool,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            accel_range_g: 16.0,
            gyro_range_dps: 2000.0,
            decimation: 1,
            radius_x_m: 0.035,
            radius_y_m: 0.0,
            invert_angle: true,
        }
    }
}

/// Per-side strain gauge calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrainCalibration {
    /// Raw ADC reading under zero load.
    pub zero_offset: f32,
    /// Linear raw-to-torque coefficient [N·m per count].
    pub coefficient: f32,
    /// Temperature at which the calibration was taken [°C].
    pub temperature_reference_c: f32,
    /// Relative sensitivity drift per °C away from the reference.
    pub temperature_coefficient: f32,
}

impl Default for StrainCalibration {
    fn default() -> Self {
        Self {
            zero_offset: 0.0,
            coefficient: 1.0,
            temperature_reference_c: 25.0,
            temperature_coefficient: 0.0,
        }
    }
}

/// Battery supervision policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Below this voltage the sample counts toward the flat condition [mV].
    pub flat_cutoff_mv: f32,
    /// Consecutive under-threshold samples before the terminal transition.
    pub flat_sample_count: u32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            flat_cutoff_mv: 3400.0,
            flat_sample_count: 3,
        }
    }
}

/// Which transport the connection subsystem drives. Mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMethod {
    /// Networked publish/subscribe link.
    PubSub,
    /// Low-energy short-range wireless link.
    LowEnergy,
}

/// Transport parameters. Opaque to the acquisition core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub method: ConnectionMethod,
    /// Broker address for the pub/sub link.
    pub broker_address: String,
    /// Advertised device name.
    pub device_name: String,
    /// High-speed records are published once a queue holds this many.
    pub batch_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            method: ConnectionMethod::PubSub,
            broker_address: "127.0.0.1:1883".into(),
            device_name: "crank-power-meter".into(),
            batch_size: 160,
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────

/// The complete configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub kalman: KalmanConfig,
    pub imu: ImuConfig,
    /// Left-side strain calibration.
    pub left: StrainCalibration,
    /// Right-side strain calibration.
    pub right: StrainCalibration,
    pub battery: BatteryConfig,
    pub connection: ConnectionConfig,
    /// Seconds without a completed rotation before the sleep transition.
    /// 0 disables the timeout; 1–20 are rejected as too aggressive.
    pub sleep_timeout_s: u32,
}

impl Config {
    /// Calibration for one pedal side.
    #[inline]
    pub fn calibration(&self, side: Side) -> &StrainCalibration {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Mutable calibration for one pedal side.
    #[inline]
    pub fn calibration_mut(&mut self, side: Side) -> &mut StrainCalibration {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// Validate parameter bounds. An invalid snapshot is rejected as a
    /// whole; the caller keeps the previous one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (1..=20).contains(&self.sleep_timeout_s) {
            return Err(ConfigError::Validation(format!(
                "sleep_timeout_s = {} rejected; 0 disables, values above 20 are accepted",
                self.sleep_timeout_s
            )));
        }
        if self.imu.decimation < 1 {
            return Err(ConfigError::Validation(
                "imu.decimation must be >= 1".into(),
            ));
        }
        if self.imu.accel_range_g <= 0.0 || self.imu.gyro_range_dps <= 0.0 {
            return Err(ConfigError::Validation(
                "imu ranges must be positive".into(),
            ));
        }
        if self.connection.batch_size == 0
            || self.connection.batch_size > HIGH_SPEED_QUEUE_CAPACITY
        {
            return Err(ConfigError::Validation(format!(
                "connection.batch_size = {} out of range [1, {HIGH_SPEED_QUEUE_CAPACITY}]",
                self.connection.batch_size
            )));
        }
        for (name, cov) in [
            ("environment_covariance", &self.kalman.environment_covariance),
            ("measurement_covariance", &self.kalman.measurement_covariance),
            ("initial_covariance", &self.kalman.initial_covariance),
        ] {
            if cov.iter().flatten().any(|v| !v.is_finite()) {
                return Err(ConfigError::Validation(format!(
                    "kalman.{name} contains a non-finite entry"
                )));
            }
        }
        for (side, cal) in [(Side::Left, &self.left), (Side::Right, &self.right)] {
            if !cal.coefficient.is_finite() || cal.coefficient == 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{} coefficient must be finite and non-zero",
                    side.name()
                )));
            }
        }
        if self.battery.flat_sample_count == 0 {
            return Err(ConfigError::Validation(
                "battery.flat_sample_count must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a `set-configuration` JSON payload.
    pub fn from_json(payload: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(payload).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to the `set-configuration` JSON shape.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ─── Shared Handle ──────────────────────────────────────────────────

/// Atomically swappable configuration handle.
///
/// Producers call [`SharedConfig::snapshot`] at loop head and work from
/// the returned immutable snapshot for the rest of the iteration; a
/// concurrent [`SharedConfig::replace`] is observed at the next loop.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<Config> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            // A poisoned lock still holds a valid snapshot.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically publish a new snapshot.
    pub fn replace(&self, config: Config) {
        match self.inner.write() {
            Ok(mut guard) => *guard = Arc::new(config),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(config),
        }
    }

    /// Read-modify-write under the handle's lock.
    pub fn update<F: FnOnce(&mut Config)>(&self, mutate: F) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut config = (**guard).clone();
        mutate(&mut config);
        *guard = Arc::new(config);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn sleep_timeout_band_rejected() {
        for bad in [1, 7, 20] {
            let config = Config {
                sleep_timeout_s: bad,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
        for good in [0, 21, 600] {
            let config = Config {
                sleep_timeout_s: good,
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "{good} should be accepted");
        }
    }

    #[test]
    fn decimation_zero_rejected() {
        let mut config = Config::default();
        config.imu.decimation = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn batch_size_bounded_by_queue_capacity() {
        let mut config = Config::default();
        config.connection.batch_size = HIGH_SPEED_QUEUE_CAPACITY + 1;
        assert!(config.validate().is_err());
        config.connection.batch_size = HIGH_SPEED_QUEUE_CAPACITY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn non_finite_covariance_rejected() {
        let mut config = Config::default();
        config.kalman.measurement_covariance[0][0] = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_coefficient_rejected() {
        let mut config = Config::default();
        config.right.coefficient = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("right"));
    }

    #[test]
    fn json_round_trip() {
        let mut config = Config::default();
        config.left.zero_offset = 9_848_390.0;
        config.sleep_timeout_s = 300;
        let parsed = Config::from_json(&config.to_json()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config = Config::from_json(r#"{"sleep_timeout_s": 120}"#).unwrap();
        assert_eq!(config.sleep_timeout_s, 120);
        assert_eq!(config.imu.decimation, 1);
        assert_eq!(config.connection.batch_size, 160);
    }

    #[test]
    fn invalid_json_rejected() {
        assert!(Config::from_json("not json").is_err());
        assert!(Config::from_json(r#"{"sleep_timeout_s": 5}"#).is_err());
    }

    #[test]
    fn shared_config_swap_is_observed() {
        let shared = SharedConfig::new(Config::default());
        let before = shared.snapshot();
        shared.update(|c| c.left.zero_offset = 123.0);
        let after = shared.snapshot();
        assert_eq!(before.left.zero_offset, 0.0);
        assert_eq!(after.left.zero_offset, 123.0);
    }

    #[test]
    fn calibration_accessor_matches_side() {
        let mut config = Config::default();
        config.right.zero_offset = 6_252_516.0;
        assert_eq!(config.calibration(Side::Right).zero_offset, 6_252_516.0);
        assert_eq!(config.calibration(Side::Left).zero_offset, 0.0);
    }
}
