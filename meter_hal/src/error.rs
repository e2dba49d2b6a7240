//! Sensor error type.

use thiserror::Error;

/// Error from a sensor driver operation.
///
/// None of these abort the acquisition loops: the core degrades per
/// sensor (sentinel temperatures, dropped samples, timeout paths).
#[derive(Debug, Clone, Error)]
pub enum SensorError {
    /// Bus-level communication failure (I²C / serial).
    #[error("bus communication error: {0}")]
    Bus(String),

    /// A read was attempted with no conversion pending.
    #[error("sensor has no data ready")]
    NotReady,

    /// The device flagged its own data as invalid.
    #[error("device reports invalid data")]
    InvalidData,
}
