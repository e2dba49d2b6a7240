//! Inbound command dispatch.
//!
//! Command names are fixed by existing consumers. The same handlers
//! serve the transport's command channel and the operator console.

use meter_common::config::{Config, ZERO_OFFSET_SAMPLES};
use meter_common::error::ConfigError;
use meter_common::store::ConfigStore;
use tracing::{info, warn};

use crate::runtime::MeterShared;

/// Replace the configuration snapshot from a JSON payload.
pub const CMD_SET_CONFIGURATION: &str = "set-configuration";
/// Arm the zero-offset averaging pass on both sides.
pub const CMD_ZERO_OFFSET: &str = "perform-adc-zero-offset";

/// Command failure.
#[derive(Debug)]
pub enum CommandError {
    /// Command name not recognized.
    Unknown(String),
    /// Configuration payload rejected; previous snapshot retained.
    Config(ConfigError),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "unknown command: {name}"),
            Self::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<ConfigError> for CommandError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Dispatch one named command.
pub fn dispatch(
    name: &str,
    payload: &str,
    shared: &MeterShared,
    store: Option<&ConfigStore>,
) -> Result<(), CommandError> {
    match name {
        CMD_SET_CONFIGURATION => apply_configuration(payload, shared, store).map_err(Into::into),
        CMD_ZERO_OFFSET => {
            perform_zero_offset(shared);
            Ok(())
        }
        other => Err(CommandError::Unknown(other.to_owned())),
    }
}

/// Parse, validate and atomically publish a new configuration snapshot.
///
/// An invalid payload leaves the active snapshot untouched. A store
/// failure after a successful swap is logged, not propagated; the new
/// snapshot is already live.
pub fn apply_configuration(
    payload: &str,
    shared: &MeterShared,
    store: Option<&ConfigStore>,
) -> Result<(), ConfigError> {
    let config = Config::from_json(payload)?;
    shared.config.replace(config.clone());
    info!("configuration replaced");
    if let Some(store) = store {
        if let Err(e) = store.save(&config) {
            warn!("failed to persist configuration: {e}");
        }
    }
    Ok(())
}

/// Arm the zero-offset averaging countdown on both sides.
pub fn perform_zero_offset(shared: &MeterShared) {
    shared.left_calibration.arm(ZERO_OFFSET_SAMPLES);
    shared.right_calibration.arm(ZERO_OFFSET_SAMPLES);
    info!(samples = ZERO_OFFSET_SAMPLES, "zero-offset calibration armed on both sides");
}

// ─── Tests ──────────────────────────────────────────────────────────
