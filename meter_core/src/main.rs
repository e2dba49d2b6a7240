//! Power meter firmware entry point.
//!
//! Loads the persistent configuration (writing defaults on first boot),
//! wires the runtime, enables the connection subsystem, and serves the
//! operator console when requested. Hardware drivers are board-specific
//! and linked by the board support package; this binary ships with the
//! scripted simulation drivers (`--sim`) for development.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use meter_common::store::ConfigStore;
use meter_core::clock::Clock;
use meter_core::connection::transport::Transport;
use meter_core::console::{Console, ConsoleAction, StdinSource};
use meter_core::runtime::{Runtime, SensorSet};
use meter_hal::sim::{RotationScript, SimBattery, SimImu, SimStrainAdc, SimTempSensor};

/// Exit codes consumed by the process supervisor: restart the firmware,
/// or restart into the bootloader for a firmware update.
const EXIT_REBOOT: u8 = 10;
const EXIT_REBOOT_BOOTLOADER: u8 = 11;

#[derive(Debug, Parser)]
#[command(name = "power-meter", about = "Crank-arm power meter firmware core")]
struct Args {
    /// Path to the persistent configuration store.
    #[arg(long, default_value = "meter.toml")]
    config: PathBuf,

    /// Run on the scripted simulation drivers instead of hardware.
    #[arg(long)]
    sim: bool,

    /// Serve the operator console on stdin.
    #[arg(long)]
    console: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("power meter core starting");

    let store = Arc::new(ConfigStore::new(&args.config));
    let config = store.load_or_default();

    if !args.sim {
        error!("no hardware board support linked into this build; run with --sim");
        return ExitCode::from(2);
    }

    let clock = Clock::monotonic();
    let sensors = simulation_sensors(&config);
    let transport = Transport::from_config(&config.connection);

    let runtime = Runtime::new(
        config,
        Some(Arc::clone(&store)),
        sensors,
        transport,
        clock,
    );
    let handles = match runtime.spawn() {
        Ok(handles) => handles,
        Err(e) => {
            error!("failed to spawn task threads: {e}");
            return ExitCode::from(1);
        }
    };
    handles.enable_connection();

    let action = if args.console {
        let mut console = Console::new(
            StdinSource::new(),
            handles.shared.clone(),
            Some(Arc::clone(&store)),
        );
        console.run()
    } else {
        while handles.is_running() {
            std::thread::sleep(Duration::from_millis(200));
        }
        ConsoleAction::Continue
    };

    handles.shutdown();
    info!("power meter core stopped");

    match action {
        ConsoleAction::Continue => ExitCode::SUCCESS,
        ConsoleAction::Reboot => ExitCode::from(EXIT_REBOOT),
        ConsoleAction::RebootToBootloader => ExitCode::from(EXIT_REBOOT_BOOTLOADER),
    }
}

/// Scripted sensors for development: ten minutes of steady pedaling at
/// 60 RPM, healthy temperatures and battery.
fn simulation_sensors(config: &meter_common::config::Config) -> SensorSet {
    let mut imu = SimImu::new();
    imu.script_rotation(
        &config.imu,
        RotationScript {
            start_us: 10_000,
            interval_us: 10_000,
            samples: 60_000,
            omega_rad_s: 2.0 * std::f32::consts::PI,
            start_angle_rad: 0.0,
            batch_len: 4,
            temperature_c: 26.0,
        },
    );

    let mut left_adc = SimStrainAdc::new();
    let mut right_adc = SimStrainAdc::new();
    // Mild constant load either side of the configured zero offsets.
    left_adc.script_constant(10_000, 12_500, 48_000, 9_850_000);
    right_adc.script_constant(16_000, 12_500, 48_000, 6_254_000);

    SensorSet {
        imu: Box::new(imu),
        left_adc: Box::new(left_adc),
        right_adc: Box::new(right_adc),
        left_temp: Box::new(SimTempSensor::fixed(24.0)),
        right_temp: Box::new(SimTempSensor::fixed(24.5)),
        battery: Box::new(SimBattery::constant(3800.0)),
    }
}
