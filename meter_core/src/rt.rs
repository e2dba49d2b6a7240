//! Real-time scheduling setup.
//!
//! With the `rt` feature the task threads get `SCHED_FIFO` priorities
//! (IMU strictly above the sides, sides strictly above the rest) and
//! all pages are locked to prevent faults on the hot path. Without the
//! feature every call is a no-op, which is the simulation/test mode.

/// IMU ingest task priority (highest).
pub const PRIORITY_IMU: i32 = 80;
/// Per-side ingest task priority.
pub const PRIORITY_SIDE: i32 = 70;
/// Low-speed rendezvous task priority.
pub const PRIORITY_LOW_SPEED: i32 = 50;
/// Connection task priority.
pub const PRIORITY_CONNECTION: i32 = 45;
/// Housekeeping supervisor priority.
pub const PRIORITY_HOUSEKEEPING: i32 = 40;

/// RT setup failure.
#[derive(Debug)]
pub enum RtError {
    /// An RT system call failed.
    Setup(String),
}

impl std::fmt::Display for RtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup(msg) => write!(f, "RT setup error: {msg}"),
        }
    }
}

impl std::error::Error for RtError {}

/// Lock all current and future memory pages.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
pub fn lock_memory() -> Result<(), RtError> {
    use nix::sys::mman::{MlockAllFlags, mlockall};
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(|e| RtError::Setup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
pub fn lock_memory() -> Result<(), RtError> {
    Ok(()) // No-op in simulation mode
}

/// Give the calling thread `SCHED_FIFO` with the given priority.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
pub fn set_current_thread_priority(priority: i32) -> Result<(), RtError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RtError::Setup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
pub fn set_current_thread_priority(_priority: i32) -> Result<(), RtError> {
    Ok(()) // No-op in simulation mode
}

// ─── Tests ──────────────────────────────────────────────────────────
