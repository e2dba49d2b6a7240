//! Operator console on the serial link.
//!
//! Line-oriented request interface: the console only *requests*; the
//! shared command handlers apply. `set-config` accepts a multi-line
//! JSON document and applies it once the accumulated text parses, with
//! a 30 s input deadline.

use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use meter_common::store::ConfigStore;
use std::sync::Arc;
use tracing::debug;

use crate::commands;
use crate::runtime::MeterShared;

/// Multi-line `set-config` input deadline.
const SET_CONFIG_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval for the stop flag while idle.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// What the console asks the process to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    /// Keep serving.
    Continue,
    /// Restart the firmware (process supervisor contract).
    Reboot,
    /// Restart into the bootloader for a firmware update.
    RebootToBootloader,
}

/// A line input with a bounded wait. Production uses stdin/serial; the
/// tests use a scripted source.
pub trait LineSource {
    fn next_line(&mut self, timeout: Duration) -> Option<String>;
}

/// Stdin-backed line source (a detached reader thread feeds a channel,
/// so waits stay bounded).
pub struct StdinSource {
    lines: Receiver<String>,
}

impl StdinSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("console-stdin".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                let mut buffer = String::new();
                loop {
                    buffer.clear();
                    match stdin.read_line(&mut buffer) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if tx.send(buffer.trim_end_matches(['\r', '\n']).to_owned()).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .ok();
        Self { lines: rx }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSource for StdinSource {
    fn next_line(&mut self, timeout: Duration) -> Option<String> {
        self.lines.recv_timeout(timeout).ok()
    }
}

// ─── Console ────────────────────────────────────────────────────────

/// The operator console loop.
pub struct Console<S: LineSource> {
    source: S,
    shared: MeterShared,
    store: Option<Arc<ConfigStore>>,
}

impl<S: LineSource> Console<S> {
    pub fn new(source: S, shared: MeterShared, store: Option<Arc<ConfigStore>>) -> Self {
        Self {
            source,
            shared,
            store,
        }
    }

    /// Serve until a reboot request or until the meter halts.
    pub fn run(&mut self) -> ConsoleAction {
        loop {
            if !self.shared.running.load(Ordering::Acquire) {
                return ConsoleAction::Continue;
            }
            let Some(line) = self.source.next_line(IDLE_POLL) else {
                continue;
            };
            let (reply, action) = self.execute(line.trim());
            if !reply.is_empty() {
                println!("{reply}");
            }
            if action != ConsoleAction::Continue {
                return action;
            }
        }
    }

    /// Execute one command line; returns the reply text and the action.
    pub fn execute(&mut self, command: &str) -> (String, ConsoleAction) {
        match command {
            "" => (String::new(), ConsoleAction::Continue),
            "help" => (
                "commands: get-config | set-config | force-calibrate | reboot | \
                 reboot-to-bootloader | help"
                    .into(),
                ConsoleAction::Continue,
            ),
            "get-config" => (
                self.shared.config.snapshot().to_json(),
                ConsoleAction::Continue,
            ),
            "set-config" => {
                let reply = match self.collect_json() {
                    Some(payload) => match commands::apply_configuration(
                        &payload,
                        &self.shared,
                        self.store.as_deref(),
                    ) {
                        Ok(()) => "configuration applied".into(),
                        Err(e) => format!("rejected: {e}"),
                    },
                    None => "timed out waiting for configuration JSON".into(),
                };
                (reply, ConsoleAction::Continue)
            }
            "force-calibrate" => {
                commands::perform_zero_offset(&self.shared);
                ("zero-offset calibration armed on both sides".into(), ConsoleAction::Continue)
            }
            "reboot" => ("rebooting".into(), ConsoleAction::Reboot),
            "reboot-to-bootloader" => (
                "rebooting to bootloader".into(),
                ConsoleAction::RebootToBootloader,
            ),
            other => (
                format!("unknown command: {other} (try 'help')"),
                ConsoleAction::Continue,
            ),
        }
    }

    /// Accumulate lines until the text parses as a JSON document, or
    /// the 30 s deadline passes.
    fn collect_json(&mut self) -> Option<String> {
        let deadline = Instant::now() + SET_CONFIG_TIMEOUT;
        let mut payload = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("set-config input timed out");
                return None;
            }
            let Some(line) = self.source.next_line(remaining.min(IDLE_POLL)) else {
                if !self.shared.running.load(Ordering::Acquire) {
                    return None;
                }
                continue;
            };
            payload.push_str(&line);
            payload.push('\n');
            if serde_json::from_str::<serde_json::Value>(&payload).is_ok() {
                return Some(payload);
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use crate::imu::RotationCell;
    use crate::power::PowerController;
    use crate::side::CalibrationCell;
    use crate::sync::{DataGate, NotifyWord};
    use meter_common::config::{Config, SharedConfig};

    struct ScriptSource {
        lines: VecDeque<String>,
    }

    impl ScriptSource {
        fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|l| l.to_string()).collect(),
            }
        }
    }

    impl LineSource for ScriptSource {
        fn next_line(&mut self, _timeout: Duration) -> Option<String> {
            self.lines.pop_front()
        }
    }

    fn shared() -> MeterShared {
        let gate = Arc::new(DataGate::new());
        let link_notify = Arc::new(NotifyWord::new());
        let running = Arc::new(AtomicBool::new(true));
        MeterShared {
            config: SharedConfig::new(Config::default()),
            gate: Arc::clone(&gate),
            link_notify: Arc::clone(&link_notify),
            rotation: Arc::new(RotationCell::new()),
            controller: Arc::new(PowerController::new(link_notify, gate, Arc::clone(&running))),
            left_calibration: Arc::new(CalibrationCell::new()),
            right_calibration: Arc::new(CalibrationCell::new()),
            running,
        }
    }

    fn console(lines: &[&str]) -> Console<ScriptSource> {
        Console::new(ScriptSource::new(lines), shared(), None)
    }

    #[test]
    fn get_config_prints_the_snapshot() {
        let mut console = console(&[]);
        let (reply, action) = console.execute("get-config");
        assert_eq!(action, ConsoleAction::Continue);
        assert!(reply.contains("sleep_timeout_s"), "{reply}");
    }

    #[test]
    fn set_config_accepts_multi_line_json() {
        let mut console = console(&["{", "  \"sleep_timeout_s\": 300", "}"]);
        let (reply, _) = console.execute("set-config");
        assert_eq!(reply, "configuration applied");
        assert_eq!(console.shared.config.snapshot().sleep_timeout_s, 300);
    }

    #[test]
    fn set_config_rejects_invalid_values() {
        let mut console = console(&["{\"sleep_timeout_s\": 5}"]);
        let (reply, _) = console.execute("set-config");
        assert!(reply.starts_with("rejected:"), "{reply}");
        assert_eq!(console.shared.config.snapshot().sleep_timeout_s, 0);
    }

    #[test]
    fn force_calibrate_arms_both_sides() {
        let mut console = console(&[]);
        console.execute("force-calibrate");
        assert!(console.shared.left_calibration.active());
        assert!(console.shared.right_calibration.active());
    }

    #[test]
    fn reboot_commands_return_actions() {
        let mut console = console(&[]);
        assert_eq!(console.execute("reboot").1, ConsoleAction::Reboot);
        assert_eq!(
            console.execute("reboot-to-bootloader").1,
            ConsoleAction::RebootToBootloader
        );
    }

    #[test]
    fn unknown_command_mentions_help() {
        let mut console = console(&[]);
        let (reply, _) = console.execute("wat");
        assert!(reply.contains("help"), "{reply}");
    }
}
