//! Transport variants behind the connection task.
//!
//! The connection is polymorphic over a small capability set: connect,
//! publish one payload on one topic, shut down. The two mutually
//! exclusive production links are the networked publish/subscribe
//! transport and the low-energy radio link; tests use an in-memory
//! sink. Wire-level framing beyond the payload bytes themselves is the
//! transport's own business and stays out of the acquisition core.

use std::io::Write;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meter_common::config::{ConnectionConfig, ConnectionMethod};
use tracing::{debug, info, trace};

// ─── Topics ─────────────────────────────────────────────────────────

/// Publish topics. High-speed topics carry binary batches; the rest
/// carry JSON payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Topic {
    ImuBatch = 0,
    LeftBatch = 1,
    RightBatch = 2,
    LowSpeed = 3,
    Housekeeping = 4,
    About = 5,
}

impl Topic {
    /// Topic path on the pub/sub link.
    pub const fn path(&self) -> &'static str {
        match self {
            Self::ImuBatch => "power/high-speed/imu",
            Self::LeftBatch => "power/high-speed/left",
            Self::RightBatch => "power/high-speed/right",
            Self::LowSpeed => "power/low-speed",
            Self::Housekeeping => "power/housekeeping",
            Self::About => "power/about",
        }
    }
}

// ─── Error ──────────────────────────────────────────────────────────

/// Transport-level failure. Non-fatal: the connection task loops back
/// to its Connect state and retries indefinitely.
#[derive(Debug)]
pub enum LinkError {
    /// Socket/radio I/O failed.
    Io(String),
    /// Publish attempted with no live link.
    NotConnected,
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "link I/O error: {e}"),
            Self::NotConnected => write!(f, "link not connected"),
        }
    }
}

impl std::error::Error for LinkError {}

// ─── Tagged Transport ───────────────────────────────────────────────

/// The transport behind the connection task. Dispatch happens once, in
/// the connection task; producers never see this type.
#[derive(Debug)]
pub enum Transport {
    PubSub(PubSubLink),
    LowEnergy(LowEnergyLink),
    Memory(MemorySink),
}

impl Transport {
    /// Build the configured production transport.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        match config.method {
            ConnectionMethod::PubSub => Self::PubSub(PubSubLink::new()),
            ConnectionMethod::LowEnergy => Self::LowEnergy(LowEnergyLink::new()),
        }
    }

    /// Bring the link up. Idempotent.
    pub fn connect(&mut self, config: &ConnectionConfig) -> Result<(), LinkError> {
        match self {
            Self::PubSub(link) => link.connect(config),
            Self::LowEnergy(link) => link.connect(config),
            Self::Memory(sink) => sink.connect(),
        }
    }

    /// Publish one payload on one topic.
    pub fn publish(&mut self, topic: Topic, payload: &[u8]) -> Result<(), LinkError> {
        match self {
            Self::PubSub(link) => link.publish(topic, payload),
            Self::LowEnergy(link) => link.publish(topic, payload),
            Self::Memory(sink) => sink.publish(topic, payload),
        }
    }

    /// Release the link's resources.
    pub fn shutdown(&mut self) {
        match self {
            Self::PubSub(link) => link.shutdown(),
            Self::LowEnergy(link) => link.shutdown(),
            Self::Memory(sink) => sink.shutdown(),
        }
    }
}

// ─── Pub/Sub Link ───────────────────────────────────────────────────

/// Networked publish/subscribe link.
///
/// Payloads go to the broker as `topic-id · u32 length · bytes` frames;
/// the broker-side bridge owns the actual pub/sub protocol.
#[derive(Debug, Default)]
pub struct PubSubLink {
    stream: Option<TcpStream>,
}

impl PubSubLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect(&mut self, config: &ConnectionConfig) -> Result<(), LinkError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&config.broker_address)
            .map_err(|e| LinkError::Io(format!("{}: {e}", config.broker_address)))?;
        stream
            .set_write_timeout(Some(Duration::from_secs(2)))
            .map_err(|e| LinkError::Io(e.to_string()))?;
        info!(broker = %config.broker_address, "pub/sub link up");
        self.stream = Some(stream);
        Ok(())
    }

    fn publish(&mut self, topic: Topic, payload: &[u8]) -> Result<(), LinkError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(topic as u8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        if let Err(e) = stream.write_all(&frame) {
            self.stream = None;
            return Err(LinkError::Io(e.to_string()));
        }
        trace!(topic = topic.path(), bytes = payload.len(), "published");
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.stream.take().is_some() {
            info!("pub/sub link released");
        }
    }
}

// ─── Low-Energy Link ────────────────────────────────────────────────

/// Low-energy radio link. The radio stack lives outside the core; this
/// glue tracks the attach state and hands payloads to it.
#[derive(Debug, Default)]
pub struct LowEnergyLink {
    attached: bool,
    published: u64,
}

impl LowEnergyLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect(&mut self, config: &ConnectionConfig) -> Result<(), LinkError> {
        if !self.attached {
            info!(device = %config.device_name, "low-energy link advertising");
            self.attached = true;
        }
        Ok(())
    }

    fn publish(&mut self, topic: Topic, payload: &[u8]) -> Result<(), LinkError> {
        if !self.attached {
            return Err(LinkError::NotConnected);
        }
        self.published += 1;
        trace!(topic = topic.path(), bytes = payload.len(), "notified");
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.attached {
            debug!(published = self.published, "low-energy link released");
            self.attached = false;
        }
    }
}

// ─── In-Memory Sink ─────────────────────────────────────────────────

/// Test sink capturing every publish; failures can be scripted to
/// exercise the reconnect path.
#[derive(Debug, Default)]
pub struct MemorySink {
    connected: bool,
    handle: MemoryHandle,
    fail_connects: u32,
    fail_publishes: u32,
}

impl MemorySink {
    /// Sink plus the observer handle tests hold on to.
    pub fn new() -> (Self, MemoryHandle) {
        let sink = Self::default();
        let handle = sink.handle.clone();
        (sink, handle)
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_connects(&mut self, n: u32) {
        self.fail_connects = n;
    }

    /// Make the next `n` publishes fail (connectivity loss).
    pub fn fail_publishes(&mut self, n: u32) {
        self.fail_publishes = n;
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(LinkError::Io("scripted connect failure".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn publish(&mut self, topic: Topic, payload: &[u8]) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if self.fail_publishes > 0 {
            self.fail_publishes -= 1;
            return Err(LinkError::Io("scripted publish failure".into()));
        }
        self.handle.push(topic, payload);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.connected = false;
    }
}

/// Observer side of a [`MemorySink`].
#[derive(Debug, Clone, Default)]
pub struct MemoryHandle {
    published: Arc<Mutex<Vec<(Topic, Vec<u8>)>>>,
}

impl MemoryHandle {
    fn push(&self, topic: Topic, payload: &[u8]) {
        if let Ok(mut published) = self.published.lock() {
            published.push((topic, payload.to_vec()));
        }
    }

    /// All payloads published on `topic`, in order.
    pub fn payloads(&self, topic: Topic) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .map(|published| {
                published
                    .iter()
                    .filter(|(t, _)| *t == topic)
                    .map(|(_, p)| p.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of publishes on `topic`.
    pub fn count(&self, topic: Topic) -> usize {
        self.payloads(topic).len()
    }

    /// Total publishes across every topic.
    pub fn total(&self) -> usize {
        self.published.lock().map(|p| p.len()).unwrap_or(0)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
