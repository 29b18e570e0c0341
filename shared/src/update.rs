// Firmware Update Reporting Module
// The update service runs outside the telemetry loop; it only reports what it
// is doing. The telemetry task drains these events once per cycle and logs
// them, nothing else reacts to an update outcome.

use core::fmt;

use crate::console::{Console, LineSink};
use crate::{console_error, console_info};

/// Failure classes reported by the update endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    Auth,
    Begin,
    Connect,
    Receive,
    End,
}

impl UpdateError {
    pub fn code(self) -> u8 {
        match self {
            UpdateError::Auth => 0,
            UpdateError::Begin => 1,
            UpdateError::Connect => 2,
            UpdateError::Receive => 3,
            UpdateError::End => 4,
        }
    }

    fn label(self) -> &'static str {
        match self {
            UpdateError::Auth => "Auth Failed",
            UpdateError::Begin => "Begin Failed",
            UpdateError::Connect => "Connect Failed",
            UpdateError::Receive => "Receive Failed",
            UpdateError::End => "End Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Start { total_bytes: Option<usize> },
    Progress { percent: u8 },
    End { bytes: usize, sha256: String },
    Error(UpdateError),
}

impl fmt::Display for UpdateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateEvent::Start {
                total_bytes: Some(total),
            } => write!(f, "Start updating firmware ({} bytes)", total),
            UpdateEvent::Start { total_bytes: None } => write!(f, "Start updating firmware"),
            UpdateEvent::Progress { percent } => write!(f, "Progress: {}%", percent),
            UpdateEvent::End { bytes, sha256 } => {
                write!(f, "End ({} bytes, sha256 {})", bytes, sha256)
            }
            UpdateEvent::Error(error) => write!(f, "Error[{}]: {}", error.code(), error.label()),
        }
    }
}

/// Source of update events, polled without blocking
pub trait UpdateService {
    fn next_event(&mut self) -> Option<UpdateEvent>;
}

/// Log every pending event; returns how many were drained
pub fn drain_events<U, S>(service: &mut U, console: &Console<S>) -> usize
where
    U: UpdateService + ?Sized,
    S: LineSink,
{
    let mut drained = 0;
    while let Some(event) = service.next_event() {
        match event {
            UpdateEvent::Error(_) => console_error!(console, "{}", event),
            _ => console_info!(console, "{}", event),
        }
        drained += 1;
    }
    drained
}

/// Turns byte counts into whole-percent steps, reporting each step once
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: Option<usize>,
    received: usize,
    last_percent: Option<u8>,
}

impl ProgressTracker {
    pub fn new(total: Option<usize>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            received: 0,
            last_percent: None,
        }
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Record `chunk` more bytes; yields the new percentage when it changed
    pub fn advance(&mut self, chunk: usize) -> Option<u8> {
        self.received = self.received.saturating_add(chunk);
        let total = self.total?;
        let percent = (self.received.saturating_mul(100) / total).min(100) as u8;
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(percent)
    }
}

pub fn hex_digest(bytes: &[u8]) -> String {
    use core::fmt::Write as _;

    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
