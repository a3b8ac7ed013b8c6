use serde::{Deserialize, Serialize};
use std::fmt;

/// Readings below this many mph are reported as standstill.
pub const DEADBAND_MPH: f64 = 0.5;

/// Apply the standstill deadband to an already clamped raw speed.
pub fn deadband(raw_mph: f64) -> f64 {
    if raw_mph < DEADBAND_MPH {
        0.0
    } else {
        raw_mph
    }
}

/// Clamp a sensor reading to a non-negative finite speed.
pub fn clamp_raw(raw_mph: f64) -> f64 {
    if raw_mph.is_finite() && raw_mph > 0.0 {
        raw_mph
    } else {
        0.0
    }
}

/// One observation of the vehicle's speed, produced on every read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    /// Deadband-filtered speed, the value that goes on the wire
    pub speed_mph: f64,
    /// Unfiltered speed for diagnostics
    pub raw_mph: f64,
    /// Backend that produced the reading
    pub source: &'static str,
}

impl SpeedSample {
    pub fn from_raw_mph(raw_mph: f64, source: &'static str) -> Self {
        let raw_mph = clamp_raw(raw_mph);
        Self {
            speed_mph: deadband(raw_mph),
            raw_mph,
            source,
        }
    }

    pub fn zero(source: &'static str) -> Self {
        Self {
            speed_mph: 0.0,
            raw_mph: 0.0,
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Opening,
    Open,
}

impl ConnectionState {
    /// True while a link exists or is being established
    pub fn is_active(self) -> bool {
        matches!(self, Self::Opening | Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "CLOSED",
            Self::Opening => "OPENING",
            Self::Open => "OPEN",
        };
        f.write_str(label)
    }
}

/// A selectable peer. Two descriptors are the same peer when their ids match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl PeerDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl PartialEq for PeerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerDescriptor {}

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionState),
    Speed(SpeedSample),
    Transmitted(String),
    Error(ErrorReport),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoDeviceSelected,
    ConnectFailed,
    WriteFailed,
    CapabilityDenied,
    SourceUnavailable,
}

/// Observer-facing summary of a recoverable failure.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
