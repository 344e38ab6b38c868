//! Log entry types

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Severity threshold for the event log
///
/// Ordered from least to most verbose. `All` admits every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    #[default]
    Info = 2,
    Debug = 3,
    All = 4,
}

impl LogLevel {
    /// Check whether an entry logged at `level` passes this threshold
    pub fn allows(self, level: LogLevel) -> bool {
        level <= self
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Error,
            1 => LogLevel::Warning,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::All,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "all" => Ok(LogLevel::All),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// Kind of event recorded in the log
///
/// `NdisError` is the error class raised by the packet interception layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    Connected,
    Disconnected,
    Message,
    AddressError,
    NdisError,
}

/// Entry payload: free text or a numeric value, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPayload {
    Description(String),
    Data(u64),
}

impl From<String> for LogPayload {
    fn from(text: String) -> Self {
        LogPayload::Description(text)
    }
}

impl From<&str> for LogPayload {
    fn from(text: &str) -> Self {
        LogPayload::Description(text.to_string())
    }
}

impl From<u64> for LogPayload {
    fn from(value: u64) -> Self {
        LogPayload::Data(value)
    }
}

/// A single immutable log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Milliseconds on the pipeline's monotonic clock
    pub timestamp: u64,
    pub event: LogEvent,
    #[serde(flatten)]
    pub payload: LogPayload,
}

impl LogEntry {
    pub fn new(timestamp: u64, event: LogEvent, payload: impl Into<LogPayload>) -> Self {
        Self {
            timestamp,
            event,
            payload: payload.into(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match &self.payload {
            LogPayload::Description(text) => Some(text),
            LogPayload::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<u64> {
        match self.payload {
            LogPayload::Data(value) => Some(value),
            LogPayload::Description(_) => None,
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            LogPayload::Description(text) => write!(f, "[{}] {:?}: {}", self.timestamp, self.event, text),
            LogPayload::Data(value) => write!(f, "[{}] {:?}: {}", self.timestamp, self.event, value),
        }
    }
}

/// Monotonic millisecond clock anchored at wall-clock time of creation
#[derive(Debug, Clone, Copy)]
pub(crate) struct MonotonicClock {
    origin: Instant,
    origin_ms: u64,
}

impl MonotonicClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_ms: u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0),
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.origin_ms.saturating_add(elapsed)
    }
}
