//! Append-only JSON Lines mirror of the event log

use super::entry::{LogEntry, LogEvent, LogPayload};
use crate::error::PersistSinkError;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, error};

/// Consecutive write failures after which the mirror stops writing
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Serialize)]
struct MirrorRecord<'a> {
    timestamp: u64,
    time: String,
    event: LogEvent,
    #[serde(flatten)]
    payload: &'a LogPayload,
}

/// Persistent copy of every accepted log entry
///
/// Write failures are reported through `tracing` once per failure streak and
/// never reach the caller. The mirror disables itself after
/// `MAX_CONSECUTIVE_FAILURES` failures in a row.
pub struct LogMirror {
    path: Option<PathBuf>,
    writer: Mutex<Box<dyn Write + Send>>,
    failures: AtomicU32,
    disabled: AtomicBool,
}

impl LogMirror {
    /// Open (or create) `path` for appending
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Log mirror opened at {:?}", path);
        Ok(Self {
            path: Some(path.to_path_buf()),
            writer: Mutex::new(Box::new(BufWriter::new(file))),
            failures: AtomicU32::new(0),
            disabled: AtomicBool::new(false),
        })
    }

    /// Mirror into an arbitrary writer
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            path: None,
            writer: Mutex::new(Box::new(writer)),
            failures: AtomicU32::new(0),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Append one record; failures are swallowed
    pub fn record(&self, entry: &LogEntry) {
        if self.is_disabled() {
            return;
        }
        let result = self.write_record(entry);
        self.track(result);
    }

    /// Push buffered records to the underlying sink
    pub fn flush(&self) {
        if self.is_disabled() {
            return;
        }
        let result = self.writer.lock().flush().map_err(PersistSinkError::from);
        self.track(result);
    }

    fn write_record(&self, entry: &LogEntry) -> Result<(), PersistSinkError> {
        let time = i64::try_from(entry.timestamp)
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        let record = MirrorRecord {
            timestamp: entry.timestamp,
            time,
            event: entry.event,
            payload: &entry.payload,
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.writer.lock().write_all(&line)?;
        Ok(())
    }

    fn track(&self, result: Result<(), PersistSinkError>) {
        match result {
            Ok(()) => self.failures.store(0, Ordering::Release),
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures == 1 {
                    error!("Log mirror {:?}: {}", self.path, e);
                }
                if failures >= MAX_CONSECUTIVE_FAILURES && !self.disabled.swap(true, Ordering::AcqRel) {
                    error!(
                        "Log mirror {:?} disabled after {} consecutive failures",
                        self.path, failures
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for LogMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMirror")
            .field("path", &self.path)
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
