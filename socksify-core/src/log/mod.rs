//! Asynchronous routing event log
//!
//! Entries are appended into a bounded ring by every component and drained in
//! batches to subscribers by a dedicated worker thread.

pub mod buffer;
pub mod entry;
pub mod mirror;
pub mod pipeline;

pub use buffer::LogBuffer;
pub use entry::{LogEntry, LogEvent, LogLevel, LogPayload};
pub use mirror::LogMirror;
pub use pipeline::{
    DrainWorker, LogPipeline, LogSubscriber, DEFAULT_LOG_EVENT_INTERVAL, DEFAULT_LOG_LIMIT,
};
