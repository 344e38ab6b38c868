//! Log pipeline and its draining worker

use super::buffer::LogBuffer;
use super::entry::{LogEntry, LogEvent, LogLevel, LogPayload, MonotonicClock};
use super::mirror::LogMirror;
use parking_lot::{Condvar, Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub const DEFAULT_LOG_LIMIT: usize = 100;
pub const DEFAULT_LOG_EVENT_INTERVAL: Duration = Duration::from_millis(1000);

/// Receives batches of drained log entries
pub trait LogSubscriber: Send + Sync {
    fn on_batch(&self, batch: &[LogEntry]);
}

impl<F> LogSubscriber for F
where
    F: Fn(&[LogEntry]) + Send + Sync,
{
    fn on_batch(&self, batch: &[LogEntry]) {
        self(batch)
    }
}

/// Shared event log fed by every gateway component
///
/// Level, capacity and drain interval are atomic cells re-read on every use,
/// so they can be changed while the drain worker runs.
pub struct LogPipeline {
    clock: MonotonicClock,
    level: AtomicU8,
    interval_ms: AtomicU64,
    buffer: LogBuffer,
    mirror: RwLock<Option<Arc<LogMirror>>>,
    subscribers: RwLock<Vec<Arc<dyn LogSubscriber>>>,
    drain_signal: Mutex<Option<Arc<DrainSignal>>>,
}

impl LogPipeline {
    pub fn new(level: LogLevel) -> Self {
        Self {
            clock: MonotonicClock::new(),
            level: AtomicU8::new(level as u8),
            interval_ms: AtomicU64::new(DEFAULT_LOG_EVENT_INTERVAL.as_millis() as u64),
            buffer: LogBuffer::new(DEFAULT_LOG_LIMIT),
            mirror: RwLock::new(None),
            subscribers: RwLock::new(Vec::new()),
            drain_signal: Mutex::new(None),
        }
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.level.store(level as u8, Ordering::Release);
    }

    pub fn log_limit(&self) -> usize {
        self.buffer.limit()
    }

    /// Set the ring capacity (minimum 1); shrinking evicts the oldest entries
    pub fn set_log_limit(&self, limit: usize) {
        self.buffer.set_limit(limit);
    }

    pub fn log_event_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    pub fn set_log_event_interval(&self, interval: Duration) {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        self.interval_ms.store(millis, Ordering::Release);
    }

    /// Install or remove the persistent mirror
    pub fn set_mirror(&self, mirror: Option<LogMirror>) {
        *self.mirror.write() = mirror.map(Arc::new);
    }

    pub fn mirror(&self) -> Option<Arc<LogMirror>> {
        self.mirror.read().clone()
    }

    /// Register a subscriber for every future batch
    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: LogSubscriber + 'static,
    {
        self.subscribers.write().push(Arc::new(subscriber));
    }

    /// Record an event if `level` passes the configured threshold
    ///
    /// Returns whether the entry was accepted. Never blocks on delivery.
    pub fn append(&self, level: LogLevel, event: LogEvent, payload: impl Into<LogPayload>) -> bool {
        if !self.log_level().allows(level) {
            return false;
        }

        let entry = LogEntry::new(self.clock.now_ms(), event, payload);
        if let Some(mirror) = self.mirror.read().as_ref() {
            mirror.record(&entry);
        }
        self.buffer.push(entry);
        true
    }

    /// Record a free-text message
    pub fn message(&self, level: LogLevel, text: impl Into<String>) -> bool {
        self.append(level, LogEvent::Message, LogPayload::Description(text.into()))
    }

    /// Pull every pending entry without involving subscribers
    pub fn take_batch(&self) -> Vec<LogEntry> {
        self.buffer.take()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Wake the drain worker now instead of at the next interval
    pub fn flush(&self) {
        if let Some(signal) = self.drain_signal.lock().as_ref() {
            signal.request_flush();
        }
    }

    /// Hand the pending batch to every subscriber
    ///
    /// Returns the number of entries delivered. Nothing is delivered when the
    /// buffer is empty.
    pub fn deliver(&self) -> usize {
        let batch = self.buffer.take();
        if !batch.is_empty() {
            let subscribers = self.subscribers.read().clone();
            for subscriber in &subscribers {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_batch(&batch)));
                if outcome.is_err() {
                    error!("Log subscriber panicked handling {} entries", batch.len());
                }
            }
        }

        if let Some(mirror) = self.mirror.read().as_ref() {
            mirror.flush();
        }
        batch.len()
    }

    /// Start the dedicated drain worker
    pub fn spawn_drain(self: &Arc<Self>) -> std::io::Result<DrainWorker> {
        let signal = Arc::new(DrainSignal::default());
        let worker_signal = Arc::clone(&signal);
        let pipeline = Arc::clone(self);

        let handle = thread::Builder::new()
            .name("socksify-log".to_string())
            .spawn(move || drain_loop(pipeline, worker_signal))?;

        *self.drain_signal.lock() = Some(Arc::clone(&signal));
        debug!("Log drain worker started");

        Ok(DrainWorker {
            handle: Some(handle),
            signal,
        })
    }
}

impl std::fmt::Debug for LogPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPipeline")
            .field("level", &self.log_level())
            .field("limit", &self.log_limit())
            .field("interval", &self.log_event_interval())
            .field("pending", &self.pending())
            .finish()
    }
}

#[derive(Debug, Default)]
struct DrainState {
    flush: bool,
    shutdown: bool,
    finished: bool,
}

/// Wake-up channel between a drain worker and its owner
#[derive(Debug, Default)]
struct DrainSignal {
    state: Mutex<DrainState>,
    wake: Condvar,
    done: Condvar,
}

impl DrainSignal {
    fn request_flush(&self) {
        self.state.lock().flush = true;
        self.wake.notify_one();
    }

    fn request_shutdown(&self) {
        self.state.lock().shutdown = true;
        self.wake.notify_one();
    }
}

fn drain_loop(pipeline: Arc<LogPipeline>, signal: Arc<DrainSignal>) {
    loop {
        let shutdown = {
            let mut state = signal.state.lock();
            if !state.flush && !state.shutdown {
                let interval = pipeline.log_event_interval();
                signal.wake.wait_for(&mut state, interval);
            }
            state.flush = false;
            state.shutdown
        };

        pipeline.deliver();

        if shutdown {
            break;
        }
    }

    signal.state.lock().finished = true;
    signal.done.notify_all();
    debug!("Log drain worker exited");
}

/// Handle to a running drain worker
///
/// Dropping the handle asks the worker to exit without waiting for it.
#[derive(Debug)]
pub struct DrainWorker {
    handle: Option<JoinHandle<()>>,
    signal: Arc<DrainSignal>,
}

impl DrainWorker {
    /// Ask the worker to deliver a final batch and exit
    ///
    /// Waits at most `grace` for the worker to acknowledge. A worker that does
    /// not answer in time is abandoned. Returns whether it exited.
    pub fn shutdown(mut self, grace: Duration) -> bool {
        self.signal.request_shutdown();

        let deadline = Instant::now() + grace;
        let finished = {
            let mut state = self.signal.state.lock();
            while !state.finished {
                if self.signal.done.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            state.finished
        };

        if let Some(handle) = self.handle.take() {
            if finished {
                if handle.join().is_err() {
                    warn!("Log drain worker panicked");
                }
            } else {
                warn!("Log drain worker did not stop within {:?}, abandoning it", grace);
            }
        }
        finished
    }
}

impl Drop for DrainWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.signal.request_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_append_filters_by_level() {
        let pipeline = LogPipeline::new(LogLevel::Warning);

        assert!(pipeline.message(LogLevel::Error, "error"));
        assert!(pipeline.message(LogLevel::Warning, "warning"));
        assert!(!pipeline.message(LogLevel::Info, "info"));
        assert!(!pipeline.message(LogLevel::Debug, "debug"));

        assert_eq!(pipeline.take_batch().len(), 2);
    }

    #[test]
    fn test_all_level_accepts_everything() {
        let pipeline = LogPipeline::new(LogLevel::All);
        assert!(pipeline.message(LogLevel::Debug, "debug"));
        assert!(pipeline.message(LogLevel::Error, "error"));
        assert_eq!(pipeline.pending(), 2);
    }

    #[test]
    fn test_ring_bound_keeps_newest_in_order() {
        let pipeline = LogPipeline::new(LogLevel::All);
        pipeline.set_log_limit(5);
        for n in 0..8u64 {
            pipeline.append(LogLevel::Info, LogEvent::Message, n);
        }

        let values: Vec<u64> = pipeline.take_batch().iter().filter_map(LogEntry::data).collect();
        assert_eq!(values, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_deliver_skips_empty_batches() {
        let pipeline = LogPipeline::new(LogLevel::All);
        let (tx, rx) = mpsc::channel::<usize>();
        let tx = Mutex::new(tx);
        pipeline.subscribe(move |batch: &[LogEntry]| {
            let _ = tx.lock().send(batch.len());
        });

        assert_eq!(pipeline.deliver(), 0);
        assert!(rx.try_recv().is_err());

        pipeline.message(LogLevel::Info, "one");
        pipeline.message(LogLevel::Info, "two");
        assert_eq!(pipeline.deliver(), 2);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn test_every_subscriber_sees_the_batch() {
        let pipeline = LogPipeline::new(LogLevel::All);
        let (tx, rx) = mpsc::channel::<&'static str>();
        let first = Mutex::new(tx.clone());
        let second = Mutex::new(tx);
        pipeline.subscribe(move |_: &[LogEntry]| {
            let _ = first.lock().send("first");
        });
        pipeline.subscribe(move |_: &[LogEntry]| {
            let _ = second.lock().send("second");
        });

        pipeline.message(LogLevel::Info, "entry");
        pipeline.deliver();

        let mut seen: Vec<_> = rx.try_iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec!["first", "second"]);
    }

    #[test]
    fn test_panicking_subscriber_is_contained() {
        let pipeline = LogPipeline::new(LogLevel::All);
        let (tx, rx) = mpsc::channel::<usize>();
        let tx = Mutex::new(tx);
        pipeline.subscribe(|_: &[LogEntry]| panic!("subscriber failure"));
        pipeline.subscribe(move |batch: &[LogEntry]| {
            let _ = tx.lock().send(batch.len());
        });

        pipeline.message(LogLevel::Info, "entry");
        assert_eq!(pipeline.deliver(), 1);
        assert_eq!(rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_flush_wakes_worker_before_interval() {
        let pipeline = Arc::new(LogPipeline::new(LogLevel::All));
        pipeline.set_log_event_interval(Duration::from_secs(3600));
        let (tx, rx) = mpsc::channel::<Vec<LogEntry>>();
        let tx = Mutex::new(tx);
        pipeline.subscribe(move |batch: &[LogEntry]| {
            let _ = tx.lock().send(batch.to_vec());
        });

        let worker = pipeline.spawn_drain().unwrap();
        pipeline.message(LogLevel::Info, "flushed");
        pipeline.flush();

        let batch = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].description(), Some("flushed"));

        assert!(worker.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_worker_drains_on_interval() {
        let pipeline = Arc::new(LogPipeline::new(LogLevel::All));
        pipeline.set_log_event_interval(Duration::from_millis(10));
        let (tx, rx) = mpsc::channel::<usize>();
        let tx = Mutex::new(tx);
        pipeline.subscribe(move |batch: &[LogEntry]| {
            let _ = tx.lock().send(batch.len());
        });

        let worker = pipeline.spawn_drain().unwrap();
        pipeline.message(LogLevel::Info, "tick");

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert!(worker.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_shutdown_delivers_final_batch() {
        let pipeline = Arc::new(LogPipeline::new(LogLevel::All));
        pipeline.set_log_event_interval(Duration::from_secs(3600));
        let (tx, rx) = mpsc::channel::<usize>();
        let tx = Mutex::new(tx);
        pipeline.subscribe(move |batch: &[LogEntry]| {
            let _ = tx.lock().send(batch.len());
        });

        let worker = pipeline.spawn_drain().unwrap();
        pipeline.message(LogLevel::Info, "last words");
        assert!(worker.shutdown(Duration::from_secs(5)));

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn test_shutdown_abandons_stuck_worker() {
        let pipeline = Arc::new(LogPipeline::new(LogLevel::All));
        pipeline.set_log_event_interval(Duration::from_secs(3600));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        pipeline.subscribe(move |_: &[LogEntry]| {
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(10));
        });

        let worker = pipeline.spawn_drain().unwrap();
        pipeline.message(LogLevel::Info, "blocks the subscriber");
        pipeline.flush();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        assert!(!worker.shutdown(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(5));

        let _ = release_tx.send(());
    }
}
