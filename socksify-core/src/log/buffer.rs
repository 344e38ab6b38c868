//! Bounded ring of pending log entries

use super::entry::LogEntry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded FIFO of log entries that evicts the oldest entry when full
///
/// Appends never block beyond the short critical section that pushes one
/// entry. `take` swaps the whole contents out under the same lock, so an
/// entry appended concurrently lands in exactly one batch.
#[derive(Debug)]
pub struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    limit: AtomicUsize,
}

impl LogBuffer {
    /// Create a buffer holding at most `limit` entries (minimum 1)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
            limit: AtomicUsize::new(limit),
        }
    }

    /// Append an entry, returning how many old entries were evicted
    pub fn push(&self, entry: LogEntry) -> usize {
        let mut entries = self.entries.lock();
        let limit = self.limit.load(Ordering::Acquire);
        let mut evicted = 0;
        while entries.len() >= limit {
            entries.pop_front();
            evicted += 1;
        }
        entries.push_back(entry);
        evicted
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Change the capacity; shrinking evicts the oldest entries
    pub fn set_limit(&self, limit: usize) {
        let limit = limit.max(1);
        let mut entries = self.entries.lock();
        self.limit.store(limit, Ordering::Release);
        let excess = entries.len().saturating_sub(limit);
        entries.drain(..excess);
    }

    /// Remove and return every pending entry in append order
    pub fn take(&self) -> Vec<LogEntry> {
        let mut entries = self.entries.lock();
        std::mem::take(&mut *entries).into()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
