use crate::record::Record;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub record: Record,
    pub enqueued_at: DateTime<Utc>,
}

/// Bounded FIFO between the producer and the upload worker.
///
/// `push` never blocks: when the backlog limit is reached the oldest entries
/// are evicted to make room. `pop_timeout` is the worker side.
#[derive(Debug)]
pub struct UploadQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    notify: Notify,
    max_backlog: Option<usize>,
}

impl UploadQueue {
    pub fn new(max_backlog: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_backlog: max_backlog.map(|max| max.max(1)),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.max_backlog
    }

    /// Appends `record` and returns whatever had to be evicted, oldest first.
    pub fn push(&self, record: Record) -> Vec<QueueEntry> {
        let entry = QueueEntry {
            record,
            enqueued_at: Utc::now(),
        };
        let mut evicted = Vec::new();
        {
            let mut entries = self.lock();
            if let Some(max) = self.max_backlog {
                while entries.len() >= max {
                    match entries.pop_front() {
                        Some(oldest) => evicted.push(oldest),
                        None => break,
                    }
                }
            }
            entries.push_back(entry);
        }
        self.notify.notify_one();
        evicted
    }

    pub fn try_pop(&self) -> Option<QueueEntry> {
        self.lock().pop_front()
    }

    /// Waits up to `timeout` for the oldest entry.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<QueueEntry> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = self.try_pop();
            if next.is_some() {
                return next;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueEntry>> {
        // Entries stay consistent even if a holder panicked; keep serving them.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
