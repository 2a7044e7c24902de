use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome counters for one upload channel, shared between the producer
/// side, the worker and the status endpoint.
#[derive(Debug, Default)]
pub struct UploadStats {
    pub submitted: AtomicU64,
    pub evicted: AtomicU64,
    pub discarded_stale: AtomicU64,
    pub unformattable: AtomicU64,
    pub skipped: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub attempts: AtomicU64,
    /// Unix seconds of the last delivered record's `dateTime`; only meaningful
    /// once `delivered` is non-zero.
    pub last_delivered_record: AtomicI64,
    pub last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub destination: String,
    pub running: bool,
    pub queue_depth: usize,
    pub max_backlog: Option<usize>,
    pub submitted: u64,
    pub evicted: u64,
    pub discarded_stale: u64,
    pub unformattable: u64,
    pub skipped: u64,
    pub delivered: u64,
    pub failed: u64,
    pub attempts: u64,
    pub last_delivered_record: Option<i64>,
    pub last_error: Option<String>,
}

impl UploadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, date_time: i64) {
        self.last_delivered_record.store(date_time, Ordering::Relaxed);
        Self::bump(&self.delivered);
        self.clear_error();
    }

    pub fn record_error(&self, err: impl Into<String>) {
        *self.error_slot() = Some(err.into());
    }

    pub fn clear_error(&self) {
        *self.error_slot() = None;
    }

    fn error_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(
        &self,
        destination: &str,
        running: bool,
        queue_depth: usize,
        max_backlog: Option<usize>,
    ) -> StatusSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let delivered = load(&self.delivered);
        let last_delivered = self.last_delivered_record.load(Ordering::Relaxed);
        StatusSnapshot {
            destination: destination.to_string(),
            running,
            queue_depth,
            max_backlog,
            submitted: load(&self.submitted),
            evicted: load(&self.evicted),
            discarded_stale: load(&self.discarded_stale),
            unformattable: load(&self.unformattable),
            skipped: load(&self.skipped),
            delivered,
            failed: load(&self.failed),
            attempts: load(&self.attempts),
            last_delivered_record: (delivered > 0).then_some(last_delivered),
            last_error: self.error_slot().clone(),
        }
    }
}
