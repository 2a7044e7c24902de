//! The single upload task of a channel.
//!
//! One record's whole retry cycle finishes before the next record is looked
//! at, so there is never more than one request in flight. Between cycles the
//! worker waits out `post_interval`, measured from the end of the previous
//! completed cycle.

#[cfg(test)]
mod tests;

use crate::config::UploadPolicy;
use crate::error::UploadError;
use crate::formatter::Formatter;
use crate::log::Logger;
use crate::queue::{QueueEntry, UploadQueue};
use crate::record::{stamp, Record};
use crate::stats::UploadStats;
use crate::transport::HttpTransport;
use crate::{log_debug, log_error, log_info, log_warn};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Terminal state of one dequeued record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
    /// `skip_upload` is set; nothing was sent.
    Skipped,
    Stale { age_secs: i64 },
    Unformattable { reason: String },
    /// Shutdown arrived during a retry wait.
    Abandoned { attempts: u32 },
}

impl Outcome {
    /// Whether this outcome counts as a completed upload cycle for throttling.
    fn completes_cycle(&self) -> bool {
        matches!(
            self,
            Outcome::Delivered { .. } | Outcome::Failed { .. } | Outcome::Skipped
        )
    }
}

pub struct UploadWorker<F, T> {
    formatter: F,
    transport: T,
    queue: Arc<UploadQueue>,
    policy: UploadPolicy,
    logger: Arc<dyn Logger>,
    stats: Arc<UploadStats>,
    shutdown: CancellationToken,
    last_completed: Option<Instant>,
}

impl<F, T> UploadWorker<F, T>
where
    F: Formatter,
    T: HttpTransport,
{
    pub fn new(
        formatter: F,
        transport: T,
        queue: Arc<UploadQueue>,
        policy: UploadPolicy,
        logger: Arc<dyn Logger>,
        stats: Arc<UploadStats>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            formatter,
            transport,
            queue,
            policy,
            logger,
            stats,
            shutdown,
            last_completed: None,
        }
    }

    pub async fn run(mut self) {
        let destination = self.formatter.destination().to_string();
        log_debug!(self.logger, "{destination}: upload worker started");

        loop {
            if !self.wait_for_throttle().await {
                break;
            }

            let entry = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                entry = self.queue.pop_timeout(self.policy.poll_interval) => entry,
            };
            let Some(entry) = entry else {
                continue;
            };

            let outcome = self.process(entry).await;
            if outcome.completes_cycle() {
                self.last_completed = Some(Instant::now());
            }
            if matches!(outcome, Outcome::Abandoned { .. }) {
                break;
            }
        }

        log_debug!(self.logger, "{destination}: upload worker stopped");
    }

    /// Returns `false` if shutdown was requested while waiting.
    async fn wait_for_throttle(&self) -> bool {
        let Some(last) = self.last_completed else {
            return !self.shutdown.is_cancelled();
        };
        // An interval past the clock's range means no further uploads.
        let Some(ready_at) = last.checked_add(self.policy.post_interval) else {
            self.shutdown.cancelled().await;
            return false;
        };
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep_until(ready_at) => true,
        }
    }

    /// Runs one record through staleness, formatting and delivery.
    pub async fn process(&self, entry: QueueEntry) -> Outcome {
        let record = entry.record;
        let destination = self.formatter.destination();
        let when = stamp(record.date_time);

        if let Some(stale) = self.policy.stale {
            let age_secs = record.age_secs(Utc::now().timestamp());
            let limit = i64::try_from(stale.as_secs()).unwrap_or(i64::MAX);
            if age_secs > limit {
                UploadStats::bump(&self.stats.discarded_stale);
                log_info!(
                    self.logger,
                    "{destination}: record {when} is stale ({age_secs}s old, limit {}s)",
                    stale.as_secs()
                );
                return Outcome::Stale { age_secs };
            }
        }

        let url = match self.formatter.format(&record) {
            Ok(url) => url,
            Err(err) => {
                UploadStats::bump(&self.stats.unformattable);
                self.stats.record_error(err.to_string());
                log_error!(
                    self.logger,
                    "{destination}: cannot upload record {when}: {err}"
                );
                return Outcome::Unformattable {
                    reason: err.to_string(),
                };
            }
        };
        log_debug!(self.logger, "{destination}: url: {}", self.formatter.redact(&url));

        if self.policy.skip_upload {
            UploadStats::bump(&self.stats.skipped);
            log_info!(
                self.logger,
                "{destination}: upload disabled, skipped record {when}"
            );
            return Outcome::Skipped;
        }

        self.post_with_retries(&record, &url).await
    }

    async fn post_with_retries(&self, record: &Record, url: &Url) -> Outcome {
        let destination = self.formatter.destination();
        let when = stamp(record.date_time);
        let max_tries = self.policy.max_tries.max(1);
        let mut last_err: Option<UploadError> = None;

        for attempt in 1..=max_tries {
            UploadStats::bump(&self.stats.attempts);
            match self.attempt(url).await {
                Ok(()) => {
                    self.stats.record_delivery(record.date_time);
                    if self.policy.log_success {
                        log_info!(
                            self.logger,
                            "{destination}: published record {when} (attempt {attempt})"
                        );
                    }
                    return Outcome::Delivered { attempts: attempt };
                }
                Err(err) => {
                    log_debug!(
                        self.logger,
                        "{destination}: attempt {attempt} of {max_tries} for {when} failed: {err}"
                    );
                    last_err = Some(err);
                }
            }

            if attempt < max_tries {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        log_warn!(
                            self.logger,
                            "{destination}: shutdown, abandoned record {when} after {attempt} tries"
                        );
                        return Outcome::Abandoned { attempts: attempt };
                    }
                    _ = tokio::time::sleep(self.policy.retry_wait) => {}
                }
            }
        }

        let reason = last_err
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        UploadStats::bump(&self.stats.failed);
        self.stats.record_error(reason.clone());
        if self.policy.log_failure {
            log_error!(
                self.logger,
                "{destination}: failed to publish record {when} after {max_tries} tries: {reason}"
            );
        }
        Outcome::Failed {
            attempts: max_tries,
            reason,
        }
    }

    async fn attempt(&self, url: &Url) -> Result<(), UploadError> {
        let timeout = self.policy.timeout;
        let body = tokio::time::timeout(timeout, self.transport.get(url, timeout))
            .await
            .map_err(|_| UploadError::Timeout(timeout))??;
        self.formatter.check_response(&body)
    }
}
