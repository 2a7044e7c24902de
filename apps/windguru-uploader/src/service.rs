use crate::config::{UploadConfig, UploadPolicy};
use crate::error::ConfigError;
use crate::formatter::{Formatter, WindGuruFormatter};
use crate::log::Logger;
use crate::queue::UploadQueue;
use crate::record::{stamp, Record};
use crate::stats::{StatusSnapshot, UploadStats};
use crate::transport::HttpTransport;
use crate::worker::UploadWorker;
use crate::{log_debug, log_error, log_info, log_warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub accepted: bool,
    /// Older records dropped to stay within `max_backlog`.
    pub evicted: usize,
}

/// Producer-side handle. Cheap to clone; `submit` never blocks and never fails.
#[derive(Clone)]
pub struct RecordSubmitter {
    destination: Arc<str>,
    queue: Arc<UploadQueue>,
    stats: Arc<UploadStats>,
    logger: Arc<dyn Logger>,
    shutdown: CancellationToken,
    worker_alive: Arc<AtomicBool>,
}

impl RecordSubmitter {
    /// False once shutdown was requested or the worker task has ended.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && self.worker_alive.load(Ordering::Acquire)
    }

    pub fn submit(&self, record: Record) -> SubmitReceipt {
        let destination = &self.destination;
        if !self.is_running() {
            log_debug!(
                self.logger,
                "{destination}: channel stopped, dropping record {}",
                stamp(record.date_time)
            );
            return SubmitReceipt {
                accepted: false,
                evicted: 0,
            };
        }

        UploadStats::bump(&self.stats.submitted);
        let evicted = self.queue.push(record);
        for entry in &evicted {
            UploadStats::bump(&self.stats.evicted);
            log_warn!(
                self.logger,
                "{destination}: backlog limit {} reached, dropped record {}",
                self.queue.capacity().unwrap_or_default(),
                stamp(entry.record.date_time)
            );
        }
        SubmitReceipt {
            accepted: true,
            evicted: evicted.len(),
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.stats.snapshot(
            &self.destination,
            self.is_running(),
            self.queue.len(),
            self.queue.capacity(),
        )
    }
}

/// Cleared when the worker task ends, including by panic.
struct WorkerAlive(Arc<AtomicBool>);

impl Drop for WorkerAlive {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One upload channel: queue + background worker task.
///
/// Must be started from inside a tokio runtime. Call [`UploadService::shutdown`]
/// to stop the worker and wait for it.
pub struct UploadService {
    submitter: RecordSubmitter,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl UploadService {
    /// Starts the WindGuru channel. Incomplete configuration is logged once and
    /// the channel is not started.
    pub fn start<T>(
        config: &UploadConfig,
        transport: T,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, ConfigError>
    where
        T: HttpTransport,
    {
        let formatter = match WindGuruFormatter::from_config(config) {
            Ok(formatter) => formatter,
            Err(err) => {
                log_error!(logger, "WindGuru: data will not be posted: {err}");
                return Err(err);
            }
        };
        log_info!(
            logger,
            "WindGuru: data will be uploaded for station {} ({} protocol)",
            config.station_id,
            config.protocol
        );
        Ok(Self::spawn(formatter, transport, config.policy.clone(), logger))
    }

    /// Starts a channel for any destination format.
    pub fn spawn<F, T>(
        formatter: F,
        transport: T,
        policy: UploadPolicy,
        logger: Arc<dyn Logger>,
    ) -> Self
    where
        F: Formatter,
        T: HttpTransport,
    {
        let destination: Arc<str> = Arc::from(formatter.destination());
        let queue = Arc::new(UploadQueue::new(policy.max_backlog));
        let stats = Arc::new(UploadStats::new());
        let shutdown = CancellationToken::new();

        let worker = UploadWorker::new(
            formatter,
            transport,
            queue.clone(),
            policy,
            logger.clone(),
            stats.clone(),
            shutdown.clone(),
        );
        let worker_alive = Arc::new(AtomicBool::new(true));
        let alive = WorkerAlive(worker_alive.clone());
        let worker = tokio::spawn(async move {
            let _alive = alive;
            worker.run().await;
        });

        Self {
            submitter: RecordSubmitter {
                destination,
                queue,
                stats,
                logger,
                shutdown: shutdown.clone(),
                worker_alive,
            },
            shutdown,
            worker,
        }
    }

    pub fn submitter(&self) -> RecordSubmitter {
        self.submitter.clone()
    }

    pub fn submit(&self, record: Record) -> SubmitReceipt {
        self.submitter.submit(record)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.submitter.status()
    }

    /// Signals the worker and waits for it. A record mid-request finishes (or
    /// times out); one waiting between retries is abandoned.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.worker.await {
            log_error!(
                self.submitter.logger,
                "{}: upload worker ended abnormally: {err}",
                self.submitter.destination
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use crate::log::testing::MemoryLogger;
    use crate::log::LogLevel;
    use crate::units::UnitSystem;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    #[derive(Clone, Default)]
    struct CountingTransport {
        urls: Arc<Mutex<Vec<Url>>>,
    }

    impl HttpTransport for CountingTransport {
        async fn get(&self, url: &Url, _timeout: Duration) -> Result<String, UploadError> {
            self.urls.lock().unwrap().push(url.clone());
            Ok("OK".to_string())
        }
    }

    fn record(wind: f64) -> Record {
        Record {
            wind_speed: Some(wind),
            ..Record::new(Utc::now().timestamp(), UnitSystem::MetricWx)
        }
    }

    #[tokio::test]
    async fn missing_station_id_never_starts_and_logs_once() {
        let memory = Arc::new(MemoryLogger::default());
        let config = UploadConfig::new("", "secret");
        let err = UploadService::start(&config, CountingTransport::default(), memory.clone())
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::Missing("station_id"));
        assert_eq!(memory.count(LogLevel::Error, "will not be posted"), 1);
        assert_eq!(memory.lines().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_records_are_uploaded_in_order() {
        let memory = Arc::new(MemoryLogger::default());
        let transport = CountingTransport::default();
        let mut config = UploadConfig::new("beach", "secret");
        config.policy.post_interval = Duration::from_secs(60);

        let service = UploadService::start(&config, transport.clone(), memory.clone()).unwrap();
        for wind in [1.0, 2.0, 3.0] {
            assert_eq!(
                service.submit(record(wind)),
                SubmitReceipt {
                    accepted: true,
                    evicted: 0
                }
            );
        }
        tokio::time::sleep(Duration::from_secs(200)).await;

        let status = service.status();
        assert_eq!(status.submitted, 3);
        assert_eq!(status.delivered, 3);
        assert_eq!(status.queue_depth, 0);
        assert!(status.running);
        service.shutdown().await;

        let sent: Vec<String> = transport
            .urls
            .lock()
            .unwrap()
            .iter()
            .map(|url| {
                url.query_pairs()
                    .find(|(k, _)| k == "wind_avg")
                    .map(|(_, v)| v.into_owned())
                    .unwrap()
            })
            .collect();
        assert_eq!(sent, vec!["1.9", "3.9", "5.8"]);
        assert_eq!(memory.count(LogLevel::Info, "published record"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_overflow_is_counted_and_logged() {
        let memory = Arc::new(MemoryLogger::default());
        let mut config = UploadConfig::new("beach", "secret");
        config.policy.max_backlog = Some(2);
        config.policy.post_interval = Duration::from_secs(3600);

        let service =
            UploadService::start(&config, CountingTransport::default(), memory.clone()).unwrap();
        let submitter = service.submitter();
        let receipts: Vec<SubmitReceipt> = (0..5)
            .map(|i| submitter.submit(record(i as f64 + 1.0)))
            .collect();

        assert_eq!(receipts.iter().map(|r| r.evicted).sum::<usize>(), 3);
        let status = submitter.status();
        assert_eq!(status.evicted, 3);
        assert!(status.queue_depth <= 2);
        assert_eq!(memory.count(LogLevel::Warn, "backlog limit 2 reached"), 3);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_dropped() {
        let memory = Arc::new(MemoryLogger::default());
        let config = UploadConfig::new("beach", "secret");
        let service =
            UploadService::start(&config, CountingTransport::default(), memory.clone()).unwrap();
        let submitter = service.submitter();
        service.shutdown().await;

        let receipt = submitter.submit(record(4.0));
        assert!(!receipt.accepted);
        assert!(!submitter.status().running);
        assert_eq!(submitter.status().submitted, 0);
    }

    struct PanickingTransport;

    impl HttpTransport for PanickingTransport {
        async fn get(&self, _url: &Url, _timeout: Duration) -> Result<String, UploadError> {
            panic!("transport blew up");
        }
    }

    #[tokio::test]
    async fn dead_worker_reports_not_running_and_refuses_records() {
        let memory = Arc::new(MemoryLogger::default());
        let config = UploadConfig::new("beach", "secret");
        let service = UploadService::start(&config, PanickingTransport, memory.clone()).unwrap();
        assert!(service.submit(record(2.0)).accepted);

        for _ in 0..100 {
            if !service.status().running {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!service.status().running);
        assert!(!service.submit(record(3.0)).accepted);
        assert_eq!(service.status().submitted, 1);

        service.shutdown().await;
        assert_eq!(memory.count(LogLevel::Error, "ended abnormally"), 1);
    }
}
