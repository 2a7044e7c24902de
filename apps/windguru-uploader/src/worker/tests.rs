use super::*;
use crate::formatter::{Protocol, WindGuruFormatter};
use crate::log::testing::MemoryLogger;
use crate::log::LogLevel;
use crate::units::UnitSystem;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

type Reply = Arc<dyn Fn(usize) -> Result<String, UploadError> + Send + Sync>;

/// Answers each call from `reply(call_number)` and remembers when it was called.
#[derive(Clone)]
struct ScriptedTransport {
    calls: Arc<Mutex<Vec<Instant>>>,
    reply: Reply,
}

impl ScriptedTransport {
    fn new(reply: impl Fn(usize) -> Result<String, UploadError> + Send + Sync + 'static) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            reply: Arc::new(reply),
        }
    }

    fn always(body: &'static str) -> Self {
        Self::new(move |_| Ok(body.to_string()))
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl HttpTransport for ScriptedTransport {
    async fn get(&self, _url: &Url, _timeout: Duration) -> Result<String, UploadError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len()
        };
        (self.reply)(call)
    }
}

/// Never answers; every attempt runs into the timeout.
#[derive(Clone, Default)]
struct HangingTransport {
    calls: Arc<Mutex<usize>>,
}

impl HttpTransport for HangingTransport {
    async fn get(&self, _url: &Url, _timeout: Duration) -> Result<String, UploadError> {
        *self.calls.lock().unwrap() += 1;
        std::future::pending::<Result<String, UploadError>>().await
    }
}

struct Harness<T> {
    worker: UploadWorker<WindGuruFormatter, T>,
    queue: Arc<UploadQueue>,
    logger: Arc<MemoryLogger>,
    stats: Arc<UploadStats>,
    shutdown: CancellationToken,
}

fn harness<T: HttpTransport>(transport: T, policy: UploadPolicy) -> Harness<T> {
    let formatter = WindGuruFormatter::new(
        "beach",
        "secret",
        Url::parse("http://www.windguru.cz/upload/api.php").unwrap(),
        Protocol::Current,
    );
    let queue = Arc::new(UploadQueue::new(policy.max_backlog));
    let logger = Arc::new(MemoryLogger::default());
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
    Harness {
        worker,
        queue,
        logger,
        stats,
        shutdown,
    }
}

fn policy() -> UploadPolicy {
    UploadPolicy {
        post_interval: Duration::from_secs(60),
        timeout: Duration::from_secs(10),
        max_tries: 3,
        retry_wait: Duration::from_secs(5),
        ..UploadPolicy::default()
    }
}

fn fresh_record() -> Record {
    Record {
        interval: Some(1),
        wind_speed: Some(5.0),
        wind_gust: Some(7.0),
        ..Record::new(Utc::now().timestamp(), UnitSystem::MetricWx)
    }
}

fn entry(record: Record) -> QueueEntry {
    QueueEntry {
        record,
        enqueued_at: Utc::now(),
    }
}

#[tokio::test]
async fn stale_record_is_never_sent() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(
        transport.clone(),
        UploadPolicy {
            stale: Some(Duration::from_secs(300)),
            ..policy()
        },
    );
    let record = Record {
        date_time: Utc::now().timestamp() - 3600,
        ..fresh_record()
    };

    let outcome = h.worker.process(entry(record)).await;
    assert!(matches!(outcome, Outcome::Stale { age_secs } if age_secs >= 3600));
    assert_eq!(transport.call_count(), 0);
    assert_eq!(h.stats.discarded_stale.load(Ordering::Relaxed), 1);
    assert_eq!(h.logger.count(LogLevel::Info, "is stale"), 1);
}

#[tokio::test]
async fn record_within_stale_limit_is_sent() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(
        transport.clone(),
        UploadPolicy {
            stale: Some(Duration::from_secs(300)),
            ..policy()
        },
    );
    let record = Record {
        date_time: Utc::now().timestamp() - 60,
        ..fresh_record()
    };
    assert_eq!(
        h.worker.process(entry(record)).await,
        Outcome::Delivered { attempts: 1 }
    );
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn missing_wind_speed_is_never_sent() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(transport.clone(), policy());
    let record = Record {
        wind_speed: None,
        ..fresh_record()
    };

    let outcome = h.worker.process(entry(record)).await;
    assert_eq!(
        outcome,
        Outcome::Unformattable {
            reason: "no windSpeed in record".to_string()
        }
    );
    assert_eq!(transport.call_count(), 0);
    assert_eq!(h.stats.unformattable.load(Ordering::Relaxed), 1);
    assert_eq!(h.logger.count(LogLevel::Error, "no windSpeed"), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_upload_is_tried_max_tries_then_dropped() {
    let transport = ScriptedTransport::always("ERROR: wrong hash");
    let h = harness(transport.clone(), policy());

    let outcome = h.worker.process(entry(fresh_record())).await;
    assert_eq!(
        outcome,
        Outcome::Failed {
            attempts: 3,
            reason: "server response: ERROR: wrong hash".to_string()
        }
    );

    let times = transport.call_times();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
    }
    assert_eq!(h.stats.failed.load(Ordering::Relaxed), 1);
    assert_eq!(h.stats.attempts.load(Ordering::Relaxed), 3);
    assert_eq!(h.logger.count(LogLevel::Error, "failed to publish record"), 1);
    assert_eq!(h.logger.count(LogLevel::Debug, "attempt"), 3);
    assert!(h.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn failure_is_silent_when_log_failure_is_off() {
    let transport = ScriptedTransport::always("nope");
    let h = harness(
        transport.clone(),
        UploadPolicy {
            log_failure: false,
            max_tries: 1,
            ..policy()
        },
    );
    let outcome = h.worker.process(entry(fresh_record())).await;
    assert!(matches!(outcome, Outcome::Failed { attempts: 1, .. }));
    assert_eq!(h.logger.count(LogLevel::Error, "failed to publish"), 0);
}

#[tokio::test]
async fn ok_on_first_attempt_sends_once_and_logs_success() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(transport.clone(), policy());

    let outcome = h.worker.process(entry(fresh_record())).await;
    assert_eq!(outcome, Outcome::Delivered { attempts: 1 });
    assert_eq!(transport.call_count(), 1);
    assert_eq!(h.stats.delivered.load(Ordering::Relaxed), 1);
    assert_eq!(h.logger.count(LogLevel::Info, "published record"), 1);
}

#[tokio::test]
async fn success_is_silent_when_log_success_is_off() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(
        transport.clone(),
        UploadPolicy {
            log_success: false,
            ..policy()
        },
    );
    h.worker.process(entry(fresh_record())).await;
    assert_eq!(h.logger.count(LogLevel::Info, "published record"), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_error_then_ok_stops_retrying() {
    let transport = ScriptedTransport::new(|call| match call {
        1 => Err(UploadError::Transport("connection refused".to_string())),
        2 => Err(UploadError::Status(503)),
        _ => Ok("OK\n".to_string()),
    });
    let h = harness(
        transport.clone(),
        UploadPolicy {
            max_tries: 5,
            ..policy()
        },
    );

    let outcome = h.worker.process(entry(fresh_record())).await;
    assert_eq!(outcome, Outcome::Delivered { attempts: 3 });
    assert_eq!(transport.call_count(), 3);
    assert_eq!(h.stats.snapshot("WindGuru", true, 0, None).last_error, None);
}

#[tokio::test(start_paused = true)]
async fn unanswered_requests_time_out_within_cycle_budget() {
    let transport = HangingTransport::default();
    let policy = UploadPolicy {
        max_tries: 2,
        ..policy()
    };
    let budget = policy.cycle_budget();
    let h = harness(transport.clone(), policy);

    let started = Instant::now();
    let outcome = h.worker.process(entry(fresh_record())).await;
    assert_eq!(
        outcome,
        Outcome::Failed {
            attempts: 2,
            reason: "request timed out after 10s".to_string()
        }
    );
    assert_eq!(*transport.calls.lock().unwrap(), 2);
    assert_eq!(started.elapsed(), budget);
}

#[tokio::test]
async fn skip_upload_never_contacts_network() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(
        transport.clone(),
        UploadPolicy {
            skip_upload: true,
            ..policy()
        },
    );

    for _ in 0..3 {
        assert_eq!(h.worker.process(entry(fresh_record())).await, Outcome::Skipped);
    }
    assert_eq!(transport.call_count(), 0);
    assert_eq!(h.stats.skipped.load(Ordering::Relaxed), 3);
    assert_eq!(h.logger.count(LogLevel::Info, "upload disabled"), 3);
}

#[tokio::test(start_paused = true)]
async fn backlog_is_drained_no_faster_than_post_interval() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(transport.clone(), policy());
    for _ in 0..4 {
        h.queue.push(fresh_record());
    }

    let handle = tokio::spawn(h.worker.run());
    tokio::time::sleep(Duration::from_secs(400)).await;
    h.shutdown.cancel();
    handle.await.unwrap();

    let times = transport.call_times();
    assert_eq!(times.len(), 4);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(60));
    }
    assert!(h.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn post_interval_beyond_clock_range_parks_worker() {
    let transport = ScriptedTransport::always("OK");
    let policy = UploadPolicy {
        post_interval: Duration::from_secs(u64::MAX),
        ..policy()
    };
    let mut config = crate::config::UploadConfig::new("beach", "secret");
    config.policy = policy.clone();
    assert!(config.validate().is_ok());

    let h = harness(transport.clone(), policy);
    h.queue.push(fresh_record());
    h.queue.push(fresh_record());

    let handle = tokio::spawn(h.worker.run());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.call_count(), 1);
    assert!(!handle.is_finished());
    assert_eq!(h.queue.len(), 1);

    h.shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn stale_limit_beyond_i64_accepts_fresh_record() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(
        transport.clone(),
        UploadPolicy {
            stale: Some(Duration::from_secs(u64::MAX)),
            ..policy()
        },
    );
    let outcome = h.worker.process(entry(fresh_record())).await;
    assert_eq!(outcome, Outcome::Delivered { attempts: 1 });
    assert_eq!(h.stats.discarded_stale.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_discard_does_not_consume_post_interval() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(
        transport.clone(),
        UploadPolicy {
            stale: Some(Duration::from_secs(300)),
            ..policy()
        },
    );
    h.queue.push(Record {
        date_time: Utc::now().timestamp() - 3600,
        ..fresh_record()
    });
    h.queue.push(fresh_record());

    let started = Instant::now();
    let handle = tokio::spawn(h.worker.run());
    tokio::time::sleep(Duration::from_secs(30)).await;
    h.shutdown.cancel();
    handle.await.unwrap();

    let times = transport.call_times();
    assert_eq!(times.len(), 1);
    assert!(times[0] - started < Duration::from_secs(1));
    assert_eq!(h.stats.discarded_stale.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_retry_wait_abandons_record() {
    let transport = ScriptedTransport::always("bad");
    let h = harness(
        transport.clone(),
        UploadPolicy {
            retry_wait: Duration::from_secs(30),
            ..policy()
        },
    );
    h.queue.push(fresh_record());

    let handle = tokio::spawn(h.worker.run());
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(h.stats.failed.load(Ordering::Relaxed), 0);
    assert_eq!(h.logger.count(LogLevel::Warn, "abandoned record"), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_worker_exits_on_shutdown() {
    let transport = ScriptedTransport::always("OK");
    let h = harness(transport.clone(), policy());

    let handle = tokio::spawn(h.worker.run());
    tokio::time::sleep(Duration::from_secs(60)).await;
    h.shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(transport.call_count(), 0);
    assert_eq!(h.logger.count(LogLevel::Debug, "upload worker stopped"), 1);
}
