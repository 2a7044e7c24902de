//! Upload channel that forwards weather-station archive records to WindGuru.
//!
//! The host submits one [`record::Record`] per archive interval through a
//! [`service::RecordSubmitter`]; a single background worker formats each
//! record, sends it and retries under the channel's [`config::UploadPolicy`].

pub mod config;
pub mod error;
pub mod formatter;
pub mod http;
pub mod log;
pub mod queue;
pub mod record;
pub mod service;
pub mod stats;
pub mod transport;
pub mod units;
pub mod worker;
