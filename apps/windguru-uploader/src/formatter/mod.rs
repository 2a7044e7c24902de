mod windguru;

pub use windguru::{WindGuruFormatter, ACK_TOKEN};

use crate::error::{FormatError, UploadError};
use crate::record::Record;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Per-destination wire format: how a record becomes a request and how the
/// reply is judged. The worker is generic over this.
pub trait Formatter: Send + Sync + 'static {
    /// Name used in log lines.
    fn destination(&self) -> &str;

    fn format(&self, record: &Record) -> Result<Url, FormatError>;

    /// `Ok` only when the body affirmatively acknowledges the upload.
    fn check_response(&self, body: &str) -> Result<(), UploadError>;

    /// URL as it may appear in logs.
    fn redact(&self, url: &Url) -> String {
        url.to_string()
    }
}

/// WindGuru upload protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Salted MD5 authentication, `percip_interval`, `precip`.
    #[default]
    Current,
    /// Deprecated unauthenticated profile: `precip_interval`, `rain`, plus
    /// local `date`/`time` fields.
    Legacy,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" => Ok(Protocol::Current),
            "legacy" => Ok(Protocol::Legacy),
            other => Err(format!("unknown protocol {other:?} (expected current or legacy)")),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Current => f.write_str("current"),
            Protocol::Legacy => f.write_str("legacy"),
        }
    }
}
