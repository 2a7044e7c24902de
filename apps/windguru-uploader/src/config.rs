use crate::error::ConfigError;
use crate::formatter::Protocol;
use std::env;
use std::time::Duration;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "http://www.windguru.cz/upload/api.php";
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:9102";

/// Queueing, throttling and retry knobs for one upload channel.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    /// Minimum spacing between completed upload cycles.
    pub post_interval: Duration,
    /// `None` means unbounded.
    pub max_backlog: Option<usize>,
    pub stale: Option<Duration>,
    pub timeout: Duration,
    pub max_tries: u32,
    pub retry_wait: Duration,
    pub skip_upload: bool,
    pub log_success: bool,
    pub log_failure: bool,
    /// How long an idle worker waits on the queue before re-checking shutdown.
    pub poll_interval: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            post_interval: Duration::from_secs(60),
            max_backlog: None,
            stale: None,
            timeout: Duration::from_secs(60),
            max_tries: 3,
            retry_wait: Duration::from_secs(5),
            skip_upload: false,
            log_success: true,
            log_failure: true,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl UploadPolicy {
    /// Upper bound for one record's full retry cycle.
    pub fn cycle_budget(&self) -> Duration {
        let tries = self.max_tries.max(1);
        self.timeout * tries + self.retry_wait * (tries - 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    pub station_id: String,
    pub password: String,
    pub server_url: String,
    pub protocol: Protocol,
    pub policy: UploadPolicy,
}

impl UploadConfig {
    pub fn new(station_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            station_id: station_id.into(),
            password: password.into(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            protocol: Protocol::default(),
            policy: UploadPolicy::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolves the channel settings from `WINDGURU_*` keys. Missing
    /// credentials are left empty here and rejected by [`UploadConfig::validate`]
    /// when the channel starts.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let station_id = get("WINDGURU_STATION_ID").unwrap_or_default();
        let password = get("WINDGURU_PASSWORD").unwrap_or_default();

        let server_url =
            get("WINDGURU_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

        let protocol = match get("WINDGURU_PROTOCOL") {
            Some(raw) => raw.parse::<Protocol>().map_err(|reason| ConfigError::Invalid {
                key: "protocol",
                reason,
            })?,
            None => Protocol::default(),
        };

        let defaults = UploadPolicy::default();
        let policy = UploadPolicy {
            post_interval: secs_or(
                get("WINDGURU_POST_INTERVAL"),
                "post_interval",
                defaults.post_interval,
            )?,
            max_backlog: parse_opt::<usize>(get("WINDGURU_MAX_BACKLOG"), "max_backlog")?,
            stale: parse_opt::<u64>(get("WINDGURU_STALE"), "stale")?.map(Duration::from_secs),
            timeout: secs_or(get("WINDGURU_TIMEOUT"), "timeout", defaults.timeout)?,
            max_tries: parse_opt::<u32>(get("WINDGURU_MAX_TRIES"), "max_tries")?
                .unwrap_or(defaults.max_tries),
            retry_wait: secs_or(get("WINDGURU_RETRY_WAIT"), "retry_wait", defaults.retry_wait)?,
            skip_upload: bool_or(get("WINDGURU_SKIP_UPLOAD"), "skip_upload", defaults.skip_upload)?,
            log_success: bool_or(get("WINDGURU_LOG_SUCCESS"), "log_success", defaults.log_success)?,
            log_failure: bool_or(get("WINDGURU_LOG_FAILURE"), "log_failure", defaults.log_failure)?,
            poll_interval: defaults.poll_interval,
        };

        Ok(Self {
            station_id,
            password,
            server_url,
            protocol,
            policy,
        })
    }

    pub fn server_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.server_url).map_err(|err| ConfigError::Invalid {
            key: "server_url",
            reason: err.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.station_id.trim().is_empty() {
            return Err(ConfigError::Missing("station_id"));
        }
        if self.password.trim().is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        self.server_url()?;
        if self.policy.max_tries == 0 {
            return Err(ConfigError::Invalid {
                key: "max_tries",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.policy.max_backlog == Some(0) {
            return Err(ConfigError::Invalid {
                key: "max_backlog",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.policy.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "timeout",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Process-level settings for the standalone binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub upload: UploadConfig,
    pub http_bind: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let upload = UploadConfig::from_env()?;
        let http_bind = env::var("WINDGURU_HTTP_BIND")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        Ok(Self { upload, http_bind })
    }
}

fn parse_opt<T>(raw: Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.parse::<T>().map_err(|err| ConfigError::Invalid {
            key,
            reason: format!("{value:?}: {err}"),
        })
    })
    .transpose()
}

fn secs_or(
    raw: Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(parse_opt::<u64>(raw, key)?
        .map(Duration::from_secs)
        .unwrap_or(default))
}

fn bool_or(raw: Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = raw else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            reason: format!("{value:?} is not a boolean"),
        }),
    }
}
