use std::time::Duration;

use trendscope_core::phase::JobKind;
use trendscope_transport::poll::PollInterval;
use trendscope_transport::stream::StreamConfig;

/// Default poll interval in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default upper bound for the adaptive poll interval in milliseconds.
const DEFAULT_POLL_MAX_INTERVAL_MS: u64 = 10_000;

/// Default stream idle timeout in seconds.
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 90;

/// Default capacity of the registry command queue.
const DEFAULT_REGISTRY_QUEUE_CAPACITY: usize = 256;

/// A missing or malformed configuration value.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Tracker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// REST base URL, e.g. `https://trendscope.example`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `wss://trendscope.example`.
    pub ws_url: String,
    /// Bearer credential for both transports.
    pub token: String,
    pub poll_interval: PollInterval,
    /// Kinds polled from startup.
    pub poll_kinds: Vec<JobKind>,
    pub stream_idle_timeout: Duration,
    pub registry_capacity: usize,
}

impl TrackerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                    | Default     |
    /// |----------------------------|-------------|
    /// | `TRENDSCOPE_API_URL`       | required    |
    /// | `TRENDSCOPE_WS_URL`        | required    |
    /// | `TRENDSCOPE_TOKEN`         | required    |
    /// | `POLL_INTERVAL_MS`         | `2000`      |
    /// | `POLL_MAX_INTERVAL_MS`     | `10000`     |
    /// | `POLL_KINDS`               | all kinds   |
    /// | `STREAM_IDLE_TIMEOUT_SECS` | `90`        |
    /// | `REGISTRY_QUEUE_CAPACITY`  | `256`       |
    ///
    /// `POLL_KINDS` is a comma-separated list such as
    /// `discovery_scan,bulk_download`. When `POLL_MAX_INTERVAL_MS` is not
    /// above `POLL_INTERVAL_MS` polling uses a fixed interval.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = required(&lookup, "TRENDSCOPE_API_URL")?;
        let ws_url = required(&lookup, "TRENDSCOPE_WS_URL")?;
        let token = required(&lookup, "TRENDSCOPE_TOKEN")?;

        let min_ms: u64 = parsed(&lookup, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let max_ms: u64 = parsed(&lookup, "POLL_MAX_INTERVAL_MS", DEFAULT_POLL_MAX_INTERVAL_MS)?;
        if min_ms == 0 {
            return Err(invalid("POLL_INTERVAL_MS", "0", "must be positive"));
        }
        let poll_interval = if max_ms > min_ms {
            PollInterval::Adaptive {
                min: Duration::from_millis(min_ms),
                max: Duration::from_millis(max_ms),
            }
        } else {
            PollInterval::Fixed(Duration::from_millis(min_ms))
        };

        let poll_kinds = match lookup("POLL_KINDS") {
            Some(raw) if !raw.trim().is_empty() => parse_kinds(&raw)?,
            _ => JobKind::ALL.to_vec(),
        };

        let idle_secs: u64 = parsed(
            &lookup,
            "STREAM_IDLE_TIMEOUT_SECS",
            DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
        )?;
        if idle_secs == 0 {
            return Err(invalid("STREAM_IDLE_TIMEOUT_SECS", "0", "must be positive"));
        }

        let registry_capacity: usize = parsed(
            &lookup,
            "REGISTRY_QUEUE_CAPACITY",
            DEFAULT_REGISTRY_QUEUE_CAPACITY,
        )?;
        if registry_capacity == 0 {
            return Err(invalid("REGISTRY_QUEUE_CAPACITY", "0", "must be positive"));
        }

        Ok(Self {
            api_url,
            ws_url,
            token,
            poll_interval,
            poll_kinds,
            stream_idle_timeout: Duration::from_secs(idle_secs),
            registry_capacity,
        })
    }

    /// Stream settings with the configured idle timeout and default backoff.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            idle_timeout: self.stream_idle_timeout,
            ..StreamConfig::default()
        }
    }
}

// ---- private helpers ----

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing(var)),
    }
}

fn parsed<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn parse_kinds(raw: &str) -> Result<Vec<JobKind>, ConfigError> {
    let mut kinds = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind = JobKind::parse(part)
            .ok_or_else(|| invalid("POLL_KINDS", raw, &format!("unknown job kind '{part}'")))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
