//! Process configuration loaded from environment variables.
//!
//! A `.env` file is honored when present (loaded by the binaries through
//! `dotenvy` before these are read).

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use jobrelay_infra::WorkerPoolConfig;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_STREAM_KEY: &str = "jobrelay:jobs";
const DEFAULT_GROUP: &str = "jobrelay.workers";
const DEFAULT_RESULT_TTL_SECS: u64 = 86_400;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{var} has invalid value {value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Where job records and messages live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Redis-backed store and channel instead of in-process ones.
    pub persistent: bool,
    pub redis_url: String,
    pub stream_key: String,
    pub group: String,
    /// Record retention in the persistent store (`None` = keep forever).
    pub result_ttl: Option<Duration>,
}

/// `jobrelay-api` configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub backend: BackendConfig,
    /// Workers hosted inside the API process (in-memory backend only).
    /// `None` when `WORKER_CONCURRENCY=0`.
    pub workers: Option<WorkerPoolConfig>,
}

/// `jobrelay-worker` configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub backend: BackendConfig,
    pub pool: WorkerPoolConfig,
}

impl ApiConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                  |
    /// |-------------------------|--------------------------|
    /// | `BIND_ADDR`             | `0.0.0.0:8080`           |
    /// | `USE_PERSISTENT_STORES` | `false`                  |
    /// | `REDIS_URL`             | `redis://localhost:6379` |
    /// | `JOBRELAY_STREAM`       | `jobrelay:jobs`          |
    /// | `JOBRELAY_GROUP`        | `jobrelay.workers`       |
    /// | `RESULT_TTL_SECS`       | `86400` (`0` = forever)  |
    /// | `WORKER_*`, `COMPUTE_TIMEOUT_MS`, ... | see [`WorkerConfig::from_env`] |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`ApiConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|e: std::net::AddrParseError| ConfigError {
            var: "BIND_ADDR",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let concurrency: usize = parse_or(&lookup, "WORKER_CONCURRENCY", 4)?;
        let workers = if concurrency == 0 {
            None
        } else {
            Some(pool_config(&lookup, concurrency)?)
        };

        Ok(Self {
            bind_addr,
            backend: BackendConfig::from_lookup(&lookup)?,
            workers,
        })
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                    |
    /// |----------------------|----------------------------|
    /// | `WORKER_NAME`        | `jobrelay-worker`          |
    /// | `WORKER_CONCURRENCY` | `4`                        |
    /// | `COMPUTE_TIMEOUT_MS` | `300000` (`0` = unbounded) |
    /// | `STALE_AFTER_SECS`   | `600`                      |
    /// | `MAX_ATTEMPTS`       | `5`                        |
    ///
    /// plus the backend variables listed on [`ApiConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let concurrency: usize = parse_or(&lookup, "WORKER_CONCURRENCY", 4)?;
        Ok(Self {
            backend: BackendConfig::from_lookup(&lookup)?,
            pool: pool_config(&lookup, concurrency)?,
        })
    }
}

impl BackendConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let ttl_secs: u64 = parse_or(lookup, "RESULT_TTL_SECS", DEFAULT_RESULT_TTL_SECS)?;

        Ok(Self {
            persistent: parse_or(lookup, "USE_PERSISTENT_STORES", false)?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            stream_key: lookup("JOBRELAY_STREAM").unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            group: lookup("JOBRELAY_GROUP").unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            result_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        })
    }
}

fn pool_config(
    lookup: &impl Fn(&str) -> Option<String>,
    concurrency: usize,
) -> Result<WorkerPoolConfig, ConfigError> {
    let defaults = WorkerPoolConfig::default();

    let timeout_default = defaults.compute_timeout.map_or(0, |t| t.as_millis() as u64);
    let timeout_ms: u64 = parse_or(lookup, "COMPUTE_TIMEOUT_MS", timeout_default)?;
    let stale_secs: u64 = parse_or(lookup, "STALE_AFTER_SECS", defaults.stale_after.as_secs())?;
    let max_attempts: u32 = parse_or(lookup, "MAX_ATTEMPTS", defaults.max_attempts)?;
    let name = lookup("WORKER_NAME").unwrap_or_else(|| defaults.name.clone());

    Ok(defaults
        .with_name(name)
        .with_concurrency(concurrency)
        .with_compute_timeout((timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)))
        .with_stale_after(Duration::from_secs(stale_secs))
        .with_max_attempts(max_attempts))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
