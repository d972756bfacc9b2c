use std::env;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use nonzero_ext::nonzero;
use thiserror::Error;

use crate::cli::Cli;
use crate::status_service::{RetryPolicy, StatusServiceConfig, StopStrategy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

pub struct Config {
    /// Transformation service base URL. Required.
    pub transform_api_url: String,
    /// Index service base URL. Required.
    pub index_api_url: String,
    /// Base URL other services use to read artifacts back.
    pub public_base_url: String,
    pub listen_addr: SocketAddr,
    /// Filesystem store root; in-memory store when unset.
    pub storage_dir: Option<PathBuf>,
    /// Default: 64
    pub pool_size: usize,
    /// Default: 10000
    pub queue_capacity: usize,
    pub retry_policy: RetryPolicy,
    /// Poll requests per second across all workers. Default: 50
    pub poll_rate_per_second: NonZeroU32,
    pub http_timeout: Duration,
    pub max_upload_bytes: usize,
    pub dead_letter_capacity: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let transform_api_url = required("TRANSFORM_API_URL")?;
        let index_api_url = required("INDEX_API_URL")?;
        let public_base_url =
            lookup("PUBLIC_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
        let listen_addr = parse_or(&lookup, "LISTEN_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let storage_dir = lookup("STORAGE_DIR")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let pool_size = positive(&lookup, "POOL_SIZE", 64)?;
        let queue_capacity = positive(&lookup, "QUEUE_CAPACITY", 10_000)?;
        let wait_interval =
            Duration::from_millis(parse_or(&lookup, "POLL_WAIT_INTERVAL_MS", 5_000u64)?);

        let strategy = lookup("POLL_STOP_STRATEGY").unwrap_or_else(|| "attempts".to_string());
        let stop = match strategy.trim().to_ascii_lowercase().as_str() {
            "attempts" => StopStrategy::MaxAttempts(positive(&lookup, "POLL_MAX_ATTEMPTS", 12u32)?),
            "elapsed" => StopStrategy::MaxElapsed(Duration::from_secs(positive(
                &lookup,
                "POLL_MAX_ELAPSED_SECS",
                20u64,
            )?)),
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: "POLL_STOP_STRATEGY".to_string(),
                    value: strategy,
                    reason: "expected `attempts` or `elapsed`".to_string(),
                })
            }
        };

        let default_rate = nonzero!(50u32);
        let poll_rate = positive(&lookup, "POLL_RATE_PER_SECOND", default_rate.get())?;
        let poll_rate_per_second = NonZeroU32::new(poll_rate).unwrap_or(default_rate);
        let http_timeout = Duration::from_secs(positive(&lookup, "HTTP_TIMEOUT_SECS", 30u64)?);
        let max_upload_bytes = positive(&lookup, "MAX_UPLOAD_BYTES", 512 * 1024 * 1024usize)?;
        let dead_letter_capacity = positive(&lookup, "DEAD_LETTER_CAPACITY", 1_000usize)?;

        Ok(Self {
            transform_api_url,
            index_api_url,
            public_base_url,
            listen_addr,
            storage_dir,
            pool_size,
            queue_capacity,
            retry_policy: RetryPolicy {
                wait_interval,
                stop,
            },
            poll_rate_per_second,
            http_timeout,
            max_upload_bytes,
            dead_letter_capacity,
        })
    }

    /// Command-line flags win over the environment.
    pub fn with_cli_overrides(mut self, cli: &Cli) -> Self {
        if let Some(addr) = cli.listen_addr {
            self.listen_addr = addr;
        }
        if let Some(dir) = &cli.storage_dir {
            self.storage_dir = Some(dir.clone());
        }
        if let Some(pool_size) = cli.pool_size {
            self.pool_size = pool_size.max(1);
        }
        self
    }

    pub fn status_service_config(&self) -> StatusServiceConfig {
        StatusServiceConfig {
            pool_size: self.pool_size,
            queue_capacity: self.queue_capacity,
            retry_policy: self.retry_policy,
            dead_letter_capacity: self.dead_letter_capacity,
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.clone(),
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = parse_or(lookup, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
