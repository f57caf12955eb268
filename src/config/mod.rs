//! Environment-driven configuration.
//!
//! Each service loads its options from environment variables with typed
//! defaults, then validates the result before anything connects.
//!
//! # Environment variables
//!
//! Shared:
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `DATABASE_URL`: PostgreSQL connection URL (required)
//! - `RESULT_DIR`: destination for result artifacts (default: ./results)
//!
//! Worker:
//! - `WORKER_ID`: stable identity; auto-generated when empty
//! - `CONCURRENT_JOBS`: in-flight bound (default: 5)
//! - `HEARTBEAT_INTERVAL_SECS`: seconds between heartbeats (default: 30)
//! - `POLL_INTERVAL_SECS`: claim block and empty/error backoff (default: 5)
//!
//! Controller:
//! - `RECONCILE_INTERVAL_SECS`: scaling tick period (default: 30)
//! - `METRICS_COLLECTION_INTERVAL_SECS`: gauge probe period (default: 15)
//! - `SCALE_MIN_REPLICAS`, `SCALE_MAX_REPLICAS`, `SCALE_UP_THRESHOLD`,
//!   `SCALE_DOWN_THRESHOLD`, `SCALE_JOBS_PER_WORKER`, `SCALE_STEP_UP`,
//!   `SCALE_STEP_DOWN`: policy knobs (defaults: 1, 10, 20, 5, 10, 2, 1)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::scaler::ScalingPolicy;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_duration_secs(key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(key, default_secs)?))
}

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL.
    pub url: String,
}

impl RedisConfig {
    /// Loads from `REDIS_URL`.
    pub fn from_env() -> Self {
        Self {
            url: env_or("REDIS_URL", "redis://localhost:6379"),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,
}

impl DatabaseConfig {
    /// Loads from `DATABASE_URL` (required).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("DATABASE_URL")?,
        })
    }
}

/// Worker runtime options.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stable worker identity; auto-generated at construction when empty.
    pub worker_id: String,
    /// Size of the in-flight semaphore.
    pub concurrent_jobs: usize,
    /// Interval between heartbeat posts.
    pub heartbeat_interval: Duration,
    /// Maximum block on a claim and the backoff on empty/error.
    pub poll_interval: Duration,
    /// Destination for result artifacts.
    pub result_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: String::new(),
            concurrent_jobs: 5,
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            result_dir: PathBuf::from("./results"),
        }
    }
}

impl WorkerConfig {
    /// Loads from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            worker_id: env_or("WORKER_ID", ""),
            concurrent_jobs: env_parse("CONCURRENT_JOBS", 5)?,
            heartbeat_interval: env_duration_secs("HEARTBEAT_INTERVAL_SECS", 30)?,
            poll_interval: env_duration_secs("POLL_INTERVAL_SECS", 5)?,
            result_dir: PathBuf::from(env_or("RESULT_DIR", "./results")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the worker identity.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Sets the in-flight bound.
    pub fn with_concurrent_jobs(mut self, concurrent_jobs: usize) -> Self {
        self.concurrent_jobs = concurrent_jobs;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the result directory.
    pub fn with_result_dir(mut self, result_dir: impl Into<PathBuf>) -> Self {
        self.result_dir = result_dir.into();
        self
    }

    /// Checks option consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrent_jobs == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrent jobs must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Autoscaler controller options.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Scaling tick period.
    pub reconcile_interval: Duration,
    /// Independent tick for the queue-depth gauges.
    pub metrics_collection_interval: Duration,
    /// Replica policy.
    pub policy: ScalingPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            metrics_collection_interval: Duration::from_secs(15),
            policy: ScalingPolicy::default(),
        }
    }
}

impl ControllerConfig {
    /// Loads from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ScalingPolicy::default();
        let policy = ScalingPolicy {
            min_replicas: env_parse("SCALE_MIN_REPLICAS", defaults.min_replicas)?,
            max_replicas: env_parse("SCALE_MAX_REPLICAS", defaults.max_replicas)?,
            scale_up_threshold: env_parse("SCALE_UP_THRESHOLD", defaults.scale_up_threshold)?,
            scale_down_threshold: env_parse(
                "SCALE_DOWN_THRESHOLD",
                defaults.scale_down_threshold,
            )?,
            jobs_per_worker: env_parse("SCALE_JOBS_PER_WORKER", defaults.jobs_per_worker)?,
            step_up: env_parse("SCALE_STEP_UP", defaults.step_up)?,
            step_down: env_parse("SCALE_STEP_DOWN", defaults.step_down)?,
        };

        let config = Self {
            reconcile_interval: env_duration_secs("RECONCILE_INTERVAL_SECS", 30)?,
            metrics_collection_interval: env_duration_secs(
                "METRICS_COLLECTION_INTERVAL_SECS",
                15,
            )?,
            policy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks option consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "reconcile interval must be positive".to_string(),
            ));
        }
        if self.metrics_collection_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "metrics collection interval must be positive".to_string(),
            ));
        }
        self.policy.validate().map_err(ConfigError::ValidationFailed)
    }
}
