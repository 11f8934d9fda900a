//! Configuration module
//!
//! Env-driven configuration for the worker process and the reconciler CLI.
//! Call [`Config::from_env`] after loading `.env` (the CLI does this via
//! `dotenvy`); every component receives its config by value, no ambient
//! globals.

use std::env;

use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, MAX_RETRY_BACKOFF_SECS};

const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_BATCH_SIZE: i64 = 10;
/// Lock lease: a `processing` lock older than this is considered abandoned.
const DEFAULT_LEASE_SECS: u64 = 300;
const DEFAULT_STALE_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// "s3" or "memory".
    pub backend: String,
    /// Bucket holding uploaded source objects.
    pub source_bucket: String,
    /// Bucket receiving streaming derivatives (may equal `source_bucket`).
    pub streaming_bucket: String,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    pub lease_secs: u64,
    pub stale_sweep_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub max_attempts: i32,
    /// External transcoder command; when unset the transcode worker cannot run.
    pub transcoder_cmd: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            lease_secs: DEFAULT_LEASE_SECS,
            stale_sweep_interval_secs: DEFAULT_STALE_SWEEP_INTERVAL_SECS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            transcoder_cmd: None,
        }
    }
}

impl WorkerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay_secs: 1,
            max_delay_secs: MAX_RETRY_BACKOFF_SECS,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Every bucket name the platform has ever written to; used to recognize
    /// bucket-mismatch drift in recorded keys.
    pub known_buckets: Vec<String>,
    /// Path prefixes added by storage proxies that sometimes leak into
    /// recorded keys.
    pub proxy_prefixes: Vec<String>,
    pub apply_batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            known_buckets: Vec::new(),
            proxy_prefixes: vec![
                "storage/v1/object/public/".to_string(),
                "storage/v1/object/sign/".to_string(),
                "object/public/".to_string(),
            ],
            apply_batch_size: 100,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub reconciler: ReconcilerConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig {
            url: require_env("DATABASE_URL")?,
            max_connections: parse_env("DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            connect_timeout_secs: parse_env("DB_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };

        let source_bucket =
            env::var("STORAGE_SOURCE_BUCKET").unwrap_or_else(|_| "course-media".to_string());
        let storage = StorageConfig {
            backend: env::var("STORAGE_BACKEND").unwrap_or_else(|_| "s3".to_string()),
            streaming_bucket: env::var("STORAGE_STREAMING_BUCKET")
                .unwrap_or_else(|_| source_bucket.clone()),
            source_bucket,
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
        };

        let worker = WorkerConfig {
            poll_interval_ms: parse_env("WORKER_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            batch_size: parse_env("WORKER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            lease_secs: parse_env("WORKER_LEASE_SECS", DEFAULT_LEASE_SECS)?,
            stale_sweep_interval_secs: parse_env(
                "WORKER_STALE_SWEEP_INTERVAL_SECS",
                DEFAULT_STALE_SWEEP_INTERVAL_SECS,
            )?,
            shutdown_timeout_secs: parse_env(
                "WORKER_SHUTDOWN_TIMEOUT_SECS",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            )?,
            max_attempts: parse_env("WORKER_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            transcoder_cmd: env::var("TRANSCODER_CMD").ok(),
        };

        let mut reconciler = ReconcilerConfig {
            apply_batch_size: parse_env("RECONCILE_APPLY_BATCH_SIZE", 100usize)?,
            ..Default::default()
        };
        reconciler.known_buckets = match env::var("RECONCILE_KNOWN_BUCKETS") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => vec![storage.source_bucket.clone(), storage.streaming_bucket.clone()],
        };

        let config = Self {
            database,
            storage,
            worker,
            reconciler,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.worker.batch_size <= 0 {
            anyhow::bail!("WORKER_BATCH_SIZE must be positive");
        }
        if self.worker.max_attempts <= 0 {
            anyhow::bail!("WORKER_MAX_ATTEMPTS must be positive");
        }
        if self.storage.backend != "s3" && self.storage.backend != "memory" {
            anyhow::bail!(
                "STORAGE_BACKEND must be 's3' or 'memory', got '{}'",
                self.storage.backend
            );
        }
        if self.reconciler.apply_batch_size == 0 {
            anyhow::bail!("RECONCILE_APPLY_BATCH_SIZE must be positive");
        }
        Ok(())
    }
}

fn require_env(name: &str) -> anyhow::Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("{} must be set", name))
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} is not a valid value for {}", raw, name)),
        Err(_) => Ok(default),
    }
}
