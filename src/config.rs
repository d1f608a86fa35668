use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::chunk::ChunkLimits;
use crate::constants::{DEFAULT_TARGET_VERB, INVALID_WINDOW_CHARS};
use crate::encoding::resolve_labels;
use crate::extract::ExtractOptions;
use crate::pipeline::{ImportOptions, RetryPolicy};
use crate::pool::PoolOptions;
use crate::sanitize::{DEFAULT_CONTROL_KEYWORDS, StatementSanitizer};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub run_id: String,
    pub max_workers: usize,
    pub pool_size: usize,
    pub queue_capacity_per_worker: usize,
    pub max_statements_per_chunk: usize,
    pub max_bytes_per_chunk: u64,
    pub retry_count: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub encoding_confidence_threshold: f32,
    pub fallback_encodings: Vec<String>,
    pub encoding_sample_bytes: u64,
    pub max_invalid_ratio: f64,
    pub probation_window_bytes: u64,
    pub acquire_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    pub max_connection_uses: u64,
    pub health_check_interval_ms: u64,
    pub sqlite_busy_timeout_ms: u64,
    pub progress_every_statements: u64,
    pub progress_channel_capacity: usize,
    pub max_error_messages: usize,
    pub target_verb: String,
    pub control_keywords: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            max_workers: 0,
            pool_size: 0,
            queue_capacity_per_worker: 2,
            max_statements_per_chunk: 1000,
            max_bytes_per_chunk: 30 * 1024 * 1024,
            retry_count: 3,
            retry_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            encoding_confidence_threshold: 0.7,
            fallback_encodings: [
                "utf-8",
                "gb18030",
                "gbk",
                "big5",
                "shift_jis",
                "euc-kr",
                "windows-1252",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            encoding_sample_bytes: 100 * 1024,
            max_invalid_ratio: 0.05,
            probation_window_bytes: 4 * 1024 * 1024,
            acquire_timeout_ms: 30_000,
            execute_timeout_ms: 300_000,
            max_connection_uses: 0,
            health_check_interval_ms: 0,
            sqlite_busy_timeout_ms: 5000,
            progress_every_statements: 10_000,
            progress_channel_capacity: 1024,
            max_error_messages: 20,
            target_verb: DEFAULT_TARGET_VERB.to_string(),
            control_keywords: DEFAULT_CONTROL_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_statements_per_chunk == 0 || self.max_bytes_per_chunk == 0 {
            bail!("chunk bounds must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.encoding_confidence_threshold) {
            bail!(
                "encoding_confidence_threshold {} is outside [0, 1]",
                self.encoding_confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.max_invalid_ratio) {
            bail!("max_invalid_ratio {} is outside [0, 1]", self.max_invalid_ratio);
        }
        if self.fallback_encodings.is_empty() {
            bail!("fallback_encodings must name at least one encoding");
        }
        resolve_labels(&self.fallback_encodings).context("invalid fallback_encodings")?;
        if self.target_verb.trim().is_empty() {
            bail!("target_verb must not be empty");
        }
        if self.acquire_timeout_ms == 0 || self.execute_timeout_ms == 0 {
            bail!("timeouts must be greater than zero");
        }
        Ok(())
    }

    pub fn import_options(&self) -> Result<ImportOptions> {
        let candidates =
            resolve_labels(&self.fallback_encodings).context("invalid fallback_encodings")?;
        Ok(ImportOptions {
            max_workers: self.worker_count(),
            queue_capacity_per_worker: self.queue_capacity_per_worker.max(1),
            pool: PoolOptions {
                size: self.pool_size(),
                acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
                max_uses: self.max_connection_uses,
                health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            },
            chunk_limits: ChunkLimits::new(
                self.max_statements_per_chunk,
                usize::try_from(self.max_bytes_per_chunk).unwrap_or(usize::MAX),
            ),
            retry: RetryPolicy {
                retry_count: self.retry_count,
                backoff: Duration::from_millis(self.retry_backoff_ms),
                max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.retry_backoff_ms)),
            },
            execute_timeout: Duration::from_millis(self.execute_timeout_ms),
            extract: ExtractOptions {
                confidence_threshold: self.encoding_confidence_threshold,
                max_invalid_ratio: self.max_invalid_ratio,
                probation_window_bytes: self.probation_window_bytes,
                window_chars: INVALID_WINDOW_CHARS,
                progress_every: self.progress_every_statements.max(1),
            },
            encoding_sample_bytes: self.encoding_sample_bytes,
            candidates,
            max_error_messages: self.max_error_messages,
            sanitizer: StatementSanitizer::new(&self.control_keywords, &self.target_verb),
        })
    }

    /// Worker threads to run; `0` in the file means one per CPU.
    pub fn worker_count(&self) -> usize {
        if self.max_workers == 0 {
            num_cpus::get()
        } else {
            self.max_workers
        }
    }

    pub fn pool_size(&self) -> usize {
        if self.pool_size == 0 {
            self.worker_count()
        } else {
            self.pool_size
        }
    }

    pub fn sqlite_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.sqlite_busy_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p).with_context(|| format!("reading config {}", p.display()))?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes).context("parsing config YAML")?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{:08x}", now.format("%Y%m%dT%H%M%SZ"), now.timestamp_subsec_nanos())
}
