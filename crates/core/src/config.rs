use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Lowest queue priority accepted by the scheduler.
pub const MIN_QUEUE_PRIORITY: u8 = 1;
/// Highest queue priority accepted by the scheduler.
pub const MAX_QUEUE_PRIORITY: u8 = 10;
/// Priority used when a producer has no preference.
pub const DEFAULT_QUEUE_PRIORITY: u8 = 5;
/// Tasks a worker pulls per fill.
pub const DEFAULT_WORKER_BATCH_SIZE: usize = 4;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_opt(key) {
        Some(raw) => raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(None),
    }
}

// ── Statistics strategy ──────────────────────────────────────────────

/// Concurrency strategy for task lifecycle counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatisticsKind {
    /// One lock per status.
    Simple,
    /// One lock per (status, classification) counter.
    FineGrained,
    /// Atomic counters only.
    #[default]
    LockFree,
}

impl fmt::Display for StatisticsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatisticsKind::Simple => "simple",
            StatisticsKind::FineGrained => "fine-grained",
            StatisticsKind::LockFree => "lock-free",
        };
        f.write_str(name)
    }
}

impl FromStr for StatisticsKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "simple" => Ok(StatisticsKind::Simple),
            "fine-grained" => Ok(StatisticsKind::FineGrained),
            "lock-free" => Ok(StatisticsKind::LockFree),
            other => Err(ConfigError::InvalidValue {
                key: "statistics".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

// ── SchedulerConfig ──────────────────────────────────────────────────

/// Tunables of a `TaskScheduler`, from TOML or `TASKMAN_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Tasks a worker moves into its local batch per fill.
    #[serde(default = "default_worker_batch_size")]
    pub worker_batch_size: usize,
    /// Priority suggested to producers that create queues without one.
    #[serde(default = "default_queue_priority")]
    pub default_queue_priority: u8,
    /// Which counter implementation backs the scheduler's statistics.
    #[serde(default)]
    pub statistics: StatisticsKind,
    /// Seed for the queue-selection RNG. `None` seeds from entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_worker_threads() -> usize {
    0
}

fn default_worker_batch_size() -> usize {
    DEFAULT_WORKER_BATCH_SIZE
}

fn default_queue_priority() -> u8 {
    DEFAULT_QUEUE_PRIORITY
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            worker_batch_size: default_worker_batch_size(),
            default_queue_priority: default_queue_priority(),
            statistics: StatisticsKind::default(),
            rng_seed: None,
        }
    }
}

impl SchedulerConfig {
    /// Config with a fixed worker count and defaults elsewhere.
    pub fn with_workers(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    /// Parse config from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Build config from `TASKMAN_*` environment variables (call
    /// [`load_dotenv`] first). Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_parse("TASKMAN_WORKER_THREADS")? {
            config.worker_threads = v;
        }
        if let Some(v) = env_parse("TASKMAN_WORKER_BATCH_SIZE")? {
            config.worker_batch_size = v;
        }
        if let Some(v) = env_parse("TASKMAN_DEFAULT_QUEUE_PRIORITY")? {
            config.default_queue_priority = v;
        }
        if let Some(v) = env_parse("TASKMAN_STATISTICS")? {
            config.statistics = v;
        }
        if let Some(v) = env_parse("TASKMAN_RNG_SEED")? {
            config.rng_seed = Some(v);
        }
        config.validate()?;
        debug!(?config, "loaded scheduler config from environment");
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_batch_size == 0 {
            return Err(ConfigError::Invalid("worker_batch_size must be at least 1".into()));
        }
        if !(MIN_QUEUE_PRIORITY..=MAX_QUEUE_PRIORITY).contains(&self.default_queue_priority) {
            return Err(ConfigError::Invalid(format!(
                "default_queue_priority must be in {MIN_QUEUE_PRIORITY}..={MAX_QUEUE_PRIORITY}, got {}",
                self.default_queue_priority
            )));
        }
        Ok(())
    }

    /// Worker pool size to spawn; `0` falls back to the host's available parallelism.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}
