use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSettings {
    /// Maximum change events accumulated before a batch is committed.
    #[serde(default = "default_batch_max_events")]
    pub max_events: usize,
    /// Maximum time a non-empty batch may wait before it is committed.
    #[serde(default = "default_batch_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Rows copied per snapshot batch.
    #[serde(default = "default_snapshot_batch_rows")]
    pub snapshot_rows: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerSettings {
    /// Interval between change-event polls when the source is idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Connection retries before a connector escalates to the error state.
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    /// Base backoff between connection retries; doubles per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Consecutive unchanged stats polls before a session counts as settled.
    #[serde(default = "default_settle_polls")]
    pub settle_polls: u32,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("CDC_SYNC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn batch_max_delay(&self) -> Duration {
        Duration::from_millis(self.batch.max_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.worker.retry_backoff_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metadata_dir: default_metadata_dir(),
            batch: BatchSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_events: default_batch_max_events(),
            max_delay_ms: default_batch_max_delay_ms(),
            snapshot_rows: default_snapshot_batch_rows(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry_max: default_retry_max(),
            retry_backoff_ms: default_retry_backoff_ms(),
            settle_polls: default_settle_polls(),
        }
    }
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from("cdc_sync_meta")
}

fn default_batch_max_events() -> usize {
    500
}

fn default_batch_max_delay_ms() -> u64 {
    100
}

fn default_snapshot_batch_rows() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_retry_max() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_settle_polls() -> u32 {
    5
}
