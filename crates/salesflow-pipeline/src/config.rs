//! Pipeline configuration.
//!
//! ## Configuration
//!
//! | Key                  | Description                                        | Default        |
//! |----------------------|----------------------------------------------------|----------------|
//! | `batch.size`         | Distinct keys per sink batch                       | `1000`         |
//! | `batch.interval.ms`  | Max age of a non-empty sink batch                  | `200`          |
//! | `max.retries`        | Retries of a failed sink batch                     | `5`            |
//! | `retry.backoff.ms`   | First retry delay, doubled on every attempt        | `100`          |
//! | `commit.interval.ms` | Time between checkpoints (flush, then commit)      | `1000`         |
//! | `channel.capacity`   | Batches queued per sink branch                     | `64`           |
//! | `replay.window`      | `(transaction, key)` pairs remembered per roll-up  | `100000`       |
//! | `retention.days`     | Days of keys kept behind the newest event day      | `400`          |
//! | `max.future.skew.hours` | Event times accepted ahead of the local clock   | `24`           |
//! | `search.index`       | Search index holding the transaction documents     | `transactions` |
//!
//! `replay.window = 0` turns replay deduplication off; `retention.days = 0`
//! keeps every key for the lifetime of the process. `max.future.skew.hours = 0`
//! accepts any event time, which leaves the retention horizon at the mercy of
//! a single mis-dated event.

use std::collections::HashMap;
use std::time::Duration;

use salesflow_connectors::config::parse_opt;
use salesflow_connectors::sinks::elasticsearch::DEFAULT_INDEX;
use salesflow_connectors::{RetryPolicy, SinkBatchConfig};
use chrono::TimeDelta;
use salesflow_core::{RetentionPolicy, Validator, DEFAULT_MAX_FUTURE_SKEW_HOURS};

use crate::error::{PipelineError, Result};

pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_COMMIT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_REPLAY_WINDOW: usize = 100_000;
pub const DEFAULT_RETENTION_DAYS: u64 = 400;

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Batching and retry settings shared by every sink branch.
    pub sink: SinkBatchConfig,
    pub retry_backoff: Duration,
    pub commit_interval: Duration,
    pub channel_capacity: usize,
    pub replay_window: usize,
    pub retention: RetentionPolicy,
    /// How far ahead of the local clock a `transaction_date` may be.
    /// `None` disables the check.
    pub max_future_skew: Option<Duration>,
    pub search_index: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sink: SinkBatchConfig::default(),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            commit_interval: Duration::from_millis(DEFAULT_COMMIT_INTERVAL_MS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            replay_window: DEFAULT_REPLAY_WINDOW,
            retention: RetentionPolicy::days(DEFAULT_RETENTION_DAYS),
            max_future_skew: Some(hours(DEFAULT_MAX_FUTURE_SKEW_HOURS as u64)),
            search_index: DEFAULT_INDEX.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Parse from a string key-value map, falling back to defaults.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let mut parsed = Self {
            sink: SinkBatchConfig::from_config_map(config)?,
            ..Self::default()
        };

        if let Some(ms) = parse_opt::<u64>(config, "retry.backoff.ms")? {
            parsed.retry_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_opt::<u64>(config, "commit.interval.ms")? {
            parsed.commit_interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_opt::<usize>(config, "channel.capacity")? {
            parsed.channel_capacity = capacity;
        }
        if let Some(window) = parse_opt::<usize>(config, "replay.window")? {
            parsed.replay_window = window;
        }
        if let Some(days) = parse_opt::<u64>(config, "retention.days")? {
            parsed.retention = retention_from_days(days);
        }
        if let Some(h) = parse_opt::<u64>(config, "max.future.skew.hours")? {
            parsed.max_future_skew = (h > 0).then(|| hours(h));
        }
        if let Some(index) = config.get("search.index") {
            parsed.search_index = index.trim().to_string();
        }

        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sink.batch_size == 0 {
            return Err(PipelineError::Config(
                "batch.size must be greater than zero".to_string(),
            ));
        }
        if self.commit_interval.is_zero() {
            return Err(PipelineError::Config(
                "commit.interval.ms must be greater than zero".to_string(),
            ));
        }
        if self.sink.batch_interval.is_zero() {
            return Err(PipelineError::Config(
                "batch.interval.ms must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(PipelineError::Config(
                "channel.capacity must be greater than zero".to_string(),
            ));
        }
        if self.search_index.is_empty() {
            return Err(PipelineError::Config(
                "search.index must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Validator applying the configured future-skew bound.
    pub fn validator(&self) -> Validator {
        let skew = self
            .max_future_skew
            .map(|d| TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX));
        Validator::new().with_max_future_skew(skew)
    }

    /// Retry policy for every sink branch.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.sink.max_retries,
            self.retry_backoff,
            MAX_RETRY_BACKOFF.max(self.retry_backoff),
            2.0,
        )
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

/// `0` keeps keys forever.
pub fn retention_from_days(days: u64) -> RetentionPolicy {
    if days == 0 {
        RetentionPolicy::unbounded()
    } else {
        RetentionPolicy::days(days)
    }
}
