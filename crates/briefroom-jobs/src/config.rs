//! Run slice configuration.

use std::time::Duration;

use briefroom_core::defaults;

/// Limits applied to one `run` slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Wall-clock budget of a slice. Checked before each document.
    pub time_budget: Duration,
    /// Maximum documents started per slice. `None` means no limit.
    pub max_documents_per_run: Option<usize>,
    /// Delay between two polls of one operation.
    pub poll_interval: Duration,
    /// Polls of one operation within a single slice.
    pub poll_attempts_per_slice: u32,
    /// Polls of one operation across all slices before the document fails.
    pub max_poll_attempts: i32,
}

/// Upper bound on [`RunConfig::time_budget`].
pub fn max_time_budget() -> Duration {
    Duration::from_secs(defaults::MAX_RUN_TIME_BUDGET_SECS)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(defaults::RUN_TIME_BUDGET_SECS),
            max_documents_per_run: None,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            poll_attempts_per_slice: defaults::POLL_ATTEMPTS_PER_SLICE,
            max_poll_attempts: defaults::MAX_POLL_ATTEMPTS,
        }
    }
}

impl RunConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `INGEST_TIME_BUDGET_SECS` | `20` | Wall-clock budget per run |
    /// | `INGEST_BATCH_SIZE` | unset | Max documents started per run |
    /// | `INGEST_POLL_INTERVAL_MS` | `3000` | Delay between operation polls |
    /// | `INGEST_POLL_ATTEMPTS_PER_SLICE` | `10` | Polls per operation per run |
    /// | `INGEST_MAX_POLL_ATTEMPTS` | `60` | Polls per operation before failing it |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let time_budget = std::env::var("INGEST_TIME_BUDGET_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs).min(max_time_budget()))
            .unwrap_or(defaults.time_budget);

        let max_documents_per_run = std::env::var("INGEST_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0);

        let poll_interval = std::env::var("INGEST_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let poll_attempts_per_slice = std::env::var("INGEST_POLL_ATTEMPTS_PER_SLICE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.poll_attempts_per_slice)
            .max(1);

        let max_poll_attempts = std::env::var("INGEST_MAX_POLL_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults.max_poll_attempts)
            .max(1);

        Self {
            time_budget,
            max_documents_per_run,
            poll_interval,
            poll_attempts_per_slice,
            max_poll_attempts,
        }
    }

    /// Set the time budget in seconds, capped at
    /// [`defaults::MAX_RUN_TIME_BUDGET_SECS`].
    pub fn with_time_budget_secs(mut self, secs: u64) -> Self {
        self.time_budget = Duration::from_secs(secs.min(defaults::MAX_RUN_TIME_BUDGET_SECS));
        self
    }

    /// Set the time budget, capped like [`Self::with_time_budget_secs`].
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget.min(max_time_budget());
        self
    }

    /// Limit the documents started per slice. `0` removes the limit.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.max_documents_per_run = (batch_size > 0).then_some(batch_size);
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval = Duration::from_millis(ms);
        self
    }

    pub fn with_poll_attempts_per_slice(mut self, attempts: u32) -> Self {
        self.poll_attempts_per_slice = attempts.max(1);
        self
    }

    pub fn with_max_poll_attempts(mut self, attempts: i32) -> Self {
        self.max_poll_attempts = attempts.max(1);
        self
    }
}
