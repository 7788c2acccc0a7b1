//! Executor configuration

use super::ExecutorError;

/// Default number of persisted events between checkpoints
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 10;

/// Default number of checkpoints kept per workflow
pub const DEFAULT_CHECKPOINT_RETENTION: usize = crate::persistence::DEFAULT_KEEP_CHECKPOINTS;

/// Configuration for the durable executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Checkpoint after every `checkpoint_interval` events of an execution
    pub checkpoint_interval: u64,

    /// Checkpoints kept per workflow after pruning
    pub checkpoint_retention: usize,

    /// Live events buffered for a slow subscriber before the execution waits
    pub event_buffer: usize,

    /// Maximum events per workflow (for safety)
    pub max_events_per_workflow: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            checkpoint_retention: DEFAULT_CHECKPOINT_RETENTION,
            event_buffer: 64,
            max_events_per_workflow: 10_000,
        }
    }
}

impl ExecutorConfig {
    /// Create configuration from environment variables
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            checkpoint_interval: env_or("DURABLE_CHECKPOINT_INTERVAL", defaults.checkpoint_interval),
            checkpoint_retention: env_or(
                "DURABLE_CHECKPOINT_RETENTION",
                defaults.checkpoint_retention,
            ),
            event_buffer: env_or("DURABLE_EVENT_BUFFER", defaults.event_buffer),
            max_events_per_workflow: env_or(
                "DURABLE_MAX_EVENTS_PER_WORKFLOW",
                defaults.max_events_per_workflow,
            ),
        }
    }

    /// Set the checkpoint interval
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Set how many checkpoints are kept
    pub fn with_checkpoint_retention(mut self, keep: usize) -> Self {
        self.checkpoint_retention = keep;
        self
    }

    /// Set the live event buffer size
    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    /// Set the per-workflow event cap
    pub fn with_max_events_per_workflow(mut self, max: u64) -> Self {
        self.max_events_per_workflow = max;
        self
    }

    /// Reject values the executor cannot run with
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.checkpoint_interval == 0 {
            return Err(ExecutorError::InvalidConfig(
                "checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_retention == 0 {
            return Err(ExecutorError::InvalidConfig(
                "checkpoint_retention must be at least 1".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ExecutorError::InvalidConfig(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if self.max_events_per_workflow == 0 {
            return Err(ExecutorError::InvalidConfig(
                "max_events_per_workflow must be at least 1".to_string(),
            ));
        }
        if i64::try_from(self.max_events_per_workflow).is_err() {
            return Err(ExecutorError::InvalidConfig(format!(
                "max_events_per_workflow must not exceed {}",
                i64::MAX
            )));
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
