use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Period of the request drain tick
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Requests handled per drain round
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Drain rounds per tick while rounds keep coming back full
    #[serde(default = "default_max_drain_rounds")]
    pub max_drain_rounds: usize,

    /// Period of the load-tree rebuild
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Upper bound on endpoints per response, 0 for no bound
    #[serde(default)]
    pub max_endpoints: usize,

    /// Requests waiting for the loop beyond this are answered with `QueueFull`
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: default_dispatch_interval_ms(),
            batch_size: default_batch_size(),
            max_drain_rounds: default_max_drain_rounds(),
            refresh_interval_ms: default_refresh_interval_ms(),
            max_endpoints: 0,
            max_queue_len: default_max_queue_len(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dispatch_interval_ms == 0 {
            return Err(Error::InvalidConfig("scheduler.dispatch_interval_ms must be greater than 0".into()));
        }
        if self.refresh_interval_ms == 0 {
            return Err(Error::InvalidConfig("scheduler.refresh_interval_ms must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("scheduler.batch_size must be greater than 0".into()));
        }
        if self.max_drain_rounds == 0 {
            return Err(Error::InvalidConfig("scheduler.max_drain_rounds must be greater than 0".into()));
        }
        if self.max_queue_len == 0 {
            return Err(Error::InvalidConfig("scheduler.max_queue_len must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

fn default_dispatch_interval_ms() -> u64 {
    200
}
fn default_batch_size() -> usize {
    100
}
fn default_max_drain_rounds() -> usize {
    10
}
fn default_refresh_interval_ms() -> u64 {
    60_000
}
fn default_max_queue_len() -> usize {
    10_000
}
