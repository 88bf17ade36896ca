use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Period of the discovery node load rewrite
    #[serde(default = "default_load_report_interval_ms")]
    pub load_report_interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            load_report_interval_ms: default_load_report_interval_ms(),
        }
    }
}

impl MonitoringConfig {
    /// Validates monitoring configuration
    /// # Errors
    /// Returns `Error::InvalidConfig` when:
    /// - log_dir is empty
    /// - load_report_interval_ms is 0
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("monitoring.log_dir cannot be empty".into()));
        }
        if self.load_report_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "monitoring.load_report_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn load_report_interval(&self) -> Duration {
        Duration::from_millis(self.load_report_interval_ms)
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_load_report_interval_ms() -> u64 {
    10_000
}
