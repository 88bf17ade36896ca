use serde::Deserialize;
use serde::Serialize;

use crate::constants::BALANCE_KEY;
use crate::constants::CHANNEL_BASE;
use crate::constants::DATAFLOW_KEY;
use crate::constants::DISCOVERY_BASE;
use crate::constants::IN_PROCESS_ENDPOINT;
use crate::constants::OPS_SERVICE_BASE;
use crate::constants::STREAM_TO_BASE;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Coordination ensemble address list. Empty means no store: the routing
    /// table is seeded once from `dataflow.local_file`. `in-process` selects
    /// the embedded ensemble.
    #[serde(default)]
    pub endpoints: String,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Threads delivering async completions and watch notifications
    #[serde(default = "default_completion_threads")]
    pub completion_threads: usize,

    /// Register the discovery node through the routing session instead of a
    /// dedicated one
    #[serde(default = "default_share_discovery_client")]
    pub share_discovery_client: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: String::new(),
            session_timeout_ms: default_session_timeout_ms(),
            completion_threads: default_completion_threads(),
            share_discovery_client: default_share_discovery_client(),
        }
    }
}

impl StoreConfig {
    pub fn is_enabled(&self) -> bool {
        !self.endpoints.trim().is_empty()
    }

    pub fn is_in_process(&self) -> bool {
        self.endpoints.trim() == IN_PROCESS_ENDPOINT
    }

    /// Fails when `endpoints` names an ensemble that only a networked
    /// [`CoordinationClient`](crate::store::CoordinationClient) could reach.
    pub fn require_in_process(&self) -> Result<()> {
        if self.is_enabled() && !self.is_in_process() {
            return Err(Error::InvalidConfig(format!(
                "store.endpoints {:?} needs a networked coordination client; use \"{}\" or leave it empty",
                self.endpoints, IN_PROCESS_ENDPOINT
            )));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_enabled() {
            if self.session_timeout_ms == 0 {
                return Err(Error::InvalidConfig("session_timeout_ms must be greater than 0".into()));
            }
            if self.completion_threads == 0 {
                return Err(Error::InvalidConfig("completion_threads must be at least 1".into()));
            }
        }
        Ok(())
    }
}

fn default_session_timeout_ms() -> u64 {
    10_000
}
fn default_completion_threads() -> usize {
    2
}
fn default_share_discovery_client() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_dataflow_key")]
    pub dataflow: String,
    #[serde(default = "default_channel_base")]
    pub channel_base: String,
    #[serde(default = "default_discovery_base")]
    pub discovery_base: String,
    #[serde(default = "default_balance_key")]
    pub balance: String,
    #[serde(default = "default_ops_service_base")]
    pub ops_service_base: String,
    #[serde(default = "default_stream_to_base")]
    pub stream_to_base: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dataflow: default_dataflow_key(),
            channel_base: default_channel_base(),
            discovery_base: default_discovery_base(),
            balance: default_balance_key(),
            ops_service_base: default_ops_service_base(),
            stream_to_base: default_stream_to_base(),
        }
    }
}

impl PathsConfig {
    /// Every path must be absolute and must not end with a slash
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("dataflow", &self.dataflow),
            ("channel_base", &self.channel_base),
            ("discovery_base", &self.discovery_base),
            ("balance", &self.balance),
            ("ops_service_base", &self.ops_service_base),
            ("stream_to_base", &self.stream_to_base),
        ] {
            crate::store::validate_key(path)
                .map_err(|e| Error::InvalidConfig(format!("paths.{}: {}", name, e)))?;
        }
        Ok(())
    }
}

fn default_dataflow_key() -> String {
    DATAFLOW_KEY.to_string()
}
fn default_channel_base() -> String {
    CHANNEL_BASE.to_string()
}
fn default_discovery_base() -> String {
    DISCOVERY_BASE.to_string()
}
fn default_balance_key() -> String {
    BALANCE_KEY.to_string()
}
fn default_ops_service_base() -> String {
    OPS_SERVICE_BASE.to_string()
}
fn default_stream_to_base() -> String {
    STREAM_TO_BASE.to_string()
}
