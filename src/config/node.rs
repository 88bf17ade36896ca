use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_LOCATION;
use crate::constants::DEFAULT_SERVICE_PORT;
use crate::Error;
use crate::Result;

/// Identity and endpoint registered under the discovery base
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NodeConfig {
    /// Skip discovery registration entirely
    #[serde(default = "default_register")]
    pub register: bool,
    #[serde(default = "default_service_ip")]
    pub service_ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_location")]
    pub zone_id: String,
    #[serde(default = "default_location")]
    pub city_id: String,
    #[serde(default = "default_location")]
    pub cluster_name: String,
    #[serde(default = "default_location")]
    pub cluster_id: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub service_id: String,
    /// Host address when `service_ip` is a NAT or VIP address
    #[serde(default)]
    pub node_ip: String,
    #[serde(default = "default_agent_count_max")]
    pub agent_count_max: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            register: default_register(),
            service_ip: default_service_ip(),
            port: default_port(),
            protocol: default_protocol(),
            ssl: false,
            zone_id: default_location(),
            city_id: default_location(),
            cluster_name: default_location(),
            cluster_id: default_location(),
            service_name: default_service_name(),
            service_id: String::new(),
            node_ip: String::new(),
            agent_count_max: default_agent_count_max(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.register {
            if self.service_ip.trim().is_empty() {
                return Err(Error::InvalidConfig("node.service_ip cannot be empty".into()));
            }
            if self.port == 0 {
                return Err(Error::InvalidConfig("node.port cannot be 0".into()));
            }
            if self.service_ip.contains('/') {
                return Err(Error::InvalidConfig(format!(
                    "node.service_ip {} must not contain '/'",
                    self.service_ip
                )));
            }
        }
        Ok(())
    }

    /// Host address, falling back to the advertised one
    pub fn host_ip(&self) -> &str {
        if self.node_ip.is_empty() {
            &self.service_ip
        } else {
            &self.node_ip
        }
    }
}

fn default_register() -> bool {
    true
}
fn default_service_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_SERVICE_PORT
}
fn default_protocol() -> String {
    "tcp".to_string()
}
fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}
fn default_service_name() -> String {
    "data".to_string()
}
fn default_agent_count_max() -> u64 {
    100_000
}
