use serde::Deserialize;
use serde::Serialize;

use super::LoadWeights;
use crate::constants::DEFAULT_LOCATION;
use crate::constants::DEFAULT_SERVICE_PORT;
use crate::SchemaError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceNodeMeta {
    #[serde(default)]
    pub zone_id: String,
    #[serde(default)]
    pub city_id: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub service_id: String,
    /// Host address behind `service_ip`
    #[serde(default)]
    pub node_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadExtend {
    #[serde(default)]
    pub cpu_rate: f64,
    #[serde(default)]
    pub memory_rate: f64,
    #[serde(default)]
    pub network_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeLoad {
    #[serde(default)]
    pub agent_count_max: u64,
    #[serde(default)]
    pub agent_count: u64,
    #[serde(default)]
    pub extend: LoadExtend,
}

/// Value of one ephemeral node under the discovery base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNodeRecord {
    pub service_ip: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub meta: ServiceNodeMeta,
    #[serde(default)]
    pub load: NodeLoad,
}

fn default_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

impl ServiceNodeRecord {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let record: ServiceNodeRecord = serde_json::from_str(raw)?;
        if record.service_ip.is_empty() {
            return Err(SchemaError::invalid("service node", "service_ip is required"));
        }
        Ok(record)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One schedulable server as seen in a single refresh cycle.
///
/// Identity is `(cluster_name, zone_id, city_id, node_ip)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerBalanceInfo {
    pub cluster_name: String,
    pub zone_id: String,
    pub city_id: String,
    pub node_ip: String,
    /// Address clients connect to
    pub service_ip: String,
    pub host_port: u16,
    pub protocol: String,
    pub cpu_usage: f64,
    pub mem_usage: f64,
    pub net_usage: f64,
    pub agent_count: u64,
    pub max_agent_count: u64,
    /// Higher is less loaded
    pub load_weight: f64,
}

fn location(value: String) -> String {
    if value.is_empty() {
        DEFAULT_LOCATION.to_string()
    } else {
        value
    }
}

impl ServerBalanceInfo {
    pub fn from_record(
        record: ServiceNodeRecord,
        weights: &LoadWeights,
    ) -> Self {
        let node_ip = if record.meta.node_ip.is_empty() {
            record.service_ip.clone()
        } else {
            record.meta.node_ip
        };
        let mut info = ServerBalanceInfo {
            cluster_name: location(record.meta.cluster_name),
            zone_id: location(record.meta.zone_id),
            city_id: location(record.meta.city_id),
            node_ip,
            service_ip: record.service_ip,
            host_port: record.port,
            protocol: record.protocol,
            cpu_usage: record.load.extend.cpu_rate,
            mem_usage: record.load.extend.memory_rate,
            net_usage: record.load.extend.network_rate,
            agent_count: record.load.agent_count,
            max_agent_count: record.load.agent_count_max,
            load_weight: 0.0,
        };
        info.load_weight = weights.score(&info);
        info
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.service_ip, self.host_port)
    }

    pub fn same_identity(
        &self,
        other: &ServerBalanceInfo,
    ) -> bool {
        self.node_ip == other.node_ip
            && self.city_id == other.city_id
            && self.zone_id == other.zone_id
            && self.cluster_name == other.cluster_name
    }
}
