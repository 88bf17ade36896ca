//! Storage clusters that member channels export to.
//!
//! A member's `stream_to.stream_to_id` names one node under the stream-to
//! base. Its value describes the cluster: `report_mode` selects which of the
//! `kafka`, `pulsar`, `redis` or `proxy` objects applies.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::SchemaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAddress {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaCluster {
    pub storage_address: Vec<StorageAddress>,
    #[serde(default)]
    pub security_protocol: String,
    #[serde(default)]
    pub sasl_mechanisms: String,
    #[serde(default)]
    pub sasl_username: String,
    #[serde(default)]
    pub sasl_passwd: String,
    #[serde(default = "default_required_acks")]
    pub request_required_acks: String,
}

fn default_required_acks() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulsarCluster {
    pub storage_address: Vec<StorageAddress>,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    Sentinel,
    Single,
}

fn default_redis_mode() -> RedisMode {
    RedisMode::Sentinel
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisCluster {
    pub storage_address: Vec<StorageAddress>,
    #[serde(default)]
    pub master_name: String,
    #[serde(default)]
    pub passwd: String,
    #[serde(default)]
    pub sentinel_passwd: String,
    #[serde(default = "default_redis_mode")]
    pub mode: RedisMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCluster {
    pub storage_address: Vec<StorageAddress>,
    #[serde(default)]
    pub http_request_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterTarget {
    Kafka(KafkaCluster),
    Pulsar(PulsarCluster),
    Redis(RedisCluster),
    Proxy(ProxyCluster),
}

impl ClusterTarget {
    pub fn report_mode(&self) -> &'static str {
        match self {
            ClusterTarget::Kafka(_) => "kafka",
            ClusterTarget::Pulsar(_) => "pulsar",
            ClusterTarget::Redis(_) => "redis",
            ClusterTarget::Proxy(_) => "proxy",
        }
    }

    pub fn addresses(&self) -> &[StorageAddress] {
        match self {
            ClusterTarget::Kafka(cluster) => &cluster.storage_address,
            ClusterTarget::Pulsar(cluster) => &cluster.storage_address,
            ClusterTarget::Redis(cluster) => &cluster.storage_address,
            ClusterTarget::Proxy(cluster) => &cluster.storage_address,
        }
    }
}

/// Value of one node under the stream-to base
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamToCluster {
    pub stream_to_id: i64,
    pub name: String,
    #[serde(flatten)]
    pub target: ClusterTarget,
}

#[derive(Deserialize)]
struct StreamToClusterDoc {
    #[serde(default)]
    name: String,
    #[serde(default)]
    report_mode: String,
    kafka: Option<KafkaCluster>,
    pulsar: Option<PulsarCluster>,
    redis: Option<RedisCluster>,
    proxy: Option<ProxyCluster>,
}

impl StreamToCluster {
    pub fn parse(
        stream_to_id: i64,
        raw: &str,
    ) -> Result<Self, SchemaError> {
        let doc: StreamToClusterDoc = serde_json::from_str(raw)?;
        let target = match doc.report_mode.as_str() {
            "kafka" => doc.kafka.map(ClusterTarget::Kafka),
            "pulsar" => doc.pulsar.map(ClusterTarget::Pulsar),
            "redis" => doc.redis.map(ClusterTarget::Redis),
            "proxy" => doc.proxy.map(ClusterTarget::Proxy),
            other => {
                return Err(SchemaError::invalid(
                    "stream_to",
                    format!("unsupported report_mode {:?}", other),
                ))
            }
        }
        .ok_or_else(|| SchemaError::invalid("stream_to", format!("report_mode {} has no matching object", doc.report_mode)))?;

        let addresses = target.addresses();
        if addresses.is_empty() {
            return Err(SchemaError::invalid("stream_to", "storage_address is empty"));
        }
        if let Some(bad) = addresses.iter().find(|a| a.ip.is_empty() || a.port == 0) {
            return Err(SchemaError::invalid(
                "stream_to",
                format!("invalid storage address {:?}:{}", bad.ip, bad.port),
            ));
        }

        Ok(StreamToCluster {
            stream_to_id,
            name: doc.name,
            target,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Stream-to clusters by id, as last read from the store.
#[derive(Debug, Default)]
pub struct StreamToRegistry {
    by_id: DashMap<i64, Arc<StreamToCluster>>,
}

impl StreamToRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the replaced cluster, if any
    pub fn upsert(
        &self,
        cluster: StreamToCluster,
    ) -> Option<Arc<StreamToCluster>> {
        self.by_id.insert(cluster.stream_to_id, Arc::new(cluster))
    }

    pub fn remove(
        &self,
        stream_to_id: i64,
    ) -> Option<Arc<StreamToCluster>> {
        self.by_id.remove(&stream_to_id).map(|(_, cluster)| cluster)
    }

    pub fn get(
        &self,
        stream_to_id: i64,
    ) -> Option<Arc<StreamToCluster>> {
        self.by_id.get(&stream_to_id).map(|entry| entry.value().clone())
    }

    pub fn contains(
        &self,
        stream_to_id: i64,
    ) -> bool {
        self.by_id.contains_key(&stream_to_id)
    }

    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.by_id.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
