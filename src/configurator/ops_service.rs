use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::SchemaError;

/// Value of one child under the ops service base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsServiceConfig {
    pub service_id: i64,
    pub channel_id: u32,
}

impl OpsServiceConfig {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Ops service mappings keyed by store node name
#[derive(Debug, Default)]
pub struct OpsServiceMap {
    by_node: DashMap<String, OpsServiceConfig>,
}

impl OpsServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(
        &self,
        node: &str,
        config: OpsServiceConfig,
    ) {
        self.by_node.insert(node.to_string(), config);
    }

    pub fn remove(
        &self,
        node: &str,
    ) -> Option<OpsServiceConfig> {
        self.by_node.remove(node).map(|(_, config)| config)
    }

    pub fn contains_node(
        &self,
        node: &str,
    ) -> bool {
        self.by_node.contains_key(node)
    }

    pub fn nodes(&self) -> Vec<String> {
        self.by_node.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Channel of the first mapping found for `service_id`
    pub fn channel_id_for(
        &self,
        service_id: i64,
    ) -> Option<u32> {
        self.by_node
            .iter()
            .find(|entry| entry.value().service_id == service_id)
            .map(|entry| entry.value().channel_id)
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}
