use parking_lot::Mutex;

use crate::balance::NodeLoad;
use crate::balance::ServiceNodeMeta;
use crate::balance::ServiceNodeRecord;
use crate::store::join_key;
use crate::NodeConfig;

/// This server's discovery entry, kept current between load reports.
pub struct ServiceNode {
    key: String,
    agent_count_max: u64,
    record: Mutex<ServiceNodeRecord>,
}

impl ServiceNode {
    /// The entry lives at `<discovery_base>/<service_ip>_<port>`.
    pub fn new(
        node: &NodeConfig,
        discovery_base: &str,
    ) -> Self {
        let record = ServiceNodeRecord {
            service_ip: node.service_ip.clone(),
            protocol: node.protocol.clone(),
            port: node.port,
            ssl: node.ssl,
            meta: ServiceNodeMeta {
                zone_id: node.zone_id.clone(),
                city_id: node.city_id.clone(),
                cluster_name: node.cluster_name.clone(),
                cluster_id: node.cluster_id.clone(),
                service_name: node.service_name.clone(),
                service_id: node.service_id.clone(),
                node_ip: node.host_ip().to_string(),
            },
            load: NodeLoad {
                agent_count_max: node.agent_count_max,
                ..NodeLoad::default()
            },
        };
        Self {
            key: join_key(discovery_base, &format!("{}_{}", node.service_ip, node.port)),
            agent_count_max: node.agent_count_max,
            record: Mutex::new(record),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn to_json(&self) -> String {
        self.record.lock().to_json()
    }

    pub fn record(&self) -> ServiceNodeRecord {
        self.record.lock().clone()
    }

    /// Records a load sample and returns the new node value. A sample without
    /// an agent limit keeps the configured one.
    pub fn update_load(
        &self,
        mut load: NodeLoad,
    ) -> String {
        if load.agent_count_max == 0 {
            load.agent_count_max = self.agent_count_max;
        }
        let mut record = self.record.lock();
        record.load = load;
        record.to_json()
    }
}
