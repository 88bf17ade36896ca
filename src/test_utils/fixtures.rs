use std::sync::Arc;

use serde_json::json;

use crate::balance::LoadWeights;
use crate::balance::ServerBalanceInfo;
use crate::store::join_key;
use crate::store::ConfigStore;
use crate::store::CoordStore;
use crate::store::MemoryClient;
use crate::store::MemoryEnsemble;

pub const TEST_CHANNEL_BASE: &str = "/gse/config/server/dataserver/channelid";
pub const TEST_DISCOVERY_BASE: &str = "/gse/v2/service/data";
pub const TEST_BALANCE_KEY: &str = "/gse/config/server/balance/data";
pub const TEST_DATAFLOW_KEY: &str = "/gse/config/server/dataserver/dataflow";
pub const TEST_OPS_BASE: &str = "/gse/v2/config/data/ops_config";
pub const TEST_STREAM_TO_BASE: &str = "/gse/config/server/dataserver/streamto";

/// A session against `ensemble` wrapped in an owning store
pub fn connect_store(ensemble: &MemoryEnsemble) -> (Arc<MemoryClient>, Arc<CoordStore>) {
    let client = MemoryClient::connect(ensemble, 2);
    let store = Arc::new(CoordStore::direct(client.clone()));
    (client, store)
}

pub fn metadata_json(channel_id: u32) -> String {
    json!({
        "name": format!("channel-{}", channel_id),
        "version": "1.0",
        "channel_id": channel_id,
        "plat_name": "bkmonitor",
        "label": { "odm": "odm", "bk_biz_id": 2, "bk_biz_name": "blueking" }
    })
    .to_string()
}

pub fn kafka_channel_json(
    name: &str,
    topic: &str,
    filters: &[&str],
) -> String {
    json!({
        "name": name,
        "stream_to": {
            "stream_to_id": 100,
            "kafka": { "topic_name": topic, "data_set": "ds", "biz_id": "2" }
        },
        "filter_name_and": filters,
    })
    .to_string()
}

/// Kafka cluster with a single broker at `ip:9092`
pub fn kafka_cluster_json(ip: &str) -> String {
    json!({
        "name": format!("kafka-{}", ip),
        "report_mode": "kafka",
        "kafka": { "storage_address": [{ "ip": ip, "port": 9092 }] }
    })
    .to_string()
}

pub fn filter_json(name: &str) -> String {
    json!({
        "name": name,
        "field_index": 1,
        "field_data_type": "string",
        "field_data_value": "login",
        "field_separator": "|",
        "field_in": "data"
    })
    .to_string()
}

/// Writes a complete routing entity: metadata, one kafka channel per name
/// and one filter per name.
pub fn seed_channel(
    store: &dyn ConfigStore,
    base: &str,
    channel_id: u32,
    channels: &[&str],
    filters: &[&str],
) {
    let entity = join_key(base, &channel_id.to_string());
    store
        .create_with_parents(&join_key(&entity, "metadata"), &metadata_json(channel_id), false)
        .expect("seed metadata");
    store
        .create_with_parents(&join_key(&entity, "channel"), "", false)
        .expect("seed channel list");
    store
        .create_with_parents(&join_key(&entity, "filter"), "", false)
        .expect("seed filter list");
    for name in channels {
        store
            .create(
                &join_key(&join_key(&entity, "channel"), name),
                &kafka_channel_json(name, &format!("topic_{}", name), filters),
                false,
            )
            .expect("seed channel");
    }
    for name in filters {
        store
            .create(&join_key(&join_key(&entity, "filter"), name), &filter_json(name), false)
            .expect("seed filter");
    }
}

#[allow(clippy::too_many_arguments)]
pub fn service_node_json(
    ip: &str,
    port: u16,
    cluster: &str,
    zone: &str,
    city: &str,
    agent_count: u64,
    agent_count_max: u64,
    cpu: f64,
) -> String {
    json!({
        "service_ip": ip,
        "protocol": "tcp",
        "port": port,
        "ssl": false,
        "meta": {
            "zone_id": zone,
            "city_id": city,
            "cluster_name": cluster,
            "cluster_id": "1",
            "service_name": "data",
            "service_id": "1",
            "node_ip": ip
        },
        "load": {
            "agent_count_max": agent_count_max,
            "agent_count": agent_count,
            "extend": { "cpu_rate": cpu, "memory_rate": 0.0, "network_rate": 0.0 }
        }
    })
    .to_string()
}

/// A server with the given location and load, scored with default weights.
pub fn server(
    ip: &str,
    cluster: &str,
    zone: &str,
    city: &str,
    cpu: f64,
) -> ServerBalanceInfo {
    let mut info = ServerBalanceInfo {
        cluster_name: cluster.to_string(),
        zone_id: zone.to_string(),
        city_id: city.to_string(),
        node_ip: ip.to_string(),
        service_ip: ip.to_string(),
        host_port: 58625,
        protocol: "tcp".to_string(),
        cpu_usage: cpu,
        mem_usage: 0.0,
        net_usage: 0.0,
        agent_count: 0,
        max_agent_count: 100,
        load_weight: 0.0,
    };
    info.load_weight = LoadWeights::default().score(&info);
    info
}

pub fn dataflow_json() -> String {
    json!({
        "dataflow": {
            "receiver": [
                { "name": "r_tcp", "protocol": 1, "bind": "0.0.0.0", "port": 58625 }
            ],
            "exporter": [
                { "name": "e_log", "type": 1, "path": "./data", "filename": "data.log" }
            ],
            "channel": [
                { "name": "c_default", "decode": 1, "receiver": "r_tcp", "exporter": ["e_log"] }
            ],
            "ops": { "opschannelid": 7, "agentopschannelid": 8 }
        }
    })
    .to_string()
}
