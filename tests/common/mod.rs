use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::unbounded;
use routeplane::balance::ScheduleRequest;
use routeplane::balance::ScheduleResponse;
use routeplane::balance::Scheduler;
use routeplane::configurator::Configurator;
use routeplane::store::ConfigStore;
use routeplane::store::CoordStore;
use routeplane::store::MemoryClient;
use routeplane::store::MemoryEnsemble;
use routeplane::Settings;
use serde_json::json;

pub const WAIT: Duration = Duration::from_secs(5);

pub const CHANNEL_BASE: &str = "/it/dataserver/channelid";
pub const DATAFLOW_KEY: &str = "/it/dataserver/dataflow";
pub const DISCOVERY_BASE: &str = "/it/service/data";
pub const BALANCE_KEY: &str = "/it/balance/data";
pub const OPS_BASE: &str = "/it/ops_config";
pub const STREAM_TO_BASE: &str = "/it/dataserver/streamto";

/// Settings for one server in the test ensemble
pub fn server_settings(
    service_ip: &str,
    cluster: &str,
    zone: &str,
    city: &str,
) -> Settings {
    let mut settings = Settings::default();
    settings.store.endpoints = "in-process".to_string();
    settings.paths.channel_base = CHANNEL_BASE.to_string();
    settings.paths.dataflow = DATAFLOW_KEY.to_string();
    settings.paths.discovery_base = DISCOVERY_BASE.to_string();
    settings.paths.balance = BALANCE_KEY.to_string();
    settings.paths.ops_service_base = OPS_BASE.to_string();
    settings.paths.stream_to_base = STREAM_TO_BASE.to_string();
    settings.node.service_ip = service_ip.to_string();
    settings.node.cluster_name = cluster.to_string();
    settings.node.zone_id = zone.to_string();
    settings.node.city_id = city.to_string();
    settings.node.agent_count_max = 100;
    settings.scheduler.dispatch_interval_ms = 10;
    settings.validate().expect("valid test settings");
    settings
}

pub struct TestServer {
    pub client: Arc<MemoryClient>,
    pub configurator: Arc<Configurator>,
}

/// Starts a configurator on its own session of `ensemble`
pub fn start_server(
    ensemble: &MemoryEnsemble,
    settings: &Settings,
) -> TestServer {
    let client = MemoryClient::connect(ensemble, 2);
    let store: Arc<dyn ConfigStore> = Arc::new(CoordStore::direct(client.clone()));
    let configurator = Configurator::new(settings, Some(store.clone()), Some(store));
    configurator.start().expect("configurator starts");
    TestServer { client, configurator }
}

/// A session for seeding the ensemble from the test itself
pub fn admin_store(ensemble: &MemoryEnsemble) -> CoordStore {
    CoordStore::direct(MemoryClient::connect(ensemble, 1))
}

pub fn wait_until(
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn schedule(
    scheduler: &Scheduler,
    request: ScheduleRequest,
) -> ScheduleResponse {
    let (tx, rx) = unbounded();
    scheduler.submit(
        request,
        Box::new(move |response| {
            let _ = tx.send(response);
        }),
    );
    rx.recv_timeout(WAIT).expect("scheduler answers")
}

pub fn endpoints(response: &ScheduleResponse) -> Vec<String> {
    response.cluster_list.iter().map(|e| e.endpoint.clone()).collect()
}

pub fn seed_entity(
    store: &dyn ConfigStore,
    channel_id: u32,
    topic: &str,
) {
    let entity = format!("{}/{}", CHANNEL_BASE, channel_id);
    let metadata = json!({ "channel_id": channel_id, "plat_name": "bkmonitor" }).to_string();
    let member = json!({
        "name": "primary",
        "stream_to": { "stream_to_id": 1, "kafka": { "topic_name": topic } },
        "filter_name_and": ["only_login"]
    })
    .to_string();
    let filter = json!({
        "name": "only_login",
        "field_index": 0,
        "field_data_type": "string",
        "field_data_value": "login",
        "field_separator": "|",
        "field_in": "data"
    })
    .to_string();
    store
        .create_with_parents(&format!("{}/metadata", entity), &metadata, false)
        .expect("seed metadata");
    store
        .create_with_parents(&format!("{}/channel/primary", entity), &member, false)
        .expect("seed channel");
    store
        .create_with_parents(&format!("{}/filter/only_login", entity), &filter, false)
        .expect("seed filter");
    // Writers touch the entity once its members are in place
    store.set(&entity, "").expect("touch entity");
}

pub fn dataflow(channel: &str) -> String {
    json!({
        "dataflow": {
            "receiver": [ { "name": "r_tcp", "protocol": 1, "bind": "0.0.0.0", "port": 58625 } ],
            "exporter": [ { "name": "e_log", "type": 1, "path": "./data", "filename": "data.log" } ],
            "channel": [ { "name": channel, "decode": 1, "receiver": "r_tcp", "exporter": ["e_log"] } ]
        }
    })
    .to_string()
}
