use std::io::Write;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;

use super::*;
use crate::balance::ServiceNodeRecord;
use crate::store::CoordStore;
use crate::store::MemoryClient;
use crate::store::MemoryEnsemble;
use crate::test_utils::connect_store;
use crate::test_utils::dataflow_json;
use crate::test_utils::enable_logger;
use crate::test_utils::kafka_channel_json;
use crate::test_utils::kafka_cluster_json;
use crate::test_utils::metadata_json;
use crate::test_utils::seed_channel;
use crate::test_utils::wait_until;
use crate::test_utils::TEST_BALANCE_KEY;
use crate::test_utils::TEST_CHANNEL_BASE;
use crate::test_utils::TEST_DATAFLOW_KEY;
use crate::test_utils::TEST_DISCOVERY_BASE;
use crate::test_utils::TEST_OPS_BASE;
use crate::test_utils::TEST_STREAM_TO_BASE;

const WAIT: Duration = Duration::from_secs(5);

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.paths.dataflow = TEST_DATAFLOW_KEY.to_string();
    settings.paths.channel_base = TEST_CHANNEL_BASE.to_string();
    settings.paths.discovery_base = TEST_DISCOVERY_BASE.to_string();
    settings.paths.balance = TEST_BALANCE_KEY.to_string();
    settings.paths.ops_service_base = TEST_OPS_BASE.to_string();
    settings.paths.stream_to_base = TEST_STREAM_TO_BASE.to_string();
    settings.node.service_ip = "10.1.1.1".to_string();
    settings.node.cluster_name = "c1".to_string();
    settings
}

struct Fixture {
    client: Arc<MemoryClient>,
    store: Arc<CoordStore>,
    configurator: Arc<Configurator>,
}

/// Routing and discovery share one session
fn fixture(
    ensemble: &MemoryEnsemble,
    settings: &Settings,
) -> Fixture {
    let (client, store) = connect_store(ensemble);
    let shared: Arc<dyn ConfigStore> = store.clone();
    let configurator = Configurator::new(settings, Some(shared.clone()), Some(shared));
    Fixture {
        client,
        store,
        configurator,
    }
}

fn delete_tree(
    fixture: &Fixture,
    ensemble: &MemoryEnsemble,
    base: &str,
) {
    for key in ensemble.keys_under(base).into_iter().rev() {
        fixture.store.delete(&key).unwrap();
    }
}

#[test]
fn local_file_seeds_pipeline_without_store() {
    enable_logger();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(dataflow_json().as_bytes()).unwrap();
    let mut settings = settings();
    settings.dataflow.local_file = Some(file.path().to_path_buf());

    let configurator = Configurator::new(&settings, None, None);
    configurator.start().unwrap();

    let pipeline = configurator.current_pipeline_config();
    assert!(pipeline.channel("c_default").is_some());
    assert_eq!(pipeline.ops().ops_channel_id, 7);
    assert!(configurator.loader().is_none());
    configurator.stop();
}

#[test]
fn missing_local_file_fails_start() {
    let mut settings = settings();
    settings.dataflow.local_file = Some("/nonexistent/routeplane/dataflow.json".into());

    let configurator = Configurator::new(&settings, None, None);
    assert!(configurator.start().is_err());
}

#[test]
fn dataflow_watch_applies_updates_and_survives_malformed_ones() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    f.store.create_with_parents(TEST_DATAFLOW_KEY, &dataflow_json(), false).unwrap();

    let swaps = Arc::new(AtomicUsize::new(0));
    let counter = swaps.clone();
    f.configurator.on_pipeline_config_changed(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    f.configurator.start().unwrap();
    assert!(f.configurator.pipeline_snapshot().channel("c_default").is_some());
    assert_eq!(swaps.load(Ordering::SeqCst), 1);

    f.store
        .set(TEST_DATAFLOW_KEY, &dataflow_json().replace("c_default", "c_next"))
        .unwrap();
    assert!(wait_until(WAIT, || swaps.load(Ordering::SeqCst) == 2));
    assert!(f.configurator.pipeline_snapshot().channel("c_next").is_some());

    f.store.set(TEST_DATAFLOW_KEY, "{\"dataflow\": [").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(f.configurator.pipeline_snapshot().channel("c_next").is_some());

    // The watch is still armed after the malformed value
    f.store
        .set(TEST_DATAFLOW_KEY, &dataflow_json().replace("c_default", "c_final"))
        .unwrap();
    assert!(wait_until(WAIT, || f.configurator.pipeline_snapshot().channel("c_final").is_some()));

    // Deleting the document keeps the last pipeline
    f.store.delete(TEST_DATAFLOW_KEY).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(f.configurator.pipeline_snapshot().channel("c_final").is_some());
    f.configurator.stop();
}

#[test]
fn channel_list_loads_added_entities_and_drops_removed_ones() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    seed_channel(f.store.as_ref(), TEST_CHANNEL_BASE, 7, &["k1"], &["f1"]);
    f.store
        .create(&join_key(TEST_CHANNEL_BASE, "not_a_number"), "", false)
        .unwrap();

    f.configurator.start().unwrap();
    assert!(wait_until(WAIT, || f.configurator.registry().contains(7)));
    let dump = f.configurator.channel_dump(7).unwrap();
    assert!(dump.contains("topic_k1"));
    assert_eq!(f.configurator.registry().len(), 1);

    seed_channel(f.store.as_ref(), TEST_CHANNEL_BASE, 8, &["k2"], &[]);
    assert!(wait_until(WAIT, || f.configurator.registry().contains(8)));

    delete_tree(&f, &ensemble, &join_key(TEST_CHANNEL_BASE, "7"));
    assert!(wait_until(WAIT, || !f.configurator.registry().contains(7)));
    assert!(f.configurator.channel_dump(7).is_none());
    assert!(f.configurator.registry().contains(8));
    f.configurator.stop();
}

#[test]
fn channel_list_appearing_after_start_is_picked_up() {
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    f.configurator.start().unwrap();
    assert!(f.configurator.registry().is_empty());

    seed_channel(f.store.as_ref(), TEST_CHANNEL_BASE, 3, &["k1"], &[]);
    assert!(wait_until(WAIT, || f.configurator.registry().contains(3)));
    f.configurator.stop();
}

#[test]
fn metadata_update_reloads_entity() {
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    seed_channel(f.store.as_ref(), TEST_CHANNEL_BASE, 7, &["k1"], &[]);
    f.configurator.start().unwrap();
    assert!(wait_until(WAIT, || f.configurator.registry().contains(7)));
    let first = f.configurator.registry().get(7).unwrap().revision;

    let metadata_key = join_key(&join_key(TEST_CHANNEL_BASE, "7"), "metadata");
    f.store
        .set(&metadata_key, &metadata_json(7).replace("bkmonitor", "tglog"))
        .unwrap();
    assert!(wait_until(WAIT, || {
        f.configurator
            .registry()
            .get(7)
            .map(|record| record.revision > first && record.metadata.plat_name == "tglog")
            .unwrap_or(false)
    }));
    f.configurator.stop();
}

#[test]
fn entity_written_metadata_first_loads_after_touch() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    f.configurator.start().unwrap();

    let entity = join_key(TEST_CHANNEL_BASE, "31");
    f.store
        .create_with_parents(&join_key(&entity, "metadata"), &metadata_json(31), false)
        .unwrap();
    // Loading starts as soon as the entity is listed and fails without members
    std::thread::sleep(Duration::from_millis(300));
    assert!(!f.configurator.registry().contains(31));

    f.store
        .create_with_parents(
            &join_key(&entity, "channel/primary"),
            &kafka_channel_json("primary", "topic_primary", &[]),
            false,
        )
        .unwrap();
    f.store.create_with_parents(&join_key(&entity, "filter"), "", false).unwrap();
    f.store.set(&entity, "").unwrap();

    assert!(wait_until(WAIT, || f.configurator.registry().contains(31)));
    assert!(f.configurator.channel_dump(31).unwrap().contains("topic_primary"));
    f.configurator.stop();
}

#[test]
fn member_update_is_loaded_when_entity_is_touched() {
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    seed_channel(f.store.as_ref(), TEST_CHANNEL_BASE, 7, &["k1"], &[]);
    f.configurator.start().unwrap();
    assert!(wait_until(WAIT, || f.configurator.registry().contains(7)));
    assert!(f.configurator.channel_dump(7).unwrap().contains("topic_k1"));

    let entity = join_key(TEST_CHANNEL_BASE, "7");
    f.store
        .set(&join_key(&entity, "channel/k1"), &kafka_channel_json("k1", "topic_new", &[]))
        .unwrap();
    f.store.set(&entity, "").unwrap();

    assert!(wait_until(WAIT, || {
        f.configurator
            .channel_dump(7)
            .map(|dump| dump.contains("topic_new"))
            .unwrap_or(false)
    }));
    f.configurator.stop();
}

#[test]
fn failed_filter_list_publishes_nothing_and_leaves_retry_watch() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    seed_channel(f.store.as_ref(), TEST_CHANNEL_BASE, 9, &["k1"], &["f1"]);
    let entity = join_key(TEST_CHANNEL_BASE, "9");
    f.client.inject_async_failure(&join_key(&entity, "filter"));

    f.configurator.start().unwrap();
    let loader = f.configurator.loader().unwrap();
    let report = loader.load(9).wait(WAIT).unwrap();

    assert!(report.into_record().is_err());
    assert!(!f.configurator.registry().contains(9));
    assert!(f.configurator.channel_dump(9).is_none());
    let metadata_key = join_key(&entity, "metadata");
    assert!(f.store.has_pending_watch(&metadata_key, WatchKind::Value));
    assert_eq!(
        f.store.dispatcher().pending_tag(&metadata_key, WatchKind::Value),
        Some(ConfigKind::ChannelConfig)
    );

    // A later metadata write retries once the store has recovered
    f.client.clear_faults();
    f.store.set(&metadata_key, &metadata_json(9)).unwrap();
    assert!(wait_until(WAIT, || f.configurator.registry().contains(9)));
    f.configurator.stop();
}

#[test]
fn balance_node_overrides_defaults_and_notifies() {
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    let (tx, rx) = unbounded();
    f.configurator.on_balance_changed(Box::new(move |config| {
        let _ = tx.send(config.clone());
    }));
    f.configurator.start().unwrap();
    assert_eq!(f.configurator.balance_config(), BalanceConfig::default());
    assert!(rx.try_recv().is_err());

    f.store
        .create_with_parents(TEST_BALANCE_KEY, r#"{"agent_weight": 10, "cpu_weight": 30}"#, false)
        .unwrap();
    let applied = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(applied.agent_weight, 10.0);
    assert_eq!(f.configurator.balance_config().cpu_weight, 30.0);

    f.store.set(TEST_BALANCE_KEY, r#"{"agent_weight": -1}"#).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(f.configurator.balance_config().agent_weight, 10.0);

    f.store.delete(TEST_BALANCE_KEY).unwrap();
    let restored = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(restored, BalanceConfig::default());
    f.configurator.stop();
}

#[test]
fn ops_mappings_follow_the_store() {
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    f.store
        .create_with_parents(&join_key(TEST_OPS_BASE, "svc_a"), r#"{"service_id": 100, "channel_id": 7}"#, false)
        .unwrap();
    f.store
        .create(&join_key(TEST_OPS_BASE, "svc_bad"), "not json", false)
        .unwrap();

    f.configurator.start().unwrap();
    assert_eq!(f.configurator.channel_id_for_ops_service(100), Some(7));
    assert_eq!(f.configurator.ops_services().len(), 1);

    f.store
        .create(&join_key(TEST_OPS_BASE, "svc_b"), r#"{"service_id": 200, "channel_id": 8}"#, false)
        .unwrap();
    assert!(wait_until(WAIT, || f.configurator.channel_id_for_ops_service(200) == Some(8)));

    f.store
        .set(&join_key(TEST_OPS_BASE, "svc_a"), r#"{"service_id": 100, "channel_id": 9}"#)
        .unwrap();
    assert!(wait_until(WAIT, || f.configurator.channel_id_for_ops_service(100) == Some(9)));

    f.store.delete(&join_key(TEST_OPS_BASE, "svc_a")).unwrap();
    assert!(wait_until(WAIT, || f.configurator.channel_id_for_ops_service(100).is_none()));
    assert_eq!(f.configurator.channel_id_for_ops_service(200), Some(8));
    f.configurator.stop();
}

fn cluster_ip(
    configurator: &Configurator,
    stream_to_id: i64,
) -> Option<String> {
    configurator
        .stream_to_cluster(stream_to_id)
        .map(|cluster| cluster.target.addresses()[0].ip.clone())
}

#[test]
fn stream_to_clusters_follow_the_store() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    seed_channel(f.store.as_ref(), TEST_CHANNEL_BASE, 7, &["k1"], &[]);
    f.store
        .create_with_parents(&join_key(TEST_STREAM_TO_BASE, "100"), &kafka_cluster_json("10.0.0.1"), false)
        .unwrap();
    f.store
        .create(&join_key(TEST_STREAM_TO_BASE, "101"), r#"{"report_mode": "file"}"#, false)
        .unwrap();
    f.store
        .create(&join_key(TEST_STREAM_TO_BASE, "backup"), &kafka_cluster_json("10.0.0.9"), false)
        .unwrap();

    f.configurator.start().unwrap();
    assert_eq!(cluster_ip(&f.configurator, 100).as_deref(), Some("10.0.0.1"));
    assert!(f.configurator.stream_to_cluster(101).is_none());
    assert_eq!(f.configurator.stream_to_clusters().ids(), vec![100]);

    // fixture members export to stream-to id 100
    let resolved = f.configurator.stream_to_for_channel(7);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].stream_to_id, 100);
    assert!(f.configurator.stream_to_for_channel(8).is_empty());

    f.store
        .set(&join_key(TEST_STREAM_TO_BASE, "100"), &kafka_cluster_json("10.0.0.2"))
        .unwrap();
    assert!(wait_until(WAIT, || cluster_ip(&f.configurator, 100).as_deref() == Some("10.0.0.2")));

    f.store.set(&join_key(TEST_STREAM_TO_BASE, "100"), "not json").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(cluster_ip(&f.configurator, 100).as_deref(), Some("10.0.0.2"));

    f.store
        .set(&join_key(TEST_STREAM_TO_BASE, "101"), &kafka_cluster_json("10.0.1.1"))
        .unwrap();
    assert!(wait_until(WAIT, || cluster_ip(&f.configurator, 101).as_deref() == Some("10.0.1.1")));

    f.store
        .create(&join_key(TEST_STREAM_TO_BASE, "200"), &kafka_cluster_json("10.0.2.1"), false)
        .unwrap();
    assert!(wait_until(WAIT, || f.configurator.stream_to_cluster(200).is_some()));

    f.store.delete(&join_key(TEST_STREAM_TO_BASE, "100")).unwrap();
    assert!(wait_until(WAIT, || f.configurator.stream_to_cluster(100).is_none()));
    assert!(f.configurator.stream_to_for_channel(7).is_empty());
    assert_eq!(f.configurator.stream_to_clusters().ids(), vec![101, 200]);
    f.configurator.stop();
}

#[test]
fn service_node_is_registered_updated_and_removed() {
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    let key = join_key(TEST_DISCOVERY_BASE, "10.1.1.1_58625");

    f.configurator.start().unwrap();
    let registered = ServiceNodeRecord::parse(&f.store.get(&key).unwrap()).unwrap();
    assert_eq!(registered.meta.cluster_name, "c1");
    assert_eq!(registered.meta.node_ip, "10.1.1.1");
    assert_eq!(f.configurator.service_node_json(), f.store.get(&key).unwrap());

    f.configurator
        .report_load(NodeLoad {
            agent_count: 5,
            ..NodeLoad::default()
        })
        .unwrap();
    let reported = ServiceNodeRecord::parse(&f.store.get(&key).unwrap()).unwrap();
    assert_eq!(reported.load.agent_count, 5);
    assert_eq!(reported.load.agent_count_max, 100_000);

    // Lost node is written back on the next report
    f.store.delete(&key).unwrap();
    f.configurator.report_load(NodeLoad::default()).unwrap();
    assert!(f.store.exists(&key));

    f.configurator.stop();
    f.configurator.stop();
    assert!(!ensemble.keys_under(&key).contains(&key));
    assert!(f.client.is_closed());
}

#[test]
fn separate_discovery_session_is_closed_with_the_configurator() {
    let ensemble = MemoryEnsemble::new();
    let (routing_client, routing) = connect_store(&ensemble);
    let (discovery_client, discovery) = connect_store(&ensemble);
    let routing: Arc<dyn ConfigStore> = routing;
    let discovery: Arc<dyn ConfigStore> = discovery;
    let configurator = Configurator::new(&settings(), Some(routing), Some(discovery));

    configurator.start().unwrap();
    assert!(!ensemble
        .keys_under(&join_key(TEST_DISCOVERY_BASE, "10.1.1.1_58625"))
        .is_empty());

    configurator.stop();
    assert!(routing_client.is_closed());
    assert!(discovery_client.is_closed());
}

#[test]
fn registration_can_be_disabled() {
    let ensemble = MemoryEnsemble::new();
    let mut settings = settings();
    settings.node.register = false;
    let f = fixture(&ensemble, &settings);

    f.configurator.start().unwrap();
    assert!(!f.store.exists(&join_key(TEST_DISCOVERY_BASE, "10.1.1.1_58625")));
    f.configurator.report_load(NodeLoad::default()).unwrap();
    f.configurator.stop();
}

#[test]
fn events_after_stop_are_ignored() {
    let ensemble = MemoryEnsemble::new();
    let f = fixture(&ensemble, &settings());
    f.configurator.start().unwrap();
    f.configurator.stop();

    f.configurator.handle_watch(
        ConfigKind::DataFlow,
        WatchEvent {
            path: TEST_DATAFLOW_KEY.to_string(),
            kind: WatchEventKind::ValueChanged,
            values: vec![dataflow_json()],
        },
    );
    assert!(f.configurator.pipeline_snapshot().is_empty());
}
