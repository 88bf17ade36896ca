use std::sync::Arc;

use crossbeam_channel::unbounded;
use routeplane::store::ConfigStore;
use routeplane::store::MemoryEnsemble;

use crate::common::*;
use crate::enable_logger;

#[test]
fn pipeline_and_entities_follow_store_updates() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let admin = admin_store(&ensemble);
    admin.create_with_parents(DATAFLOW_KEY, &dataflow("c_first"), false).unwrap();
    seed_entity(&admin, 11, "topic_a");

    let server = start_server(&ensemble, &server_settings("10.9.0.1", "c1", "z1", "sz"));
    let configurator = server.configurator.clone();
    let (tx, rx) = unbounded();
    configurator.on_pipeline_config_changed(Box::new(move |pipeline| {
        let _ = tx.send(pipeline);
    }));

    assert!(configurator.current_pipeline_config().channel("c_first").is_some());
    assert!(wait_until(WAIT, || configurator.channel_dump(11).is_some()));
    assert!(configurator.channel_dump(11).unwrap().contains("topic_a"));

    // A reader holding the old generation keeps seeing it whole
    let before = configurator.pipeline_snapshot();
    admin.set(DATAFLOW_KEY, &dataflow("c_second")).unwrap();
    let published = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(published.channel_names(), vec!["c_second"]);
    assert_eq!(before.channel_names(), vec!["c_first"]);

    seed_entity(&admin, 12, "topic_b");
    assert!(wait_until(WAIT, || configurator.channel_dump(12).is_some()));

    configurator.stop();
}

#[test]
fn broken_entity_never_shadows_the_published_one() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let admin = admin_store(&ensemble);
    seed_entity(&admin, 21, "topic_good");

    let server = start_server(&ensemble, &server_settings("10.9.0.2", "c1", "z1", "sz"));
    let configurator = server.configurator.clone();
    assert!(wait_until(WAIT, || configurator.registry().contains(21)));
    let published = configurator.registry().get(21).unwrap();

    // The member now names a filter that does not exist
    let member = format!("{}/21/channel/primary", CHANNEL_BASE);
    admin
        .set(
            &member,
            r#"{"name": "primary", "stream_to": {"stream_to_id": 1, "kafka": {"topic_name": "topic_bad"}}, "filter_name_and": ["missing"]}"#,
        )
        .unwrap();
    admin
        .set(&format!("{}/21/metadata", CHANNEL_BASE), r#"{"channel_id": 21, "plat_name": "bkmonitor"}"#)
        .unwrap();

    let loader = configurator.loader().unwrap();
    let report = loader.load(21).wait(WAIT).unwrap();
    assert!(report.into_record().is_err());
    let current = configurator.registry().get(21).unwrap();
    assert!(Arc::ptr_eq(&current, &published));
    assert!(!configurator.channel_dump(21).unwrap().contains("topic_bad"));

    configurator.stop();
}

#[test]
fn stopping_a_server_removes_its_discovery_node() {
    let ensemble = MemoryEnsemble::new();
    let admin = admin_store(&ensemble);
    let server = start_server(&ensemble, &server_settings("10.9.0.3", "c1", "z1", "sz"));
    let key = format!("{}/10.9.0.3_58625", DISCOVERY_BASE);
    assert!(admin.exists(&key));
    assert_eq!(admin.get(&key).unwrap(), server.configurator.service_node_json());

    server.configurator.stop();
    assert!(!admin.exists(&key));
    assert!(server.client.is_closed());
}

#[test]
fn ops_mapping_is_resolvable_after_start() {
    let ensemble = MemoryEnsemble::new();
    let admin = admin_store(&ensemble);
    admin
        .create_with_parents(&format!("{}/svc", OPS_BASE), r#"{"service_id": 42, "channel_id": 1042}"#, false)
        .unwrap();

    let server = start_server(&ensemble, &server_settings("10.9.0.4", "c1", "z1", "sz"));
    assert_eq!(server.configurator.channel_id_for_ops_service(42), Some(1042));
    assert_eq!(server.configurator.channel_id_for_ops_service(43), None);
    server.configurator.stop();
}
