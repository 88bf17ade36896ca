use std::sync::Arc;

use crossbeam_channel::unbounded;
use routeplane::balance::LoadExtend;
use routeplane::balance::LoadSource;
use routeplane::balance::NodeLoad;
use routeplane::balance::ScheduleErrorCode;
use routeplane::balance::ScheduleRequest;
use routeplane::balance::Scheduler;
use routeplane::store::ConfigStore;
use routeplane::store::MemoryEnsemble;
use routeplane::Settings;
use serde_json::Value;

use crate::common::*;
use crate::enable_logger;

fn start_scheduler(
    ensemble: &MemoryEnsemble,
    settings: &Settings,
) -> Arc<Scheduler> {
    let store: Arc<dyn ConfigStore> = Arc::new(admin_store(ensemble));
    let source = LoadSource {
        store,
        discovery_base: settings.paths.discovery_base.clone(),
        balance_key: settings.paths.balance.clone(),
        default_weights: settings.balance.clone(),
    };
    Scheduler::start(settings.scheduler.clone(), source).unwrap()
}

fn load(
    agent_count: u64,
    cpu_rate: f64,
) -> NodeLoad {
    NodeLoad {
        agent_count,
        agent_count_max: 0,
        extend: LoadExtend {
            cpu_rate,
            ..LoadExtend::default()
        },
    }
}

#[test]
fn registered_servers_are_scheduled_with_location_fallback() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let busy = start_server(&ensemble, &server_settings("10.0.1.1", "clusterA", "zoneA", "cityA"));
    let idle = start_server(&ensemble, &server_settings("10.0.1.2", "clusterA", "zoneA", "cityA"));
    let fallback = start_server(&ensemble, &server_settings("10.0.1.3", "default", "zoneA", "cityA"));
    busy.configurator.report_load(load(90, 50.0)).unwrap();
    idle.configurator.report_load(load(10, 5.0)).unwrap();

    let scheduler = start_scheduler(&ensemble, &server_settings("10.0.1.9", "x", "x", "x"));

    let response = schedule(&scheduler, ScheduleRequest::new("clusterA", "zoneA", "cityA"));
    assert!(response.is_success());
    assert_eq!(endpoints(&response), vec!["10.0.1.2:58625", "10.0.1.1:58625"]);
    assert!(response.cluster_list[0].nice > response.cluster_list[1].nice);

    let response = schedule(&scheduler, ScheduleRequest::new("clusterB", "zoneA", "cityA"));
    assert_eq!(endpoints(&response), vec!["10.0.1.3:58625"]);

    // Unknown city in a known zone still finds that zone's servers
    let response = schedule(&scheduler, ScheduleRequest::new("clusterA", "zoneA", "cityZ"));
    assert_eq!(response.cluster_list.len(), 2);

    let response = schedule(&scheduler, ScheduleRequest::new("clusterA", "zoneQ", "cityA"));
    assert_eq!(response.error_code, ScheduleErrorCode::NoServerAvailable);
    assert!(response.cluster_list.is_empty());

    // A stopped server disappears on the next refresh
    idle.configurator.stop();
    scheduler.request_refresh();
    assert!(wait_until(WAIT, || {
        endpoints(&schedule(&scheduler, ScheduleRequest::new("clusterA", "zoneA", "cityA"))) == vec!["10.0.1.1:58625"]
    }));

    scheduler.stop();
    busy.configurator.stop();
    fallback.configurator.stop();
}

#[test]
fn balance_change_reorders_servers() {
    enable_logger();
    let ensemble = MemoryEnsemble::new();
    let settings = server_settings("10.0.2.1", "c1", "z1", "sz");
    let agents_heavy = start_server(&ensemble, &settings);
    let cpu_heavy = start_server(&ensemble, &server_settings("10.0.2.2", "c1", "z1", "sz"));
    agents_heavy.configurator.report_load(load(90, 10.0)).unwrap();
    cpu_heavy.configurator.report_load(load(0, 80.0)).unwrap();

    let scheduler = start_scheduler(&ensemble, &settings);
    let on_change = scheduler.clone();
    agents_heavy
        .configurator
        .on_balance_changed(Box::new(move |_| on_change.request_refresh()));

    let request = || ScheduleRequest::new("c1", "z1", "sz");
    assert_eq!(
        endpoints(&schedule(&scheduler, request())),
        vec!["10.0.2.2:58625", "10.0.2.1:58625"]
    );

    // Only cpu counts from now on
    admin_store(&ensemble)
        .create_with_parents(
            BALANCE_KEY,
            r#"{"agent_weight": 0, "cpu_weight": 100, "mem_weight": 0, "net_weight": 0}"#,
            false,
        )
        .unwrap();
    assert!(wait_until(WAIT, || agents_heavy.configurator.balance_config().cpu_weight == 100.0));
    assert!(wait_until(WAIT, || {
        endpoints(&schedule(&scheduler, request())) == vec!["10.0.2.1:58625", "10.0.2.2:58625"]
    }));

    scheduler.stop();
    agents_heavy.configurator.stop();
    cpu_heavy.configurator.stop();
}

#[test]
fn wire_requests_are_answered_in_json() {
    let ensemble = MemoryEnsemble::new();
    let server = start_server(&ensemble, &server_settings("10.0.3.1", "c1", "z1", "sz"));
    let scheduler = start_scheduler(&ensemble, &server_settings("10.0.3.9", "x", "x", "x"));

    let (tx, rx) = unbounded();
    let reply = tx.clone();
    scheduler.submit_json(
        r#"{"cluster_name": "c1", "zone_id": "z1", "city_id": "sz"}"#,
        Box::new(move |json| {
            let _ = reply.send(json);
        }),
    );
    let answer: Value = serde_json::from_str(&rx.recv_timeout(WAIT).unwrap()).unwrap();
    assert_eq!(answer["error_code"], 0);
    assert_eq!(answer["cluster_list"][0]["endpoint"], "10.0.3.1:58625");
    assert_eq!(answer["cluster_list"][0]["cluster_name"], "c1");

    scheduler.submit_json(
        "not json",
        Box::new(move |json| {
            let _ = tx.send(json);
        }),
    );
    let answer: Value = serde_json::from_str(&rx.recv_timeout(WAIT).unwrap()).unwrap();
    assert_eq!(answer["error_code"], 2);

    scheduler.stop();
    let late = schedule(&scheduler, ScheduleRequest::default());
    assert_eq!(late.error_code, ScheduleErrorCode::SchedulerStopped);
    server.configurator.stop();
}
