
use std::sync::Once;

use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;

lazy_static! {
    pub static ref WATCH_EVENTS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_events", "Watch notifications by dispatch outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref GATHER_OUTCOME_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("channel_gather_outcome", "Routing record loads by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref GATHER_LATENCY_METRIC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("channel_gather_latency_ms", "Routing record load latency in ms")
            .buckets(exponential_buckets(1.0, 2.0, 14).expect("valid buckets")),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref ROUTING_TABLE_SWAPS_METRIC: IntCounter = IntCounter::new(
        "routing_table_swaps",
        "Pipeline configuration generations published"
    )
    .expect("metric can not be created");

    pub static ref SCHEDULE_REQUESTS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("schedule_requests", "Scheduling requests by error code"),
        &["code"]
    )
    .expect("metric can not be created");

    pub static ref LOAD_TREE_SERVERS_METRIC: IntGauge = IntGauge::new(
        "load_tree_servers",
        "Servers in the current cluster load tree"
    )
    .expect("metric can not be created");

    pub static ref LOAD_REFRESH_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("load_tree_refresh", "Load tree refresh cycles by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static INIT: Once = Once::new();

pub fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(WATCH_EVENTS_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(GATHER_OUTCOME_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(GATHER_LATENCY_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ROUTING_TABLE_SWAPS_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(SCHEDULE_REQUESTS_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LOAD_TREE_SERVERS_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LOAD_REFRESH_METRIC.clone()))
        .expect("collector can be registered");
}

/// Registers the crate collectors with [`REGISTRY`] and starts the
/// autometrics exporter. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        register_custom_metrics(&REGISTRY);
        let _ = prometheus_exporter::try_init();
    });
}

/// Text exposition of the crate collectors followed by the autometrics ones.
/// Serving it is left to the admin layer.
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    }
    let mut body = String::from_utf8(buffer).unwrap_or_default();
    body.push_str(&prometheus_exporter::encode_http_response().into_body());
    body
}
