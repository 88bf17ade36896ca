use std::path::Path;
use std::sync::Arc;

use routeplane::balance::LoadSource;
use routeplane::balance::Scheduler;
use routeplane::configurator::Configurator;
use routeplane::configurator::LoadReporter;
use routeplane::configurator::SharedLoad;
use routeplane::constants::LOG_FILE_NAME;
use routeplane::metrics::init_metrics;
use routeplane::store::ConfigStore;
use routeplane::store::CoordStore;
use routeplane::store::MemoryClient;
use routeplane::store::MemoryEnsemble;
use routeplane::utils::open_file_for_append;
use routeplane::Error;
use routeplane::Result;
use routeplane::Settings;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = Settings::load(None)?;

    // Initializing Logs
    let _guard = init_observability(&settings.monitoring.log_dir)?;
    init_metrics();

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    // Coordination sessions
    let (store, discovery_store) = connect_stores(&settings)?;

    let configurator = Configurator::new(&settings, store.clone(), discovery_store.clone());
    configurator.start()?;

    let scheduler = match discovery_store {
        Some(discovery) => {
            let source = LoadSource {
                store: discovery,
                discovery_base: settings.paths.discovery_base.clone(),
                balance_key: settings.paths.balance.clone(),
                default_weights: settings.balance.clone(),
            };
            let scheduler = Scheduler::start(settings.scheduler.clone(), source)?;
            let on_change = scheduler.clone();
            configurator.on_balance_changed(Box::new(move |_| on_change.request_refresh()));
            Some(scheduler)
        }
        None => {
            warn!("no coordination store configured, scheduler not started");
            None
        }
    };

    let load = Arc::new(SharedLoad::new());
    let reporter = LoadReporter::spawn(
        configurator.clone(),
        load,
        settings.monitoring.load_report_interval(),
        graceful_rx.clone(),
    );

    info!("Application started. Waiting for CTRL+C signal...");
    // Listen on Shutdown Signal
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    let mut shutdown = graceful_rx;
    if shutdown.changed().await.is_err() {
        warn!("shutdown signal sender dropped");
    }

    if let Err(e) = reporter.await {
        error!("load reporter stopped abnormally: {:?}", e);
    }
    if let Some(scheduler) = scheduler {
        scheduler.stop();
    }
    configurator.stop();

    info!("Exiting program.");
    Ok(())
}

/// Routing session plus the session used for discovery, which is either the
/// same one or a dedicated one.
fn connect_stores(settings: &Settings) -> Result<(Option<Arc<dyn ConfigStore>>, Option<Arc<dyn ConfigStore>>)> {
    if !settings.store.is_enabled() {
        return Ok((None, None));
    }
    if let Err(e) = settings.store.require_in_process() {
        error!("{}", e);
        return Err(e);
    }
    info!(
        session_timeout_ms = settings.store.session_timeout_ms,
        "starting in-process coordination ensemble"
    );
    let ensemble = MemoryEnsemble::new();
    let client = MemoryClient::connect(&ensemble, settings.store.completion_threads);
    let store: Arc<dyn ConfigStore> = Arc::new(CoordStore::direct(client.clone()));

    let discovery: Arc<dyn ConfigStore> = if settings.store.share_discovery_client {
        Arc::new(CoordStore::shared(client))
    } else {
        let dedicated = MemoryClient::connect(&ensemble, settings.store.completion_threads);
        Arc::new(CoordStore::direct(dedicated))
    };
    Ok((Some(store), Some(discovery)))
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    info!("Shutdown server..");
    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

pub fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(&log_dir.join(LOG_FILE_NAME))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
