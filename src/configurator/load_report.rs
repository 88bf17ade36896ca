use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::warn;

use super::Configurator;
use crate::balance::LoadExtend;
use crate::balance::NodeLoad;

/// Source of this server's current load
pub trait LoadProbe: Send + Sync {
    fn sample(&self) -> NodeLoad;
}

/// Probe fed by the data plane, which pushes its counters in.
#[derive(Debug, Default)]
pub struct SharedLoad {
    current: RwLock<NodeLoad>,
}

impl SharedLoad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_agent_count(
        &self,
        agent_count: u64,
    ) {
        self.current.write().agent_count = agent_count;
    }

    pub fn set_usage(
        &self,
        cpu_rate: f64,
        memory_rate: f64,
        network_rate: f64,
    ) {
        self.current.write().extend = LoadExtend {
            cpu_rate,
            memory_rate,
            network_rate,
        };
    }
}

impl LoadProbe for SharedLoad {
    fn sample(&self) -> NodeLoad {
        self.current.read().clone()
    }
}

/// Periodically rewrites the discovery node with a fresh probe sample.
///
/// Each write runs on tokio's blocking pool.
pub struct LoadReporter;

impl LoadReporter {
    pub fn spawn(
        configurator: Arc<Configurator>,
        probe: Arc<dyn LoadProbe>,
        interval: Duration,
        mut shutdown: watch::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Store writes block, keep them off the runtime workers
                        let configurator = configurator.clone();
                        let load = probe.sample();
                        match tokio::task::spawn_blocking(move || configurator.report_load(load)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!("load report failed: {}", e),
                            Err(e) => warn!("load report task failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("load reporter received shutdown signal");
                        break;
                    }
                }
            }
        })
    }
}
