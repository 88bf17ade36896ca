use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use autometrics::autometrics;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;

use super::ChannelConf;
use super::PipelineConfig;
use crate::metrics::ROUTING_TABLE_SWAPS_METRIC;
use crate::Result;
use crate::API_SLO;

/// Callback invoked with each newly published pipeline generation
pub type PipelineListener = Box<dyn Fn(Arc<PipelineConfig>) + Send + Sync + 'static>;

/// Hot-swapped pipeline configuration.
///
/// Readers load the current `Arc` without locking and keep a consistent
/// generation for as long as they hold it. Writers build a complete new
/// [`PipelineConfig`] and swap it in under `write_lock`, which also orders
/// listener notifications. Listeners must not write back into the table.
pub struct RoutingTable {
    current: ArcSwap<PipelineConfig>,
    generation: AtomicU64,
    write_lock: Mutex<()>,
    listeners: RwLock<Vec<PipelineListener>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl RoutingTable {
    pub fn new(initial: PipelineConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Current generation, shared
    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        self.current.load_full()
    }

    /// Independent deep copy of the current generation
    pub fn get_snapshot(&self) -> PipelineConfig {
        self.current.load().as_ref().clone()
    }

    /// Number of swaps so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn on_changed(
        &self,
        listener: PipelineListener,
    ) {
        self.listeners.write().push(listener);
    }

    /// Publishes `next` as a whole and returns its generation.
    #[autometrics(objective = API_SLO)]
    pub fn replace(
        &self,
        next: PipelineConfig,
    ) -> u64 {
        let _guard = self.write_lock.lock();
        self.swap_locked(next)
    }

    /// Copies the current generation, replaces one channel in the copy and
    /// publishes it.
    pub fn replace_channel(
        &self,
        name: &str,
        conf: ChannelConf,
    ) -> u64 {
        let _guard = self.write_lock.lock();
        let mut next = self.current.load().as_ref().clone();
        next.replace_channel(name, conf);
        self.swap_locked(next)
    }

    pub fn remove_channel(
        &self,
        name: &str,
    ) -> Option<u64> {
        let _guard = self.write_lock.lock();
        let mut next = self.current.load().as_ref().clone();
        next.remove_channel(name)?;
        Some(self.swap_locked(next))
    }

    /// Parses a dataflow document and publishes it. A malformed document
    /// leaves the current generation in place.
    pub fn apply_json(
        &self,
        raw: &str,
    ) -> Result<u64> {
        let next = PipelineConfig::from_json(raw)?;
        Ok(self.replace(next))
    }

    pub fn load_from_file(
        &self,
        path: &Path,
    ) -> Result<u64> {
        let raw = std::fs::read_to_string(path)?;
        let generation = self.apply_json(&raw)?;
        info!(path = %path.display(), generation, "pipeline configuration loaded from file");
        Ok(generation)
    }

    fn swap_locked(
        &self,
        next: PipelineConfig,
    ) -> u64 {
        let next = Arc::new(next);
        self.current.store(next.clone());
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        ROUTING_TABLE_SWAPS_METRIC.inc();
        debug!(generation, channels = next.len(), "pipeline configuration swapped");
        for listener in self.listeners.read().iter() {
            listener(next.clone());
        }
        generation
    }
}
