//! Control-plane facade.
//!
//! The [`Configurator`] owns the watched configuration kinds: the pipeline
//! document, the routing entities under the channel base, the balance
//! weights, the ops service mappings and the stream-to storage clusters. It also registers this server under
//! the discovery base. Every watch it arms targets itself as
//! [`WatchHandler`], and every handler branch re-arms its own watch before
//! re-reading the store, so no update between two notifications is lost.

mod load_report;
mod ops_service;
mod service_node;
pub use load_report::*;
pub use ops_service::*;
pub use service_node::*;

#[cfg(test)]
mod configurator_test;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use autometrics::autometrics;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::balance::LoadWeights;
use crate::balance::NodeLoad;
use crate::routing::ChannelLoader;
use crate::routing::ChannelRegistry;
use crate::routing::PipelineConfig;
use crate::routing::PipelineListener;
use crate::routing::RoutingTable;
use crate::routing::StreamToCluster;
use crate::routing::StreamToRegistry;
use crate::store::join_key;
use crate::store::leaf_name;
use crate::store::ConfigStore;
use crate::BalanceConfig;
use crate::ConfigKind;
use crate::PathsConfig;
use crate::Result;
use crate::Settings;
use crate::WatchEvent;
use crate::WatchEventKind;
use crate::WatchHandler;
use crate::WatchKind;
use crate::Watcher;
use crate::API_SLO;

/// Callback invoked with each newly applied balance configuration
pub type BalanceListener = Box<dyn Fn(&BalanceConfig) + Send + Sync + 'static>;

pub struct Configurator {
    paths: PathsConfig,
    local_file: Option<PathBuf>,
    register_node: bool,
    default_balance: BalanceConfig,

    store: Option<Arc<dyn ConfigStore>>,
    discovery_store: Option<Arc<dyn ConfigStore>>,

    table: RoutingTable,
    registry: Arc<ChannelRegistry>,
    loader: Option<Arc<ChannelLoader>>,
    /// Ids currently listed under the channel base
    listed_channels: Mutex<BTreeSet<u32>>,

    ops: OpsServiceMap,
    stream_to: StreamToRegistry,
    /// Ids currently listed under the stream-to base
    listed_stream_to: Mutex<BTreeSet<i64>>,
    balance: RwLock<BalanceConfig>,
    balance_listeners: RwLock<Vec<BalanceListener>>,

    service_node: ServiceNode,
    registered: AtomicBool,
    running: AtomicBool,

    self_ref: Weak<Configurator>,
}

impl Configurator {
    /// `store` serves every watched configuration kind; `discovery_store`
    /// receives this server's discovery node and may be the same session.
    /// Without a store the pipeline is seeded once from
    /// `dataflow.local_file`.
    pub fn new(
        settings: &Settings,
        store: Option<Arc<dyn ConfigStore>>,
        discovery_store: Option<Arc<dyn ConfigStore>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Configurator>| {
            let registry = Arc::new(ChannelRegistry::new());
            let context: Weak<dyn WatchHandler> = weak.clone();
            let loader = store.as_ref().map(|store| {
                ChannelLoader::new(
                    store.clone(),
                    registry.clone(),
                    settings.paths.channel_base.clone(),
                    context,
                )
            });
            Self {
                paths: settings.paths.clone(),
                local_file: settings.dataflow.local_file.clone(),
                register_node: settings.node.register,
                default_balance: settings.balance.clone(),
                store,
                discovery_store,
                table: RoutingTable::default(),
                registry,
                loader,
                listed_channels: Mutex::new(BTreeSet::new()),
                ops: OpsServiceMap::new(),
                stream_to: StreamToRegistry::new(),
                listed_stream_to: Mutex::new(BTreeSet::new()),
                balance: RwLock::new(settings.balance.clone()),
                balance_listeners: RwLock::new(Vec::new()),
                service_node: ServiceNode::new(&settings.node, &settings.paths.discovery_base),
                registered: AtomicBool::new(false),
                running: AtomicBool::new(false),
                self_ref: weak.clone(),
            }
        })
    }

    /// Arms every watch, reads the initial state and registers the discovery
    /// node. Calling it again is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if self.store.is_none() {
            match &self.local_file {
                Some(path) => {
                    self.table.load_from_file(path)?;
                }
                None => warn!("no coordination store and no local dataflow file, pipeline stays empty"),
            }
        } else {
            self.refresh_dataflow();
            self.refresh_channel_list();
            self.refresh_balance();
            self.refresh_ops_list();
            self.refresh_stream_to_list();
        }

        self.register_service_node()?;
        info!(
            channels = self.registry.len(),
            pipeline_channels = self.table.snapshot().len(),
            "configurator started"
        );
        Ok(())
    }

    /// Deletes the discovery node and closes the stores. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.registered.swap(false, Ordering::SeqCst) {
            if let Some(store) = &self.discovery_store {
                if let Err(e) = store.delete(self.service_node.key()) {
                    warn!(key = self.service_node.key(), "failed to delete service node: {}", e);
                }
            }
        }
        if let Some(store) = &self.discovery_store {
            store.close();
        }
        if let Some(store) = &self.store {
            let same = self
                .discovery_store
                .as_ref()
                .map(|d| Arc::ptr_eq(d, store))
                .unwrap_or(false);
            if !same {
                store.close();
            }
        }
        info!("configurator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -
    // Pipeline

    /// Independent copy of the current pipeline
    pub fn current_pipeline_config(&self) -> PipelineConfig {
        self.table.get_snapshot()
    }

    pub fn pipeline_snapshot(&self) -> Arc<PipelineConfig> {
        self.table.snapshot()
    }

    pub fn on_pipeline_config_changed(
        &self,
        listener: PipelineListener,
    ) {
        self.table.on_changed(listener);
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    // -
    // Routing entities

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn loader(&self) -> Option<&Arc<ChannelLoader>> {
        self.loader.as_ref()
    }

    /// JSON dump of a published routing entity
    pub fn channel_dump(
        &self,
        channel_id: u32,
    ) -> Option<String> {
        self.registry.get(channel_id).map(|record| record.to_json())
    }

    // -
    // Balance and ops

    pub fn balance_config(&self) -> BalanceConfig {
        self.balance.read().clone()
    }

    pub fn on_balance_changed(
        &self,
        listener: BalanceListener,
    ) {
        self.balance_listeners.write().push(listener);
    }

    pub fn channel_id_for_ops_service(
        &self,
        service_id: i64,
    ) -> Option<u32> {
        self.ops.channel_id_for(service_id)
    }

    pub fn ops_services(&self) -> &OpsServiceMap {
        &self.ops
    }

    // -
    // Stream-to clusters

    pub fn stream_to_cluster(
        &self,
        stream_to_id: i64,
    ) -> Option<Arc<StreamToCluster>> {
        self.stream_to.get(stream_to_id)
    }

    pub fn stream_to_clusters(&self) -> &StreamToRegistry {
        &self.stream_to
    }

    /// Clusters the members of a published routing entity export to, in
    /// member order. Members naming an unknown cluster are skipped.
    pub fn stream_to_for_channel(
        &self,
        channel_id: u32,
    ) -> Vec<Arc<StreamToCluster>> {
        let Some(record) = self.registry.get(channel_id) else {
            return Vec::new();
        };
        record
            .channels
            .iter()
            .filter_map(|channel| {
                let id = channel.stream_to.stream_to_id;
                let cluster = self.stream_to.get(id);
                if cluster.is_none() {
                    debug!(channel_id, stream_to_id = id, member = %channel.name, "member names an unknown stream-to cluster");
                }
                cluster
            })
            .collect()
    }

    // -
    // Discovery node

    pub fn service_node_json(&self) -> String {
        self.service_node.to_json()
    }

    pub fn service_node(&self) -> &ServiceNode {
        &self.service_node
    }

    /// Records `load` and rewrites the discovery node. A node lost with its
    /// session is created again.
    #[autometrics(objective = API_SLO)]
    pub fn report_load(
        &self,
        load: NodeLoad,
    ) -> Result<()> {
        let value = self.service_node.update_load(load);
        if !self.registered.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(store) = &self.discovery_store else {
            return Ok(());
        };
        match store.set(self.service_node.key(), &value) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(key = self.service_node.key(), "service node vanished, registering again");
                store.create_with_parents(self.service_node.key(), &value, true)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn register_service_node(&self) -> Result<()> {
        if !self.register_node {
            debug!("discovery registration disabled");
            return Ok(());
        }
        let Some(store) = &self.discovery_store else {
            return Ok(());
        };
        let key = self.service_node.key();
        let value = self.service_node.to_json();
        if store.exists(key) {
            store.set(key, &value)?;
        } else {
            store.create_with_parents(key, &value, true)?;
        }
        self.registered.store(true, Ordering::SeqCst);
        info!(key, "service node registered");
        Ok(())
    }

    // -
    // Watch plumbing

    fn arm(
        &self,
        store: &dyn ConfigStore,
        key: &str,
        kind: WatchKind,
        tag: ConfigKind,
    ) -> bool {
        let watcher = Watcher::new(tag, self.self_ref.clone());
        match store.watch(key, kind, watcher) {
            Ok(()) => true,
            Err(e) => {
                debug!(key, %tag, ?kind, "failed to arm watch: {}", e);
                false
            }
        }
    }

    /// Arms a value watch on `key`, then reads it. `None` when the node is
    /// absent or unreadable.
    fn watch_value(
        &self,
        key: &str,
        tag: ConfigKind,
    ) -> Option<String> {
        let store = self.store.as_ref()?;
        self.arm(store.as_ref(), key, WatchKind::Value, tag);
        match store.get(key) {
            Ok(value) => Some(value),
            Err(e) if e.is_not_found() => {
                debug!(key, %tag, "node absent");
                None
            }
            Err(e) => {
                warn!(key, %tag, "read failed: {}", e);
                None
            }
        }
    }

    /// Arms a children watch on `key`, then lists it. A missing node gets a
    /// value watch instead so its creation is noticed.
    fn watch_children(
        &self,
        key: &str,
        tag: ConfigKind,
    ) -> Option<Vec<String>> {
        let store = self.store.as_ref()?;
        let armed = self.arm(store.as_ref(), key, WatchKind::Children, tag);
        match store.get_children(key) {
            Ok(children) => {
                if !armed {
                    self.arm(store.as_ref(), key, WatchKind::Value, tag);
                }
                Some(children)
            }
            Err(e) if e.is_not_found() => {
                debug!(key, %tag, "base absent, waiting for creation");
                self.arm(store.as_ref(), key, WatchKind::Value, tag);
                Some(Vec::new())
            }
            Err(e) => {
                warn!(key, %tag, "children read failed: {}", e);
                None
            }
        }
    }

    // -
    // Pipeline document

    fn refresh_dataflow(&self) {
        let key = self.paths.dataflow.as_str();
        let Some(raw) = self.watch_value(key, ConfigKind::DataFlow) else {
            debug!(key, "no dataflow document, current pipeline kept");
            return;
        };
        match self.table.apply_json(&raw) {
            Ok(generation) => info!(generation, "pipeline configuration applied"),
            Err(e) => error!(key, "malformed dataflow document, current pipeline kept: {}", e),
        }
    }

    // -
    // Routing entities

    fn refresh_channel_list(&self) {
        let base = self.paths.channel_base.as_str();
        if let Some(children) = self.watch_children(base, ConfigKind::ChannelList) {
            self.sync_channels(&children);
        }
    }

    fn sync_channels(
        &self,
        children: &[String],
    ) {
        let Some(loader) = &self.loader else {
            return;
        };
        let listed: BTreeSet<u32> = children
            .iter()
            .filter_map(|child| match child.parse::<u32>() {
                Ok(id) => Some(id),
                Err(_) => {
                    debug!(child, "non-numeric channel node ignored");
                    None
                }
            })
            .collect();

        let (added, removed) = {
            let mut known = self.listed_channels.lock();
            let added: Vec<u32> = listed.difference(&known).copied().collect();
            let removed: Vec<u32> = known.difference(&listed).copied().collect();
            *known = listed;
            (added, removed)
        };

        for id in removed {
            self.registry.remove(id);
        }
        for id in added {
            loader.load(id);
        }
    }

    fn on_channel_config(
        &self,
        event: &WatchEvent,
    ) {
        let Some(loader) = &self.loader else {
            return;
        };
        let Some(id) = loader.channel_id_for_key(&event.path) else {
            warn!(path = %event.path, "channel watch on unexpected path");
            return;
        };
        if !self.listed_channels.lock().contains(&id) {
            debug!(channel_id = id, "channel no longer listed, watch ignored");
            return;
        }
        match event.kind {
            WatchEventKind::Deleted => {
                self.registry.remove(id);
                loader.watch_entity(id);
            }
            _ => {
                loader.load(id);
            }
        }
    }

    // -
    // Balance weights

    fn refresh_balance(&self) {
        let key = self.paths.balance.as_str();
        let next = match self.watch_value(key, ConfigKind::BalanceConfig) {
            None => self.default_balance.clone(),
            Some(raw) => match LoadWeights::parse(&raw) {
                Ok((_, config)) => config,
                Err(e) => {
                    warn!(key, "invalid balance config, previous weights kept: {}", e);
                    return;
                }
            },
        };
        {
            let mut current = self.balance.write();
            if *current == next {
                return;
            }
            *current = next.clone();
        }
        info!(
            agent = next.agent_weight,
            cpu = next.cpu_weight,
            mem = next.mem_weight,
            net = next.net_weight,
            "balance config applied"
        );
        for listener in self.balance_listeners.read().iter() {
            listener(&next);
        }
    }

    // -
    // Ops service mappings

    fn refresh_ops_list(&self) {
        let base = self.paths.ops_service_base.as_str();
        let Some(children) = self.watch_children(base, ConfigKind::OpsServiceList) else {
            return;
        };
        for node in self.ops.nodes() {
            if !children.contains(&node) {
                self.ops.remove(&node);
                info!(node, "ops service mapping removed");
            }
        }
        for node in children {
            if !self.ops.contains_node(&node) {
                self.refresh_ops_value(&node);
            }
        }
    }

    fn refresh_ops_value(
        &self,
        node: &str,
    ) {
        let key = join_key(&self.paths.ops_service_base, node);
        match self.watch_value(&key, ConfigKind::OpsServiceValue) {
            Some(raw) => match OpsServiceConfig::parse(&raw) {
                Ok(config) => {
                    self.ops.upsert(node, config);
                    debug!(node, service_id = config.service_id, channel_id = config.channel_id, "ops service mapping applied");
                }
                Err(e) => warn!(key = %key, "invalid ops service mapping ignored: {}", e),
            },
            None => {
                self.ops.remove(node);
            }
        }
    }

    fn on_ops_value(
        &self,
        event: &WatchEvent,
    ) {
        let node = leaf_name(&event.path);
        if !self.ops.contains_node(node) && event.kind != WatchEventKind::Created {
            debug!(node, "ops service no longer listed, watch ignored");
            return;
        }
        self.refresh_ops_value(node);
    }

    // -
    // Stream-to clusters

    fn refresh_stream_to_list(&self) {
        let base = self.paths.stream_to_base.as_str();
        let Some(children) = self.watch_children(base, ConfigKind::StreamToList) else {
            return;
        };
        let listed: BTreeSet<i64> = children
            .iter()
            .filter_map(|child| match child.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    debug!(child, "non-numeric stream-to node ignored");
                    None
                }
            })
            .collect();

        let (added, removed) = {
            let mut known = self.listed_stream_to.lock();
            let added: Vec<i64> = listed.difference(&known).copied().collect();
            let removed: Vec<i64> = known.difference(&listed).copied().collect();
            *known = listed;
            (added, removed)
        };

        for id in removed {
            if self.stream_to.remove(id).is_some() {
                info!(stream_to_id = id, "stream-to cluster removed");
            }
        }
        for id in added {
            self.refresh_stream_to_value(id);
        }
    }

    /// The watch is re-armed even when the node is gone, so a node deleted
    /// and created again is still noticed. An invalid value keeps the
    /// cluster last applied for `stream_to_id`.
    fn refresh_stream_to_value(
        &self,
        stream_to_id: i64,
    ) {
        let key = join_key(&self.paths.stream_to_base, &stream_to_id.to_string());
        let Some(raw) = self.watch_value(&key, ConfigKind::StreamToValue) else {
            if self.stream_to.remove(stream_to_id).is_some() {
                info!(stream_to_id, "stream-to cluster removed");
            }
            return;
        };
        match StreamToCluster::parse(stream_to_id, &raw) {
            Ok(cluster) => {
                info!(stream_to_id, name = %cluster.name, mode = cluster.target.report_mode(), "stream-to cluster applied");
                self.stream_to.upsert(cluster);
            }
            Err(e) => warn!(key = %key, "invalid stream-to cluster, previous kept: {}", e),
        }
    }

    fn on_stream_to_value(
        &self,
        event: &WatchEvent,
    ) {
        let node = leaf_name(&event.path);
        let Ok(id) = node.parse::<i64>() else {
            warn!(path = %event.path, "stream-to watch on unexpected path");
            return;
        };
        if !self.listed_stream_to.lock().contains(&id) {
            debug!(stream_to_id = id, "stream-to cluster no longer listed, watch ignored");
            return;
        }
        self.refresh_stream_to_value(id);
    }
}

impl WatchHandler for Configurator {
    fn handle_watch(
        &self,
        tag: ConfigKind,
        event: WatchEvent,
    ) {
        if !self.is_running() {
            debug!(%tag, path = %event.path, "configurator stopped, watch ignored");
            return;
        }
        debug!(%tag, path = %event.path, kind = ?event.kind, "watch fired");

        match tag {
            ConfigKind::DataFlow => self.refresh_dataflow(),
            ConfigKind::ChannelList => self.refresh_channel_list(),
            ConfigKind::ChannelConfig => self.on_channel_config(&event),
            ConfigKind::BalanceConfig => self.refresh_balance(),
            ConfigKind::OpsServiceList => self.refresh_ops_list(),
            ConfigKind::OpsServiceValue => self.on_ops_value(&event),
            ConfigKind::StreamToList => self.refresh_stream_to_list(),
            ConfigKind::StreamToValue => self.on_stream_to_value(&event),
        }
    }
}

impl Drop for Configurator {
    fn drop(&mut self) {
        self.stop();
    }
}
