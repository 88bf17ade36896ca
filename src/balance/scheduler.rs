//! Single-threaded scheduling loop.
//!
//! Callers enqueue requests from any thread. One event-loop thread drains the
//! queue on a short tick and rebuilds the [`ClusterLoadTree`] from the
//! discovery nodes on a long tick. The tree is owned by that thread alone, so
//! no request ever observes a half-built tree.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use autometrics::autometrics;
use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ClusterLoadTree;
use super::LoadWeights;
use super::ScheduleErrorCode;
use super::ScheduleRequest;
use super::ScheduleResponse;
use super::ScheduledEndpoint;
use super::ServerBalanceInfo;
use super::ServiceNodeRecord;
use crate::metrics::LOAD_REFRESH_METRIC;
use crate::metrics::LOAD_TREE_SERVERS_METRIC;
use crate::metrics::SCHEDULE_REQUESTS_METRIC;
use crate::store::join_key;
use crate::store::ConfigStore;
use crate::BalanceConfig;
use crate::Error;
use crate::Result;
use crate::SchedulerConfig;
use crate::API_SLO;

/// Receives exactly one response per submitted request
pub type ScheduleCallback = Box<dyn FnOnce(ScheduleResponse) + Send + 'static>;

/// Receives the JSON encoding of one response
pub type JsonCallback = Box<dyn FnOnce(String) + Send + 'static>;

pub(crate) struct PendingRequest {
    pub(crate) request: ScheduleRequest,
    pub(crate) reply: ScheduleCallback,
}

enum Control {
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Fetching,
    FetchingEach,
    Rebuilding,
    Swapped,
}

impl fmt::Display for RefreshPhase {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where the loop reads server loads and weights from
#[derive(Clone)]
pub struct LoadSource {
    pub store: Arc<dyn ConfigStore>,
    pub discovery_base: String,
    pub balance_key: String,
    /// Weights used while the balance node is absent
    pub default_weights: BalanceConfig,
}

/// State owned by the event-loop thread.
pub(crate) struct SchedulerCore {
    config: SchedulerConfig,
    source: LoadSource,
    weights: LoadWeights,
    tree: ClusterLoadTree,
    phase: RefreshPhase,
}

impl SchedulerCore {
    pub(crate) fn new(
        config: SchedulerConfig,
        source: LoadSource,
    ) -> Self {
        let weights = LoadWeights::from(&source.default_weights);
        Self {
            config,
            source,
            weights,
            tree: ClusterLoadTree::new(),
            phase: RefreshPhase::Idle,
        }
    }

    pub(crate) fn tree(&self) -> &ClusterLoadTree {
        &self.tree
    }

    pub(crate) fn weights(&self) -> LoadWeights {
        self.weights
    }

    pub(crate) fn phase(&self) -> RefreshPhase {
        self.phase
    }

    fn enter(
        &mut self,
        phase: RefreshPhase,
    ) {
        trace!(from = %self.phase, to = %phase, "load refresh phase");
        self.phase = phase;
    }

    /// Rebuilds the tree from the discovery nodes. On a failed listing the
    /// previous tree stays in place.
    pub(crate) fn refresh(&mut self) {
        self.enter(RefreshPhase::Fetching);
        self.reload_weights();
        let store = self.source.store.clone();
        let base = self.source.discovery_base.clone();

        let children = match store.get_children(&base) {
            Ok(children) => children,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                warn!(base = %base, "load refresh skipped, keeping previous tree: {}", e);
                LOAD_REFRESH_METRIC.with_label_values(&["failed"]).inc();
                self.enter(RefreshPhase::Idle);
                return;
            }
        };

        self.enter(RefreshPhase::FetchingEach);
        let mut servers: Vec<ServerBalanceInfo> = Vec::with_capacity(children.len());
        for child in children {
            let key = join_key(&base, &child);
            let record = store
                .get(&key)
                .map_err(|e| e.to_string())
                .and_then(|raw| ServiceNodeRecord::parse(&raw).map_err(|e| e.to_string()));
            match record {
                Ok(record) => servers.push(ServerBalanceInfo::from_record(record, &self.weights)),
                Err(reason) => debug!(key = %key, %reason, "service node skipped"),
            }
        }

        self.enter(RefreshPhase::Rebuilding);
        let tree = ClusterLoadTree::build(servers);

        self.enter(RefreshPhase::Swapped);
        self.tree = tree;
        LOAD_TREE_SERVERS_METRIC.set(self.tree.len() as i64);
        LOAD_REFRESH_METRIC.with_label_values(&["swapped"]).inc();
        debug!(servers = self.tree.len(), "load tree rebuilt");

        self.enter(RefreshPhase::Idle);
    }

    fn reload_weights(&mut self) {
        match self.source.store.get(&self.source.balance_key) {
            Ok(raw) => match LoadWeights::parse(&raw) {
                Ok((weights, _)) => self.weights = weights,
                Err(e) => warn!(key = %self.source.balance_key, "invalid balance config, keeping previous weights: {}", e),
            },
            Err(e) if e.is_not_found() => self.weights = LoadWeights::from(&self.source.default_weights),
            Err(e) => warn!(key = %self.source.balance_key, "balance config unreadable, keeping previous weights: {}", e),
        }
    }

    pub(crate) fn schedule(
        &self,
        request: &ScheduleRequest,
    ) -> ScheduleResponse {
        let response = match self.tree.lookup(&request.cluster_name, &request.zone_id, &request.city_id) {
            Some(servers) => {
                let limit = match self.config.max_endpoints {
                    0 => servers.len(),
                    n => n.min(servers.len()),
                };
                ScheduleResponse::success(servers[..limit].iter().map(ScheduledEndpoint::from).collect())
            }
            None => ScheduleResponse::error(
                ScheduleErrorCode::NoServerAvailable,
                format!(
                    "no server for cluster {} zone {} city {}",
                    request.cluster_name, request.zone_id, request.city_id
                ),
            ),
        };
        count_request(response.error_code);
        response
    }

    /// Handles up to `batch_size` requests per round for at most
    /// `max_drain_rounds` rounds. Stops early once a round comes back short.
    pub(crate) fn drain(
        &self,
        queue: &Receiver<PendingRequest>,
    ) -> usize {
        let mut handled = 0;
        for _ in 0..self.config.max_drain_rounds {
            let mut round = 0;
            while round < self.config.batch_size {
                let Ok(pending) = queue.try_recv() else {
                    break;
                };
                let response = self.schedule(&pending.request);
                (pending.reply)(response);
                round += 1;
            }
            handled += round;
            if round < self.config.batch_size {
                break;
            }
        }
        if handled > 0 {
            trace!(handled, "schedule queue drained");
        }
        handled
    }
}

fn count_request(code: ScheduleErrorCode) {
    SCHEDULE_REQUESTS_METRIC.with_label_values(&[code.label()]).inc();
}

fn reply_stopped(queue: &Receiver<PendingRequest>) -> usize {
    let mut answered = 0;
    while let Ok(pending) = queue.try_recv() {
        count_request(ScheduleErrorCode::SchedulerStopped);
        (pending.reply)(ScheduleResponse::stopped());
        answered += 1;
    }
    answered
}

/// Handle to the scheduling loop.
///
/// Every submitted request gets exactly one response: a schedule, an error, or
/// `SchedulerStopped` once [`Scheduler::stop`] has begun. At most
/// `max_queue_len` requests wait for the loop; the rest get `QueueFull`.
pub struct Scheduler {
    queue_limit: usize,
    queue_tx: Sender<PendingRequest>,
    queue_rx: Receiver<PendingRequest>,
    control_tx: Sender<Control>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Scheduler {
    /// Spawns the event loop. The first tree is built before any request is
    /// served.
    pub fn start(
        config: SchedulerConfig,
        source: LoadSource,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let queue_limit = config.max_queue_len;
        let (queue_tx, queue_rx) = bounded(queue_limit);
        let (control_tx, control_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let dispatch_interval = config.dispatch_interval();
        let refresh_interval = config.refresh_interval();
        let queue = queue_rx.clone();
        let mut core = SchedulerCore::new(config, source);

        let handle = std::thread::Builder::new()
            .name("routeplane-scheduler".into())
            .spawn(move || {
                debug!("scheduler thread started");
                core.refresh();
                let dispatch_tick = crossbeam_channel::tick(dispatch_interval);
                let refresh_tick = crossbeam_channel::tick(refresh_interval);
                loop {
                    crossbeam_channel::select! {
                        recv(dispatch_tick) -> _ => {
                            core.drain(&queue);
                        }
                        recv(refresh_tick) -> _ => core.refresh(),
                        recv(control_rx) -> msg => match msg {
                            Ok(Control::Refresh) => core.refresh(),
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => {
                            debug!("scheduler received shutdown signal");
                            break;
                        }
                    }
                }
                let answered = reply_stopped(&queue);
                debug!(answered, "scheduler thread stopped");
            })
            .map_err(Error::Io)?;

        info!(
            dispatch_ms = dispatch_interval.as_millis() as u64,
            refresh_ms = refresh_interval.as_millis() as u64,
            queue_limit,
            "scheduler started"
        );
        Ok(Arc::new(Self {
            queue_limit,
            queue_tx,
            queue_rx,
            control_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            thread_handle: Mutex::new(Some(handle)),
            running: AtomicBool::new(true),
        }))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueues `request`. Never blocks; `reply` runs on the loop thread, or
    /// on the caller's thread when the scheduler is stopped or the queue is
    /// full.
    #[autometrics(objective = API_SLO)]
    pub fn submit(
        &self,
        request: ScheduleRequest,
        reply: ScheduleCallback,
    ) {
        if !self.is_running() {
            reply(ScheduleResponse::stopped());
            return;
        }
        match self.queue_tx.try_send(PendingRequest { request, reply }) {
            Ok(()) => {}
            Err(TrySendError::Full(pending)) => {
                warn!(queue_limit = self.queue_limit, "schedule queue full, request rejected");
                count_request(ScheduleErrorCode::QueueFull);
                (pending.reply)(ScheduleResponse::error(
                    ScheduleErrorCode::QueueFull,
                    format!("request queue exceeds {} pending requests", self.queue_limit),
                ));
                return;
            }
            Err(TrySendError::Disconnected(pending)) => {
                (pending.reply)(ScheduleResponse::stopped());
                return;
            }
        }
        // A stop that raced this push may already have drained the queue
        if !self.is_running() {
            reply_stopped(&self.queue_rx);
        }
    }

    /// JSON front end of [`Scheduler::submit`]. A malformed request is
    /// answered immediately with `InvalidRequest`.
    pub fn submit_json(
        &self,
        raw: &str,
        reply: JsonCallback,
    ) {
        match ScheduleRequest::from_json(raw) {
            Ok(request) => self.submit(request, Box::new(move |response| reply(response.to_json()))),
            Err(e) => {
                count_request(ScheduleErrorCode::InvalidRequest);
                reply(ScheduleResponse::error(ScheduleErrorCode::InvalidRequest, e.to_string()).to_json());
            }
        }
    }

    /// Asks the loop to rebuild the tree ahead of the next refresh tick.
    pub fn request_refresh(&self) {
        if self.is_running() {
            let _ = self.control_tx.send(Control::Refresh);
        }
    }

    /// Stops the loop and answers every queued request with
    /// `SchedulerStopped`. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread_handle.lock().take() {
            if handle.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }
        reply_stopped(&self.queue_rx);
        info!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
