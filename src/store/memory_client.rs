//! In-process coordination ensemble.
//!
//! [`MemoryEnsemble`] is a hierarchical node tree shared by any number of
//! [`MemoryClient`] sessions. It follows ZooKeeper semantics where this crate
//! depends on them: parents must exist, ephemeral nodes die with their
//! session, watches are one-shot and are delivered on the watching session's
//! own completion threads.
//!
//! Clients also carry fault injection hooks so the loaders can be driven
//! through transport failures and arbitrary completion orderings.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::bounded;
use crossbeam_channel::unbounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::key::join_key;
use super::key::parent_key;
use super::key::validate_key;
use super::ChildrenCallback;
use super::CoordinationClient;
use super::EventSink;
use super::ValueCallback;
use crate::RawEvent;
use crate::StoreError;
use crate::StoreResult;
use crate::WatchEventKind;
use crate::WatchKind;

type SessionId = u64;
type Job = Box<dyn FnOnce() + Send + 'static>;
type Fired = Vec<(EventSink, RawEvent)>;

struct Znode {
    value: String,
    children: BTreeSet<String>,
    ephemeral_owner: Option<SessionId>,
}

impl Znode {
    fn new(
        value: &str,
        ephemeral_owner: Option<SessionId>,
    ) -> Self {
        Self {
            value: value.to_string(),
            children: BTreeSet::new(),
            ephemeral_owner,
        }
    }
}

struct Tree {
    nodes: HashMap<String, Znode>,
    watches: HashMap<(String, WatchKind), Vec<(SessionId, EventSink)>>,
    next_session: SessionId,
}

impl Tree {
    fn take_watches(
        &mut self,
        path: &str,
        watch: WatchKind,
        kind: WatchEventKind,
        fired: &mut Fired,
    ) {
        if let Some(sinks) = self.watches.remove(&(path.to_string(), watch)) {
            for (_, sink) in sinks {
                fired.push((
                    sink,
                    RawEvent {
                        path: path.to_string(),
                        kind,
                        watch,
                    },
                ));
            }
        }
    }

    fn remove_node(
        &mut self,
        path: &str,
        fired: &mut Fired,
    ) -> StoreResult<()> {
        let parent = parent_key(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        match self.nodes.get(path) {
            None => return Err(StoreError::NodeNotFound(path.to_string())),
            Some(node) if !node.children.is_empty() => {
                return Err(StoreError::NotEmpty(path.to_string()));
            }
            Some(_) => {}
        }
        self.nodes.remove(path);
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.remove(super::key::leaf_name(path));
        }
        self.take_watches(path, WatchKind::Value, WatchEventKind::Deleted, fired);
        self.take_watches(path, WatchKind::Children, WatchEventKind::Deleted, fired);
        self.take_watches(parent, WatchKind::Children, WatchEventKind::ChildrenChanged, fired);
        Ok(())
    }
}

/// Shared node tree. Cloning yields another handle to the same tree.
#[derive(Clone)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Znode::new("", None));
        Self {
            tree: Arc::new(Mutex::new(Tree {
                nodes,
                watches: HashMap::new(),
                next_session: 1,
            })),
        }
    }

    fn open_session(&self) -> SessionId {
        let mut tree = self.tree.lock();
        let id = tree.next_session;
        tree.next_session += 1;
        id
    }

    fn get(
        &self,
        path: &str,
    ) -> StoreResult<String> {
        validate_key(path)?;
        let tree = self.tree.lock();
        tree.nodes
            .get(path)
            .map(|node| node.value.clone())
            .ok_or_else(|| StoreError::NodeNotFound(path.to_string()))
    }

    fn children(
        &self,
        path: &str,
    ) -> StoreResult<Vec<String>> {
        validate_key(path)?;
        let tree = self.tree.lock();
        tree.nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| StoreError::NodeNotFound(path.to_string()))
    }

    fn exists(
        &self,
        path: &str,
    ) -> StoreResult<bool> {
        validate_key(path)?;
        Ok(self.tree.lock().nodes.contains_key(path))
    }

    fn create(
        &self,
        path: &str,
        value: &str,
        owner: Option<SessionId>,
    ) -> StoreResult<Fired> {
        validate_key(path)?;
        let parent = parent_key(path).ok_or_else(|| StoreError::NodeExists(path.to_string()))?;
        let mut tree = self.tree.lock();
        if tree.nodes.contains_key(path) {
            return Err(StoreError::NodeExists(path.to_string()));
        }
        match tree.nodes.get_mut(parent) {
            Some(parent_node) => {
                parent_node.children.insert(super::key::leaf_name(path).to_string());
            }
            None => return Err(StoreError::NodeNotFound(parent.to_string())),
        }
        tree.nodes.insert(path.to_string(), Znode::new(value, owner));

        let mut fired = Vec::new();
        tree.take_watches(path, WatchKind::Value, WatchEventKind::Created, &mut fired);
        tree.take_watches(parent, WatchKind::Children, WatchEventKind::ChildrenChanged, &mut fired);
        Ok(fired)
    }

    fn set(
        &self,
        path: &str,
        value: &str,
    ) -> StoreResult<Fired> {
        validate_key(path)?;
        let mut tree = self.tree.lock();
        match tree.nodes.get_mut(path) {
            Some(node) => node.value = value.to_string(),
            None => return Err(StoreError::NodeNotFound(path.to_string())),
        }
        let mut fired = Vec::new();
        tree.take_watches(path, WatchKind::Value, WatchEventKind::ValueChanged, &mut fired);
        Ok(fired)
    }

    fn delete(
        &self,
        path: &str,
    ) -> StoreResult<Fired> {
        validate_key(path)?;
        let mut fired = Vec::new();
        self.tree.lock().remove_node(path, &mut fired)?;
        Ok(fired)
    }

    fn add_watch(
        &self,
        path: &str,
        kind: WatchKind,
        session: SessionId,
        sink: EventSink,
    ) -> StoreResult<()> {
        validate_key(path)?;
        let mut tree = self.tree.lock();
        if kind == WatchKind::Children && !tree.nodes.contains_key(path) {
            return Err(StoreError::NodeNotFound(path.to_string()));
        }
        tree.watches
            .entry((path.to_string(), kind))
            .or_default()
            .push((session, sink));
        Ok(())
    }

    fn close_session(
        &self,
        session: SessionId,
    ) -> Fired {
        let mut tree = self.tree.lock();
        for sinks in tree.watches.values_mut() {
            sinks.retain(|(owner, _)| *owner != session);
        }
        tree.watches.retain(|_, sinks| !sinks.is_empty());

        let mut owned: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        // Deepest first so parents are empty when their turn comes
        owned.sort_by_key(|path| std::cmp::Reverse(path.len()));

        let mut fired = Vec::new();
        for path in owned {
            if let Err(e) = tree.remove_node(&path, &mut fired) {
                warn!(%path, "failed to drop ephemeral node: {}", e);
            }
        }
        fired
    }

    /// Every key under `base` (inclusive), depth-first. Used for dumps and tests.
    pub fn keys_under(
        &self,
        base: &str,
    ) -> Vec<String> {
        let tree = self.tree.lock();
        let mut out = Vec::new();
        let mut stack = vec![base.to_string()];
        while let Some(path) = stack.pop() {
            if let Some(node) = tree.nodes.get(&path) {
                for child in node.children.iter().rev() {
                    stack.push(join_key(&path, child));
                }
                out.push(path);
            }
        }
        out
    }
}

#[derive(Default)]
struct FaultPlan {
    /// Async reads that are accepted and later complete with `Unavailable`
    async_failures: HashSet<String>,
    /// Async reads rejected at dispatch time
    dispatch_failures: HashSet<String>,
}

/// One session against a [`MemoryEnsemble`].
pub struct MemoryClient {
    ensemble: MemoryEnsemble,
    session: SessionId,
    closed: AtomicBool,
    available: AtomicBool,
    faults: Mutex<FaultPlan>,
    jitter_ms: Arc<AtomicU64>,
    jobs: Sender<Job>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryClient {
    /// Opens a session served by `completion_threads` worker threads.
    pub fn connect(
        ensemble: &MemoryEnsemble,
        completion_threads: usize,
    ) -> Arc<Self> {
        let (jobs, job_rx) = unbounded::<Job>();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let jitter_ms = Arc::new(AtomicU64::new(0));
        let session = ensemble.open_session();

        let workers = (0..completion_threads.max(1))
            .map(|idx| {
                let job_rx = job_rx.clone();
                let shutdown_rx = shutdown_rx.clone();
                let jitter_ms = jitter_ms.clone();
                std::thread::Builder::new()
                    .name(format!("coord-{}-{}", session, idx))
                    .spawn(move || Self::run_worker(job_rx, shutdown_rx, jitter_ms))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("failed to spawn completion worker: {}", e);
                    None
                }
            })
            .collect();

        debug!(session, completion_threads, "coordination session opened");
        Arc::new(Self {
            ensemble: ensemble.clone(),
            session,
            closed: AtomicBool::new(false),
            available: AtomicBool::new(true),
            faults: Mutex::new(FaultPlan::default()),
            jitter_ms,
            jobs,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            workers: Mutex::new(workers),
        })
    }

    fn run_worker(
        job_rx: Receiver<Job>,
        shutdown_rx: Receiver<()>,
        jitter_ms: Arc<AtomicU64>,
    ) {
        loop {
            crossbeam_channel::select! {
                recv(job_rx) -> job => {
                    match job {
                        Ok(job) => {
                            let jitter = jitter_ms.load(Ordering::Relaxed);
                            if jitter > 0 {
                                let pause = rand::thread_rng().gen_range(0..=jitter);
                                std::thread::sleep(Duration::from_millis(pause));
                            }
                            job();
                        }
                        Err(_) => break,
                    }
                }
                recv(shutdown_rx) -> _ => break,
            }
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Simulates a lost connection: every call fails with `Unavailable`.
    pub fn set_available(
        &self,
        available: bool,
    ) {
        self.available.store(available, Ordering::Release);
    }

    /// Async reads of `path` are accepted and complete with `Unavailable` until
    /// the faults are cleared.
    pub fn inject_async_failure(
        &self,
        path: &str,
    ) {
        self.faults.lock().async_failures.insert(path.to_string());
    }

    /// Async reads of `path` are rejected synchronously.
    pub fn inject_dispatch_failure(
        &self,
        path: &str,
    ) {
        self.faults.lock().dispatch_failures.insert(path.to_string());
    }

    pub fn clear_faults(&self) {
        let mut faults = self.faults.lock();
        faults.async_failures.clear();
        faults.dispatch_failures.clear();
    }

    /// Delays each completion by a random pause up to `max`.
    pub fn set_completion_jitter(
        &self,
        max: Duration,
    ) {
        self.jitter_ms.store(max.as_millis() as u64, Ordering::Relaxed);
    }

    fn check(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Unavailable(format!("session {} closed", self.session)));
        }
        if !self.available.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable(format!("session {} disconnected", self.session)));
        }
        Ok(())
    }

    /// Returns whether the async read should complete with an injected failure
    fn check_async(
        &self,
        path: &str,
    ) -> StoreResult<bool> {
        self.check()?;
        validate_key(path)?;
        let faults = self.faults.lock();
        if faults.dispatch_failures.contains(path) {
            return Err(StoreError::Unavailable(format!("dispatch of {} rejected", path)));
        }
        Ok(faults.async_failures.contains(path))
    }

    fn submit(
        &self,
        job: Job,
    ) -> StoreResult<()> {
        self.jobs
            .send(job)
            .map_err(|_| StoreError::Unavailable(format!("session {} has no completion workers", self.session)))
    }

    fn deliver(fired: Fired) {
        for (sink, event) in fired {
            trace!(path = %event.path, kind = ?event.kind, "watch fired");
            sink(event);
        }
    }
}

impl CoordinationClient for MemoryClient {
    fn get(
        &self,
        path: &str,
    ) -> StoreResult<String> {
        self.check()?;
        self.ensemble.get(path)
    }

    fn get_children(
        &self,
        path: &str,
    ) -> StoreResult<Vec<String>> {
        self.check()?;
        self.ensemble.children(path)
    }

    fn get_async(
        &self,
        path: &str,
        done: ValueCallback,
    ) -> StoreResult<()> {
        let inject = self.check_async(path)?;
        let ensemble = self.ensemble.clone();
        let path = path.to_string();
        self.submit(Box::new(move || {
            let result = if inject {
                Err(StoreError::Unavailable(format!("read of {} failed", path)))
            } else {
                ensemble.get(&path)
            };
            done(result);
        }))
    }

    fn get_children_async(
        &self,
        path: &str,
        done: ChildrenCallback,
    ) -> StoreResult<()> {
        let inject = self.check_async(path)?;
        let ensemble = self.ensemble.clone();
        let path = path.to_string();
        self.submit(Box::new(move || {
            let result = if inject {
                Err(StoreError::Unavailable(format!("children read of {} failed", path)))
            } else {
                ensemble.children(&path)
            };
            done(result);
        }))
    }

    fn create(
        &self,
        path: &str,
        value: &str,
        ephemeral: bool,
    ) -> StoreResult<()> {
        self.check()?;
        let owner = ephemeral.then_some(self.session);
        let fired = self.ensemble.create(path, value, owner)?;
        Self::deliver(fired);
        Ok(())
    }

    fn set(
        &self,
        path: &str,
        value: &str,
    ) -> StoreResult<()> {
        self.check()?;
        let fired = self.ensemble.set(path, value)?;
        Self::deliver(fired);
        Ok(())
    }

    fn delete(
        &self,
        path: &str,
    ) -> StoreResult<()> {
        self.check()?;
        let fired = self.ensemble.delete(path)?;
        Self::deliver(fired);
        Ok(())
    }

    fn exists(
        &self,
        path: &str,
    ) -> StoreResult<bool> {
        self.check()?;
        self.ensemble.exists(path)
    }

    fn arm_watch(
        &self,
        path: &str,
        kind: WatchKind,
        sink: EventSink,
    ) -> StoreResult<()> {
        self.check()?;
        let jobs = self.jobs.clone();
        let relay: EventSink = Box::new(move |event| {
            let _ = jobs.send(Box::new(move || sink(event)));
        });
        self.ensemble.add_watch(path, kind, self.session, relay)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let fired = self.ensemble.close_session(self.session);
        Self::deliver(fired);

        drop(self.shutdown_tx.lock().take());
        let current = std::thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        debug!(session = self.session, "coordination session closed");
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.close();
    }
}
