//! All-or-nothing scatter/gather loading of routing entities.
//!
//! A load issues three async reads (metadata, channel list, filter list).
//! Each list answer fans out one more read per child. Reads complete in any
//! order on store threads; the [`GatherTracker`] decides when the last one has
//! answered. The assembled record is published only when every read
//! succeeded, otherwise it is discarded and the entity watches stay armed.
//!
//! Each entity is watched on two nodes: its top-level key, which writers
//! touch after editing members or filters, and its `metadata` node.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Channel;
use super::ChannelRecord;
use super::ChannelRegistry;
use super::GatherTracker;
use super::GatherVerdict;
use super::Metadata;
use super::PartialRecord;
use super::StreamFilter;
use crate::constants::CHANNEL_NODE;
use crate::constants::FILTER_NODE;
use crate::constants::METADATA_NODE;
use crate::metrics::GATHER_LATENCY_METRIC;
use crate::metrics::GATHER_OUTCOME_METRIC;
use crate::store::join_key;
use crate::store::ConfigStore;
use crate::ConfigKind;
use crate::Error;
use crate::Result;
use crate::StoreResult;
use crate::WatchHandler;
use crate::WatchKind;
use crate::Watcher;

/// Reads issued up front: metadata, channel list, filter list
const TOP_LEVEL_READS: usize = 3;

#[derive(Debug, Clone)]
pub enum GatherOutcome {
    Published(Arc<ChannelRecord>),
    /// Every read succeeded but a newer load or a removal got there first
    Superseded,
    Discarded { reason: String },
}

#[derive(Debug, Clone)]
pub struct GatherReport {
    pub channel_id: u32,
    pub revision: u64,
    /// Reads that were dispatched
    pub requests: usize,
    /// Reads that answered before the verdict
    pub responses: usize,
    pub outcome: GatherOutcome,
}

impl GatherReport {
    pub fn into_record(self) -> Result<Arc<ChannelRecord>> {
        match self.outcome {
            GatherOutcome::Published(record) => Ok(record),
            GatherOutcome::Superseded => Err(Error::PartialGather {
                channel_id: self.channel_id,
                reason: format!("revision {} superseded", self.revision),
            }),
            GatherOutcome::Discarded { reason } => Err(Error::PartialGather {
                channel_id: self.channel_id,
                reason,
            }),
        }
    }
}

/// Handle to one in-flight load. Dropping it does not cancel the load.
#[derive(Debug)]
pub struct GatherTicket {
    channel_id: u32,
    revision: u64,
    outcome: Receiver<GatherReport>,
}

impl GatherTicket {
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn wait(
        self,
        timeout: Duration,
    ) -> Result<GatherReport> {
        match self.outcome.recv_timeout(timeout) {
            Ok(report) => Ok(report),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Err(Error::GatherTimeout {
                channel_id: self.channel_id,
                waited: timeout,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Channels,
    Filters,
}

impl Section {
    fn node(self) -> &'static str {
        match self {
            Section::Channels => CHANNEL_NODE,
            Section::Filters => FILTER_NODE,
        }
    }
}

pub struct ChannelLoader {
    store: Arc<dyn ConfigStore>,
    registry: Arc<ChannelRegistry>,
    base: String,
    /// Receives the entity watches armed by this loader
    context: Weak<dyn WatchHandler>,
}

impl ChannelLoader {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        registry: Arc<ChannelRegistry>,
        base: impl Into<String>,
        context: Weak<dyn WatchHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            base: base.into(),
            context,
        })
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn entity_key(
        &self,
        channel_id: u32,
    ) -> String {
        join_key(&self.base, &channel_id.to_string())
    }

    pub fn metadata_key(
        &self,
        channel_id: u32,
    ) -> String {
        join_key(&self.entity_key(channel_id), METADATA_NODE)
    }

    /// Channel id of a key at or below the channel base
    pub fn channel_id_for_key(
        &self,
        key: &str,
    ) -> Option<u32> {
        let rest = key.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        rest.split('/').next()?.parse().ok()
    }

    /// Starts loading `channel_id`. Never fails: a load that cannot even be
    /// dispatched settles as discarded right away.
    pub fn load(
        self: &Arc<Self>,
        channel_id: u32,
    ) -> GatherTicket {
        let revision = self.registry.next_revision();
        let (outcome_tx, outcome_rx) = bounded(1);
        let entity_key = self.entity_key(channel_id);
        let metadata_key = join_key(&entity_key, METADATA_NODE);
        let gather = Arc::new(Gather {
            loader: self.clone(),
            channel_id,
            revision,
            entity_key: entity_key.clone(),
            tracker: GatherTracker::new(TOP_LEVEL_READS),
            parts: Mutex::new(PartialRecord::default()),
            started: Instant::now(),
            outcome: outcome_tx,
        });
        let ticket = GatherTicket {
            channel_id,
            revision,
            outcome: outcome_rx,
        };
        debug!(channel_id, revision, "loading channel");

        self.arm_entity_watches(channel_id);

        let g = gather.clone();
        if let Err(e) = self.store.get_async(&metadata_key, Box::new(move |result| g.on_metadata(result))) {
            gather.abort(TOP_LEVEL_READS, format!("metadata read not dispatched: {}", e));
            return ticket;
        }
        for (idx, section) in [Section::Channels, Section::Filters].into_iter().enumerate() {
            let key = join_key(&entity_key, section.node());
            let g = gather.clone();
            if let Err(e) = self
                .store
                .get_children_async(&key, Box::new(move |result| g.on_child_list(section, result)))
            {
                gather.abort(TOP_LEVEL_READS - 1 - idx, format!("{} list not dispatched: {}", section.node(), e));
                return ticket;
            }
        }
        ticket
    }

    /// Arms the entity's watches without loading it
    pub fn watch_entity(
        &self,
        channel_id: u32,
    ) {
        self.arm_entity_watches(channel_id);
    }

    fn arm_entity_watches(
        &self,
        channel_id: u32,
    ) {
        for key in [self.entity_key(channel_id), self.metadata_key(channel_id)] {
            let watcher = Watcher::new(ConfigKind::ChannelConfig, self.context.clone());
            if let Err(e) = self.store.watch(&key, WatchKind::Value, watcher) {
                warn!(key = %key, "failed to arm channel watch: {}", e);
            }
        }
    }
}

/// State of one load attempt, shared by its read callbacks.
struct Gather {
    loader: Arc<ChannelLoader>,
    channel_id: u32,
    revision: u64,
    entity_key: String,
    tracker: GatherTracker,
    parts: Mutex<PartialRecord>,
    started: Instant,
    outcome: Sender<GatherReport>,
}

impl Gather {
    fn on_metadata(
        &self,
        result: StoreResult<String>,
    ) {
        let parsed = result
            .map_err(|e| e.to_string())
            .and_then(|raw| Metadata::parse(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(metadata) => self.parts.lock().metadata = Some(metadata),
            Err(reason) => self.fail(format!("metadata: {}", reason)),
        }
        self.complete_one();
    }

    fn on_child_list(
        self: &Arc<Self>,
        section: Section,
        result: StoreResult<Vec<String>>,
    ) {
        match result {
            Ok(children) => {
                if children.is_empty() && section == Section::Channels {
                    self.fail("channel list is empty");
                }
                // Fan-out is counted before this list's own response
                self.tracker.add_requests(children.len());
                let list_key = join_key(&self.entity_key, section.node());
                for child in children {
                    let key = join_key(&list_key, &child);
                    let g = self.clone();
                    let node = child.clone();
                    let dispatched = self
                        .loader
                        .store
                        .get_async(&key, Box::new(move |result| g.on_member(section, &node, result)));
                    if let Err(e) = dispatched {
                        self.tracker.withdraw_requests(1);
                        self.fail(format!("{} read not dispatched: {}", key, e));
                    }
                }
            }
            Err(e) => self.fail(format!("{} list: {}", section.node(), e)),
        }
        self.complete_one();
    }

    fn on_member(
        &self,
        section: Section,
        node: &str,
        result: StoreResult<String>,
    ) {
        let parsed = match (section, result) {
            (_, Err(e)) => Err(e.to_string()),
            (Section::Channels, Ok(raw)) => Channel::parse(node, &raw)
                .map(|channel| {
                    self.parts.lock().channels.insert(node.to_string(), channel);
                })
                .map_err(|e| e.to_string()),
            (Section::Filters, Ok(raw)) => StreamFilter::parse(&raw)
                .and_then(|filter| self.parts.lock().add_filter(filter))
                .map_err(|e| e.to_string()),
        };
        if let Err(reason) = parsed {
            self.fail(format!("{}/{}: {}", section.node(), node, reason));
        }
        self.complete_one();
    }

    fn fail(
        &self,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        debug!(channel_id = self.channel_id, revision = self.revision, %reason, "channel sub-fetch failed");
        self.tracker.mark_failed(reason);
    }

    /// Called when a top-level read could not be dispatched. `undispatched`
    /// counts the failed read and every one after it.
    fn abort(
        &self,
        undispatched: usize,
        reason: String,
    ) {
        self.tracker.withdraw_requests(undispatched);
        self.fail(reason);
        if let Some(verdict) = self.tracker.abandon() {
            self.settle(verdict);
        }
    }

    fn complete_one(&self) {
        if let Some(verdict) = self.tracker.record_response() {
            self.settle(verdict);
        }
    }

    fn settle(
        &self,
        verdict: GatherVerdict,
    ) {
        let parts = std::mem::take(&mut *self.parts.lock());
        let verdict = match verdict {
            GatherVerdict::Complete => match parts.finish(self.channel_id, self.revision) {
                Ok(record) => Ok(record),
                Err(e) => Err(e.to_string()),
            },
            GatherVerdict::Failed(reason) => Err(reason),
        };

        let outcome = match verdict {
            Ok(record) => match self.loader.registry.publish(record) {
                Some(record) => GatherOutcome::Published(record),
                None => GatherOutcome::Superseded,
            },
            Err(reason) => {
                warn!(
                    channel_id = self.channel_id,
                    revision = self.revision,
                    %reason,
                    "channel load discarded, previous record stays active"
                );
                self.loader.arm_entity_watches(self.channel_id);
                GatherOutcome::Discarded { reason }
            }
        };

        let label = match &outcome {
            GatherOutcome::Published(_) => "published",
            GatherOutcome::Superseded => "superseded",
            GatherOutcome::Discarded { .. } => "discarded",
        };
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        GATHER_OUTCOME_METRIC.with_label_values(&[label]).inc();
        GATHER_LATENCY_METRIC.with_label_values(&[label]).observe(elapsed_ms);

        let (requests, responses) = self.tracker.counts();
        if let GatherOutcome::Published(record) = &outcome {
            info!(
                channel_id = self.channel_id,
                revision = self.revision,
                channels = record.channels.len(),
                filters = record.filters.len(),
                "channel load complete"
            );
        }
        let _ = self.outcome.send(GatherReport {
            channel_id: self.channel_id,
            revision: self.revision,
            requests,
            responses,
            outcome,
        });
    }
}
