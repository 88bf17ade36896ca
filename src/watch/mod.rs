//! One-shot watch notifications.
//!
//! The coordination store delivers at most one notification per armed watch.
//! [`WatchDispatcher`] pops the pending watcher for the notified path, reads
//! the current value (or children list) and hands a typed [`WatchEvent`] to the
//! watcher's [`WatchHandler`]. Continued observation is the handler's job: it
//! must call `ConfigStore::watch` again.

mod dispatcher;
pub use dispatcher::*;


use std::fmt;
use std::sync::Weak;

/// Which half of a node a watch observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Created, changed or deleted
    Value,
    /// Child added or removed, or the node deleted
    Children,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Created,
    Deleted,
    ValueChanged,
    ChildrenChanged,
}

/// Notification as delivered by the raw client, before any re-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: String,
    pub kind: WatchEventKind,
    /// The watch that fired
    pub watch: WatchKind,
}

/// Typed notification handed to a [`WatchHandler`].
///
/// `values` holds the current value for `Created`/`ValueChanged`, the current
/// children for `ChildrenChanged`, and nothing for `Deleted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
    pub values: Vec<String>,
}

impl WatchEvent {
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

/// Watched configuration kinds. Each one is routed to its own handler branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    /// Pipeline document
    DataFlow,
    /// Children of the channel base
    ChannelList,
    /// Top-level or metadata node of one routing entity
    ChannelConfig,
    /// Load-score weights
    BalanceConfig,
    /// Children of the ops service base
    OpsServiceList,
    /// One ops service mapping
    OpsServiceValue,
    /// Children of the stream-to base
    StreamToList,
    /// One stream-to cluster
    StreamToValue,
}

impl fmt::Display for ConfigKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            ConfigKind::DataFlow => "dataflow",
            ConfigKind::ChannelList => "channel_list",
            ConfigKind::ChannelConfig => "channel_config",
            ConfigKind::BalanceConfig => "balance_config",
            ConfigKind::OpsServiceList => "ops_service_list",
            ConfigKind::OpsServiceValue => "ops_service_value",
            ConfigKind::StreamToList => "stream_to_list",
            ConfigKind::StreamToValue => "stream_to_value",
        };
        f.write_str(name)
    }
}

pub trait WatchHandler: Send + Sync {
    /// Invoked once per fired watch on a store-owned thread
    fn handle_watch(
        &self,
        tag: ConfigKind,
        event: WatchEvent,
    );
}

/// A watcher waiting for its single notification.
#[derive(Clone)]
pub struct Watcher {
    pub tag: ConfigKind,
    pub context: Weak<dyn WatchHandler>,
}

impl Watcher {
    pub fn new(
        tag: ConfigKind,
        context: Weak<dyn WatchHandler>,
    ) -> Self {
        Self { tag, context }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("tag", &self.tag)
            .field("alive", &(self.context.strong_count() > 0))
            .finish()
    }
}
