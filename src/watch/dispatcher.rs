use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::ConfigKind;
use super::RawEvent;
use super::WatchEvent;
use super::WatchEventKind;
use super::WatchHandler;
use super::WatchKind;
use super::Watcher;
use crate::metrics::WATCH_EVENTS_METRIC;
use crate::store::validate_key;
use crate::store::CoordinationClient;
use crate::store::EventSink;
use crate::StoreResult;

/// First pause before a failed re-read is delivered again
const REREAD_BACKOFF: Duration = Duration::from_millis(50);
const MAX_REREAD_BACKOFF: Duration = Duration::from_secs(5);

struct PendingWatch {
    tag: ConfigKind,
    context: Weak<dyn WatchHandler>,
}

/// Registry of armed one-shot watches keyed by path and watch kind.
///
/// A slot is consumed by the first notification for it. Re-arming a slot that
/// is still pending replaces its watcher without arming the native watch
/// again, so at most one native notification is outstanding per slot. A slot
/// whose re-read failed stays pending and is redelivered with backoff.
pub struct WatchDispatcher {
    client: Arc<dyn CoordinationClient>,
    pending: DashMap<(String, WatchKind), PendingWatch>,
}

impl WatchDispatcher {
    pub fn new(client: Arc<dyn CoordinationClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            pending: DashMap::new(),
        })
    }

    pub fn arm(
        self: &Arc<Self>,
        key: &str,
        kind: WatchKind,
        watcher: Watcher,
    ) -> StoreResult<()> {
        validate_key(key)?;
        let slot = (key.to_string(), kind);
        let previous = self.pending.insert(
            slot.clone(),
            PendingWatch {
                tag: watcher.tag,
                context: watcher.context,
            },
        );
        if previous.is_some() {
            trace!(key, ?kind, tag = %watcher.tag, "pending watcher replaced");
            return Ok(());
        }

        let dispatcher = Arc::downgrade(self);
        let sink: EventSink = Box::new(move |event| {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.dispatch(event);
            }
        });
        if let Err(e) = self.client.arm_watch(key, kind, sink) {
            self.pending.remove(&slot);
            warn!(key, ?kind, "failed to arm watch: {}", e);
            return Err(e);
        }
        trace!(key, ?kind, tag = %watcher.tag, "watch armed");
        Ok(())
    }

    pub fn is_pending(
        &self,
        key: &str,
        kind: WatchKind,
    ) -> bool {
        self.pending.contains_key(&(key.to_string(), kind))
    }

    pub fn pending_tag(
        &self,
        key: &str,
        kind: WatchKind,
    ) -> Option<ConfigKind> {
        self.pending.get(&(key.to_string(), kind)).map(|entry| entry.tag)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Forgets every pending watcher. Native notifications still in flight
    /// find no watcher and are dropped.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Routes one raw notification to the watcher that was waiting for it.
    pub fn dispatch(
        self: &Arc<Self>,
        raw: RawEvent,
    ) {
        self.deliver(raw, 0);
    }

    fn deliver(
        self: &Arc<Self>,
        raw: RawEvent,
        attempt: u32,
    ) {
        let slot = (raw.path.clone(), raw.watch);
        let Some((_, pending)) = self.pending.remove(&slot) else {
            warn!(path = %raw.path, kind = ?raw.kind, "no watcher registered, event dropped");
            WATCH_EVENTS_METRIC.with_label_values(&["unclaimed"]).inc();
            return;
        };
        let Some(handler) = pending.context.upgrade() else {
            debug!(path = %raw.path, tag = %pending.tag, "watch context gone, event dropped");
            WATCH_EVENTS_METRIC.with_label_values(&["orphaned"]).inc();
            return;
        };
        let event = match self.resolve(&raw) {
            Ok(event) => event,
            Err(e) => {
                // The native watch is spent; the slot stays claimed until a
                // re-read succeeds or the store is closed.
                warn!(path = %raw.path, kind = ?raw.kind, attempt, "re-read after watch failed, will retry: {}", e);
                WATCH_EVENTS_METRIC.with_label_values(&["read_failed"]).inc();
                self.pending.entry(slot).or_insert(pending);
                self.schedule_redelivery(raw, attempt + 1);
                return;
            }
        };

        debug!(path = %event.path, kind = ?event.kind, tag = %pending.tag, "dispatching watch event");
        WATCH_EVENTS_METRIC.with_label_values(&["dispatched"]).inc();
        handler.handle_watch(pending.tag, event);
    }

    fn schedule_redelivery(
        self: &Arc<Self>,
        raw: RawEvent,
        attempt: u32,
    ) {
        let pause = REREAD_BACKOFF
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(7))
            .min(MAX_REREAD_BACKOFF);
        let dispatcher = Arc::downgrade(self);
        let slot = (raw.path.clone(), raw.watch);
        let spawned = std::thread::Builder::new()
            .name("watch-reread".to_string())
            .spawn(move || {
                std::thread::sleep(pause);
                if let Some(dispatcher) = dispatcher.upgrade() {
                    dispatcher.deliver(raw, attempt);
                }
            });
        if let Err(e) = spawned {
            warn!(path = %slot.0, "cannot schedule re-read, watcher dropped: {}", e);
            self.pending.remove(&slot);
        }
    }

    /// Reads the state the notification refers to. A node that vanished in
    /// between turns the event into `Deleted`.
    fn resolve(
        &self,
        raw: &RawEvent,
    ) -> StoreResult<WatchEvent> {
        let deleted = |path: &str| WatchEvent {
            path: path.to_string(),
            kind: WatchEventKind::Deleted,
            values: Vec::new(),
        };
        let read = match raw.kind {
            WatchEventKind::Deleted => return Ok(deleted(&raw.path)),
            WatchEventKind::Created | WatchEventKind::ValueChanged => {
                self.client.get(&raw.path).map(|value| vec![value])
            }
            WatchEventKind::ChildrenChanged => self.client.get_children(&raw.path),
        };
        match read {
            Ok(values) => Ok(WatchEvent {
                path: raw.path.clone(),
                kind: raw.kind,
                values,
            }),
            Err(e) if e.is_not_found() => Ok(deleted(&raw.path)),
            Err(e) => Err(e),
        }
    }
}
