use crate::RawEvent;
use crate::StoreResult;
use crate::WatchKind;

/// Completion of an async value read
pub type ValueCallback = Box<dyn FnOnce(StoreResult<String>) + Send + 'static>;

/// Completion of an async children read
pub type ChildrenCallback = Box<dyn FnOnce(StoreResult<Vec<String>>) + Send + 'static>;

/// Receiver of one native watch notification
pub type EventSink = Box<dyn FnOnce(RawEvent) + Send + 'static>;

/// Native session with a hierarchical coordination service.
///
/// This is the seam a ZooKeeper binding plugs into. Async reads and watch
/// notifications complete on threads owned by the client. A `*_async` call
/// that returns `Err` never invokes its callback.
pub trait CoordinationClient: Send + Sync {
    fn get(
        &self,
        path: &str,
    ) -> StoreResult<String>;

    fn get_children(
        &self,
        path: &str,
    ) -> StoreResult<Vec<String>>;

    fn get_async(
        &self,
        path: &str,
        done: ValueCallback,
    ) -> StoreResult<()>;

    fn get_children_async(
        &self,
        path: &str,
        done: ChildrenCallback,
    ) -> StoreResult<()>;

    /// Fails with `NodeNotFound` when the parent is missing and with
    /// `NodeExists` when the node is already there.
    fn create(
        &self,
        path: &str,
        value: &str,
        ephemeral: bool,
    ) -> StoreResult<()>;

    fn set(
        &self,
        path: &str,
        value: &str,
    ) -> StoreResult<()>;

    fn delete(
        &self,
        path: &str,
    ) -> StoreResult<()>;

    fn exists(
        &self,
        path: &str,
    ) -> StoreResult<bool>;

    /// Arms one native notification. A value watch may be armed on a missing
    /// node; a children watch requires the node to exist.
    fn arm_watch(
        &self,
        path: &str,
        kind: WatchKind,
        sink: EventSink,
    ) -> StoreResult<()>;

    /// Ends the session. Ephemeral nodes owned by it disappear.
    fn close(&self);
}
