//! Coordination store access.
//!
//! [`ConfigStore`] is the only way the rest of the crate touches the
//! coordination service. [`CoordStore`] implements it over a raw
//! [`CoordinationClient`] session, either owning that session or borrowing one
//! owned elsewhere.

mod adapter;
mod client;
mod key;
mod memory_client;
pub use adapter::*;
pub use client::*;
pub use key::*;
pub use memory_client::*;


#[cfg(test)]
use mockall::automock;

use crate::StoreResult;
use crate::WatchKind;
use crate::Watcher;

#[cfg_attr(test, automock)]
pub trait ConfigStore: Send + Sync {
    fn get(
        &self,
        key: &str,
    ) -> StoreResult<String>;

    /// Never blocks. `Err` means the read was not dispatched and `on_value`
    /// will not run.
    fn get_async(
        &self,
        key: &str,
        on_value: ValueCallback,
    ) -> StoreResult<()>;

    fn get_children(
        &self,
        key: &str,
    ) -> StoreResult<Vec<String>>;

    /// Same dispatch contract as [`ConfigStore::get_async`].
    fn get_children_async(
        &self,
        key: &str,
        on_children: ChildrenCallback,
    ) -> StoreResult<()>;

    fn create(
        &self,
        key: &str,
        value: &str,
        ephemeral: bool,
    ) -> StoreResult<()>;

    /// Creates every missing ancestor, then the leaf. An existing leaf counts
    /// as success.
    fn create_with_parents(
        &self,
        key: &str,
        value: &str,
        ephemeral: bool,
    ) -> StoreResult<()>;

    fn set(
        &self,
        key: &str,
        value: &str,
    ) -> StoreResult<()>;

    fn delete(
        &self,
        key: &str,
    ) -> StoreResult<()>;

    fn exists(
        &self,
        key: &str,
    ) -> bool;

    /// Arms exactly one future notification for `key`.
    fn watch(
        &self,
        key: &str,
        kind: WatchKind,
        watcher: Watcher,
    ) -> StoreResult<()>;

    /// Releases the session if this store owns it.
    fn close(&self);
}
