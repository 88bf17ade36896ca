use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ancestor_keys;
use super::validate_key;
use super::ChildrenCallback;
use super::ConfigStore;
use super::CoordinationClient;
use super::ValueCallback;
use crate::StoreError;
use crate::StoreResult;
use crate::WatchDispatcher;
use crate::WatchKind;
use crate::Watcher;

/// [`ConfigStore`] over a raw client session.
pub struct CoordStore {
    client: Arc<dyn CoordinationClient>,
    dispatcher: Arc<WatchDispatcher>,
    /// Close the session on `close()`
    owns_client: bool,
}

impl CoordStore {
    /// Takes ownership of `client`; `close()` ends the session.
    pub fn direct(client: Arc<dyn CoordinationClient>) -> Self {
        Self::with_ownership(client, true)
    }

    /// Wraps a session owned elsewhere; `close()` leaves it open.
    pub fn shared(client: Arc<dyn CoordinationClient>) -> Self {
        Self::with_ownership(client, false)
    }

    fn with_ownership(
        client: Arc<dyn CoordinationClient>,
        owns_client: bool,
    ) -> Self {
        Self {
            dispatcher: WatchDispatcher::new(client.clone()),
            client,
            owns_client,
        }
    }

    pub fn owns_client(&self) -> bool {
        self.owns_client
    }

    pub fn dispatcher(&self) -> &Arc<WatchDispatcher> {
        &self.dispatcher
    }

    pub fn has_pending_watch(
        &self,
        key: &str,
        kind: WatchKind,
    ) -> bool {
        self.dispatcher.is_pending(key, kind)
    }
}

impl ConfigStore for CoordStore {
    fn get(
        &self,
        key: &str,
    ) -> StoreResult<String> {
        self.client.get(key)
    }

    fn get_async(
        &self,
        key: &str,
        on_value: ValueCallback,
    ) -> StoreResult<()> {
        self.client.get_async(key, on_value)
    }

    fn get_children(
        &self,
        key: &str,
    ) -> StoreResult<Vec<String>> {
        self.client.get_children(key)
    }

    fn get_children_async(
        &self,
        key: &str,
        on_children: ChildrenCallback,
    ) -> StoreResult<()> {
        self.client.get_children_async(key, on_children)
    }

    fn create(
        &self,
        key: &str,
        value: &str,
        ephemeral: bool,
    ) -> StoreResult<()> {
        self.client.create(key, value, ephemeral)?;
        info!(key, value, ephemeral, "node created");
        Ok(())
    }

    fn create_with_parents(
        &self,
        key: &str,
        value: &str,
        ephemeral: bool,
    ) -> StoreResult<()> {
        validate_key(key)?;
        for ancestor in ancestor_keys(key) {
            match self.client.create(&ancestor, "", false) {
                Ok(()) => debug!(key = %ancestor, "ancestor created"),
                Err(StoreError::NodeExists(_)) => {}
                Err(e) => {
                    warn!(key = %ancestor, "failed to create ancestor: {}", e);
                    return Err(e);
                }
            }
        }
        match self.client.create(key, value, ephemeral) {
            Ok(()) => {
                info!(key, value, ephemeral, "node created");
                Ok(())
            }
            Err(StoreError::NodeExists(_)) => {
                debug!(key, "node already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn set(
        &self,
        key: &str,
        value: &str,
    ) -> StoreResult<()> {
        self.client.set(key, value)?;
        info!(key, value, "node updated");
        Ok(())
    }

    fn delete(
        &self,
        key: &str,
    ) -> StoreResult<()> {
        self.client.delete(key)?;
        debug!(key, "node deleted");
        Ok(())
    }

    fn exists(
        &self,
        key: &str,
    ) -> bool {
        match self.client.exists(key) {
            Ok(found) => found,
            Err(e) => {
                debug!(key, "exists check failed: {}", e);
                false
            }
        }
    }

    fn watch(
        &self,
        key: &str,
        kind: WatchKind,
        watcher: Watcher,
    ) -> StoreResult<()> {
        self.dispatcher.arm(key, kind, watcher)
    }

    fn close(&self) {
        self.dispatcher.clear();
        if self.owns_client {
            self.client.close();
        } else {
            debug!("shared coordination session left open");
        }
    }
}
