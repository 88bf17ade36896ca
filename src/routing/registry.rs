use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use autometrics::autometrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use tracing::info;

use super::ChannelRecord;
use crate::API_SLO;

/// Published routing entities keyed by channel id.
///
/// Every load attempt and every removal draws a revision from one counter. A
/// record is only accepted when its revision is newer than both the record it
/// replaces and the last removal of its id, so a slow gather can never
/// overwrite a newer result or resurrect a deleted entity.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    records: DashMap<u32, Arc<ChannelRecord>>,
    removed_at: DashMap<u32, u64>,
    revision: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the record when it became the current one for its id.
    #[autometrics(objective = API_SLO)]
    pub fn publish(
        &self,
        record: ChannelRecord,
    ) -> Option<Arc<ChannelRecord>> {
        let id = record.channel_id;
        let revision = record.revision;
        if let Some(removed) = self.removed_at.get(&id) {
            if *removed > revision {
                debug!(channel_id = id, revision, removed = *removed, "record older than removal, dropped");
                return None;
            }
        }
        let record = Arc::new(record);
        match self.records.entry(id) {
            Entry::Occupied(mut current) => {
                if current.get().revision >= revision {
                    debug!(
                        channel_id = id,
                        revision,
                        current = current.get().revision,
                        "stale record dropped"
                    );
                    return None;
                }
                current.insert(record.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        info!(channel_id = id, revision, "channel record published");
        Some(record)
    }

    pub fn remove(
        &self,
        id: u32,
    ) -> Option<Arc<ChannelRecord>> {
        let revision = self.next_revision();
        self.removed_at.insert(id, revision);
        let removed = self.records.remove(&id).map(|(_, record)| record);
        if removed.is_some() {
            info!(channel_id = id, "channel record removed");
        }
        removed
    }

    pub fn get(
        &self,
        id: u32,
    ) -> Option<Arc<ChannelRecord>> {
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(
        &self,
        id: u32,
    ) -> bool {
        self.records.contains_key(&id)
    }

    /// Published ids in ascending order
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.records.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
