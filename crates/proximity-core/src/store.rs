//! Event store contract.
//!
//! The aggregator never touches storage directly; the write path and the
//! retention sweeper talk to an [`EventStore`] handed to them explicitly.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::event::{PeerId, StoredEvent};

/// Durable keyed collection of contact events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// All stored events for a peer, in no particular order.
    async fn get_all_for_peer(&self, peer: &PeerId) -> Result<Vec<StoredEvent>>;

    /// Insert `event`, or replace the stored event with the same id.
    async fn save(&self, event: StoredEvent) -> Result<()>;

    /// Delete every event whose last sample is strictly before `cutoff_ms`.
    ///
    /// Returns how many events were removed.
    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize>;
}

/// Upsert `event` into a peer's event list by id.
pub(crate) fn upsert(events: &mut Vec<StoredEvent>, event: StoredEvent) {
    match events.iter_mut().find(|stored| stored.id == event.id) {
        Some(stored) => *stored = event,
        None => events.push(event),
    }
}

/// Drop events that ended before `cutoff_ms`, returning how many went.
pub(crate) fn retain_recent(events: &mut Vec<StoredEvent>, cutoff_ms: i64) -> usize {
    let before = events.len();
    events.retain(|stored| stored.event.end() >= cutoff_ms);
    before - events.len()
}

/// In-process event store.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<PeerId, Vec<StoredEvent>>>,
}

impl MemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all peers.
    pub async fn len(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    /// Whether the store holds no events.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get_all_for_peer(&self, peer: &PeerId) -> Result<Vec<StoredEvent>> {
        Ok(self
            .events
            .read()
            .await
            .get(peer)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, event: StoredEvent) -> Result<()> {
        let mut events = self.events.write().await;
        upsert(events.entry(event.event.peer_id).or_default(), event);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let mut events = self.events.write().await;
        let removed = events
            .values_mut()
            .map(|list| retain_recent(list, cutoff_ms))
            .sum();
        events.retain(|_, list| !list.is_empty());
        Ok(removed)
    }
}

/// Test doubles shared by the write-path tests.
#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::{EventStore, MemoryEventStore};
    use crate::error::Result;
    use crate::event::{PeerId, StoredEvent};

    /// Memory store whose reads for one peer wait for [`GatedStore::open`].
    #[derive(Debug)]
    pub(crate) struct GatedStore {
        pub(crate) inner: MemoryEventStore,
        gated: PeerId,
        gate: Semaphore,
    }

    impl GatedStore {
        pub(crate) fn new(gated: PeerId) -> Self {
            Self {
                inner: MemoryEventStore::new(),
                gated,
                gate: Semaphore::new(0),
            }
        }

        /// Let `reads` more reads of the gated peer through.
        pub(crate) fn open(&self, reads: usize) {
            self.gate.add_permits(reads);
        }
    }

    #[async_trait]
    impl EventStore for GatedStore {
        async fn get_all_for_peer(&self, peer: &PeerId) -> Result<Vec<StoredEvent>> {
            if *peer == self.gated {
                if let Ok(permit) = self.gate.acquire().await {
                    permit.forget();
                }
            }
            self.inner.get_all_for_peer(peer).await
        }

        async fn save(&self, event: StoredEvent) -> Result<()> {
            self.inner.save(event).await
        }

        async fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
            self.inner.delete_older_than(cutoff_ms).await
        }
    }
}
