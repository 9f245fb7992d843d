//! Write path: fold new readings into the event store.
//!
//! Each record is a read-modify-write against one peer's events. Two readings
//! for the same peer racing through it would both merge against the same
//! snapshot and one update would be lost, so the whole sequence runs under a
//! per-peer lock. Different peers never wait on each other.
//!
//! Retention deletes go through the recorder too. A sweep waits for in-flight
//! records to finish and holds new ones back, so a record never writes an
//! event back after the sweep removed it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::aggregate::{decide, MergeDecision, MergeThreshold};
use crate::config::AggregationConfig;
use crate::error::Result;
use crate::event::{ContactEvent, PeerId, Reading, StoredEvent};
use crate::store::EventStore;

/// Per-peer mutual exclusion.
#[derive(Debug, Default)]
pub struct PeerLocks {
    locks: Mutex<HashMap<PeerId, Arc<Mutex<()>>>>,
}

impl PeerLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `peer`.
    pub async fn acquire(&self, peer: PeerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if let Some(lock) = locks.get(&peer) {
                Arc::clone(lock)
            } else {
                // Identifiers rotate; forget peers nobody is holding.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
                let lock = Arc::new(Mutex::new(()));
                locks.insert(peer, Arc::clone(&lock));
                lock
            }
        };
        lock.lock_owned().await
    }

    /// Number of peers currently tracked.
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Whether no peers are tracked.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// How a record changed the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A new session was stored.
    Created,
    /// An existing session was extended in place.
    Extended,
}

/// Result of recording a reading or batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordOutcome {
    /// Whether a session was created or extended.
    pub kind: RecordKind,

    /// The session as now stored.
    pub event: StoredEvent,
}

/// Records readings into an [`EventStore`], one peer at a time.
pub struct ContactRecorder<S> {
    store: Arc<S>,
    threshold: MergeThreshold,
    dwell_secs: u64,
    locks: PeerLocks,
    sweep_gate: RwLock<()>,
}

impl<S: EventStore> ContactRecorder<S> {
    /// Create a recorder writing to `store`.
    pub fn new(store: Arc<S>, config: &AggregationConfig) -> Self {
        Self {
            store,
            threshold: config.merge_threshold(),
            dwell_secs: config.default_dwell_secs,
            locks: PeerLocks::new(),
            sweep_gate: RwLock::new(()),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The merge threshold in use.
    #[must_use]
    pub const fn threshold(&self) -> MergeThreshold {
        self.threshold
    }

    /// Record a single reading with the default dwell time.
    ///
    /// # Errors
    ///
    /// See [`ContactRecorder::record_event`].
    pub async fn record(&self, reading: Reading) -> Result<RecordOutcome> {
        self.record_event(ContactEvent::from_reading(reading, self.dwell_secs))
            .await
    }

    /// Merge `incoming` into the peer's stored events, or store it as new.
    ///
    /// # Errors
    ///
    /// Returns an error if `incoming` or a stored event is malformed, if the
    /// merge is ambiguous, or if the store fails.
    #[instrument(skip(self, incoming), fields(peer = %incoming.peer_id, samples = incoming.len()))]
    pub async fn record_event(&self, incoming: ContactEvent) -> Result<RecordOutcome> {
        incoming.validate()?;
        let _sweep = self.sweep_gate.read().await;
        let _guard = self.locks.acquire(incoming.peer_id).await;

        let mut stored = self.store.get_all_for_peer(&incoming.peer_id).await?;
        let existing: Vec<ContactEvent> = stored.iter().map(|s| s.event.clone()).collect();

        let outcome = match decide(&incoming, &existing, self.threshold)? {
            MergeDecision::Merge { index, event } => {
                let id = stored.swap_remove(index).id;
                RecordOutcome {
                    kind: RecordKind::Extended,
                    event: StoredEvent { id, event },
                }
            }
            MergeDecision::Insert(event) => RecordOutcome {
                kind: RecordKind::Created,
                event: StoredEvent::new(event),
            },
        };

        self.store.save(outcome.event.clone()).await?;
        info!(
            id = %outcome.event.id,
            kind = ?outcome.kind,
            duration_secs = outcome.event.event.duration,
            "Recorded contact"
        );
        Ok(outcome)
    }

    /// Delete every event whose last sample is before `cutoff_ms`.
    ///
    /// Runs once no record is in flight; records started meanwhile wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let _sweep = self.sweep_gate.write().await;
        self.store.delete_older_than(cutoff_ms).await
    }

    /// Stored events for `peer`, earliest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn events_for_peer(&self, peer: &PeerId) -> Result<Vec<StoredEvent>> {
        let mut events = self.store.get_all_for_peer(peer).await?;
        events.sort_by_key(|stored| stored.event.timestamp);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProximityError;
    use crate::store::testing::GatedStore;
    use crate::store::MemoryEventStore;

    fn peer() -> PeerId {
        "04330a56-ad45-4b0f-81ee-dd414910e1f5".parse().unwrap()
    }

    fn reading(rssi: i16, timestamp: i64) -> Reading {
        Reading {
            peer_id: peer(),
            rssi,
            timestamp,
        }
    }

    fn recorder() -> ContactRecorder<MemoryEventStore> {
        ContactRecorder::new(Arc::new(MemoryEventStore::new()), &AggregationConfig::default())
    }

    #[tokio::test]
    async fn test_first_reading_creates_event_with_dwell_time() {
        let recorder = recorder();
        let outcome = recorder.record(reading(-60, 500)).await.unwrap();

        assert_eq!(outcome.kind, RecordKind::Created);
        assert_eq!(outcome.event.event.duration, 60);
        assert_eq!(outcome.event.event.timestamp, 500);
    }

    #[tokio::test]
    async fn test_nearby_reading_extends_in_place() {
        let recorder = recorder();
        let first = recorder.record(reading(-60, 2000)).await.unwrap();
        let second = recorder.record(reading(-61, 1000)).await.unwrap();

        assert_eq!(second.kind, RecordKind::Extended);
        assert_eq!(second.event.id, first.event.id);
        assert_eq!(second.event.event.rssi_timestamps, vec![1000, 2000]);
        assert_eq!(second.event.event.timestamp, 1000);
        assert_eq!(second.event.event.duration, 1);

        let events = recorder.events_for_peer(&peer()).await.unwrap();
        assert_eq!(events, vec![second.event]);
    }

    #[tokio::test]
    async fn test_distant_reading_starts_second_event() {
        let recorder = recorder();
        recorder.record(reading(-60, 0)).await.unwrap();
        recorder.record(reading(-60, 10_000)).await.unwrap();
        let outcome = recorder.record(reading(-60, 130_000)).await.unwrap();

        assert_eq!(outcome.kind, RecordKind::Created);
        let events = recorder.events_for_peer(&peer()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.rssi_timestamps, vec![0, 10_000]);
        assert_eq!(events[1].event.rssi_timestamps, vec![130_000]);
    }

    #[tokio::test]
    async fn test_invalid_batch_is_rejected_before_touching_store() {
        let recorder = recorder();
        let bad = ContactEvent {
            peer_id: peer(),
            rssi_values: vec![1, 2],
            rssi_timestamps: vec![1000],
            duration: 0,
            timestamp: 1000,
        };

        let err = recorder.record_event(bad).await.unwrap_err();
        assert!(matches!(err, ProximityError::InvalidEvent(_)));
        assert!(recorder.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_readings_for_one_peer_are_not_lost() {
        let recorder = Arc::new(recorder());
        let mut handles = Vec::new();
        for i in 0..50_i64 {
            let recorder = Arc::clone(&recorder);
            handles.push(tokio::spawn(async move {
                recorder.record(reading(-50, 1000 + i * 1000)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let events = recorder.events_for_peer(&peer()).await.unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0].event;
        assert_eq!(event.len(), 50);
        assert_eq!(event.timestamp, 1000);
        assert_eq!(event.duration, 49);
        assert!(event.validate().is_ok());
    }

    #[tokio::test]
    async fn test_sweep_waits_for_in_flight_record() {
        let store = Arc::new(GatedStore::new(peer()));
        store
            .inner
            .save(StoredEvent::new(ContactEvent::from_reading(reading(-70, 1000), 60)))
            .await
            .unwrap();
        let recorder = Arc::new(ContactRecorder::new(
            Arc::clone(&store),
            &AggregationConfig::default(),
        ));

        let record = tokio::spawn({
            let recorder = Arc::clone(&recorder);
            async move { recorder.record(reading(-70, 2000)).await }
        });
        // Wait until the record holds the gate and is parked on the store read.
        while recorder.sweep_gate.try_write().is_ok() {
            tokio::task::yield_now().await;
        }
        let sweep = tokio::spawn({
            let recorder = Arc::clone(&recorder);
            async move { recorder.delete_older_than(10_000).await }
        });
        tokio::task::yield_now().await;
        assert!(!sweep.is_finished());

        store.open(1);
        assert_eq!(record.await.unwrap().unwrap().kind, RecordKind::Extended);
        assert_eq!(sweep.await.unwrap().unwrap(), 1);
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_peer_locks_forget_idle_peers() {
        let locks = PeerLocks::new();
        drop(locks.acquire(PeerId::from_bytes([1; 16])).await);
        drop(locks.acquire(PeerId::from_bytes([2; 16])).await);
        assert_eq!(locks.len().await, 1);

        let _held = locks.acquire(PeerId::from_bytes([3; 16])).await;
        let _also = locks.acquire(PeerId::from_bytes([4; 16])).await;
        assert_eq!(locks.len().await, 2);
    }
}
