//! Retention sweeper.
//!
//! Deletes contact events that ended more than the retention window ago.
//! Deletes run through [`ContactRecorder::delete_older_than`] so they never
//! interleave with a record for the same events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::recorder::ContactRecorder;
use crate::store::EventStore;

/// Periodically removes expired events from a recorder's store.
pub struct RetentionSweeper<S> {
    recorder: Arc<ContactRecorder<S>>,
    window: chrono::Duration,
    interval: Duration,
}

impl<S: EventStore + 'static> RetentionSweeper<S> {
    /// Create a sweeper deleting through `recorder`.
    pub fn new(recorder: Arc<ContactRecorder<S>>, config: &RetentionConfig) -> Self {
        Self {
            recorder,
            window: config.window(),
            interval: config.sweep_interval(),
        }
    }

    /// Cutoff for a sweep run at `now`: events ending before it are expired.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    /// Delete everything that expired as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = self.cutoff(now);
        let removed = self
            .recorder
            .delete_older_than(cutoff.timestamp_millis())
            .await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff.to_rfc3339(), "Deleted expired contact events");
        }
        Ok(removed)
    }

    /// Sweep on a fixed interval until `shutdown` flips to `true`.
    ///
    /// Failed sweeps are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_at(Utc::now()).await {
                        warn!(error = %err, "Retention sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Spawn [`RetentionSweeper::run`] on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationConfig;
    use crate::event::{ContactEvent, PeerId, StoredEvent};
    use crate::store::MemoryEventStore;
    use chrono::TimeZone;

    fn stored(ts: &[i64]) -> StoredEvent {
        StoredEvent::new(
            ContactEvent::new(PeerId::from_bytes([5; 16]), vec![-80; ts.len()], ts.to_vec(), 60)
                .unwrap(),
        )
    }

    fn recorder(store: &Arc<MemoryEventStore>) -> Arc<ContactRecorder<MemoryEventStore>> {
        Arc::new(ContactRecorder::new(
            Arc::clone(store),
            &AggregationConfig::default(),
        ))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 29, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_events() {
        let store = Arc::new(MemoryEventStore::new());
        let config = RetentionConfig::default();
        let sweeper = RetentionSweeper::new(recorder(&store), &config);
        let cutoff = sweeper.cutoff(now()).timestamp_millis();

        store.save(stored(&[cutoff - 10_000, cutoff - 1])).await.unwrap();
        store.save(stored(&[cutoff - 10_000, cutoff])).await.unwrap();
        store.save(stored(&[cutoff + 5_000])).await.unwrap();

        assert_eq!(sweeper.sweep_at(now()).await.unwrap(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[test]
    fn test_cutoff_is_window_before_now() {
        let store = Arc::new(MemoryEventStore::new());
        let config = RetentionConfig {
            days: 14,
            ..RetentionConfig::default()
        };
        let sweeper = RetentionSweeper::new(recorder(&store), &config);
        assert_eq!(
            sweeper.cutoff(now()),
            Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryEventStore::new());
        let sweeper = RetentionSweeper::new(recorder(&store), &RetentionConfig::default());
        let (tx, rx) = watch::channel(false);
        let handle = sweeper.spawn(rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
