//! Per-peer serialized ingest queue.
//!
//! Readings arrive from the radio layer in bursts and in no particular order.
//! [`IngestQueue`] hands them to a dispatcher task that fans them out to one
//! worker per peer; each worker records its peer's readings strictly one
//! after another, in submission order.
//!
//! The number of readings accepted but not yet recorded is capped by
//! [`IngestConfig::queue_capacity`]. Submitters wait for a free slot; the
//! dispatcher itself never waits, so a busy peer does not hold up the rest.
//!
//! Workers shut down after [`IngestConfig::peer_idle_timeout`] without
//! readings. A reading that races a worker's shutdown goes to a fresh worker,
//! which starts only once the old one has recorded its backlog.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::error::{ProximityError, Result};
use crate::event::{PeerId, Reading};
use crate::recorder::ContactRecorder;
use crate::store::EventStore;

/// A reading holding one slot of the in-flight budget until recorded.
#[derive(Debug)]
struct Queued {
    reading: Reading,
    _slot: OwnedSemaphorePermit,
}

/// Handle for submitting readings. Cheap to clone.
///
/// Once every handle is dropped the dispatcher drains all queues and exits.
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<Queued>,
    slots: Arc<Semaphore>,
}

impl IngestQueue {
    /// Start the dispatcher on the current runtime.
    ///
    /// The returned handle completes after every submitted reading has been
    /// recorded and all handles are gone.
    pub fn spawn<S>(
        recorder: Arc<ContactRecorder<S>>,
        config: &IngestConfig,
    ) -> (Self, JoinHandle<()>)
    where
        S: EventStore + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            recorder,
            idle_timeout: config.peer_idle_timeout(),
            workers: HashMap::new(),
            tasks: JoinSet::new(),
        };
        let handle = tokio::spawn(dispatcher.run(rx));
        let slots = Arc::new(Semaphore::new(config.queue_capacity.max(1)));
        (Self { tx, slots }, handle)
    }

    /// Queue a reading for recording.
    ///
    /// Waits while [`IngestConfig::queue_capacity`] readings are in flight.
    ///
    /// # Errors
    ///
    /// Returns [`ProximityError::IngestClosed`] if the dispatcher has stopped.
    pub async fn submit(&self, reading: Reading) -> Result<()> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ProximityError::IngestClosed)?;
        self.tx
            .send(Queued {
                reading,
                _slot: slot,
            })
            .map_err(|_| ProximityError::IngestClosed)
    }

    /// Whether the dispatcher has stopped accepting readings.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct PeerWorker {
    tx: mpsc::UnboundedSender<Queued>,
    finished: oneshot::Receiver<()>,
}

impl PeerWorker {
    fn is_finished(&mut self) -> bool {
        matches!(self.finished.try_recv(), Err(TryRecvError::Closed))
    }
}

struct Dispatcher<S> {
    recorder: Arc<ContactRecorder<S>>,
    idle_timeout: Duration,
    workers: HashMap<PeerId, PeerWorker>,
    tasks: JoinSet<()>,
}

impl<S: EventStore + 'static> Dispatcher<S> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Queued>) {
        while let Some(queued) = rx.recv().await {
            self.route(queued);
            while self.tasks.try_join_next().is_some() {}
        }

        debug!(workers = self.workers.len(), "Ingest queue closed, draining peer queues");
        self.workers.clear();
        while self.tasks.join_next().await.is_some() {}
    }

    fn route(&mut self, queued: Queued) {
        let peer = queued.reading.peer_id;
        let (queued, predecessor) = match self.workers.remove(&peer) {
            Some(worker) => match worker.tx.send(queued) {
                Ok(()) => {
                    self.workers.insert(peer, worker);
                    return;
                }
                // Worker went idle and closed its queue.
                Err(mpsc::error::SendError(queued)) => (queued, Some(worker.finished)),
            },
            None => (queued, None),
        };

        self.workers.retain(|_, worker| !worker.is_finished());
        let (tx, rx) = mpsc::unbounded_channel();
        let (done, finished) = oneshot::channel();
        self.tasks.spawn(run_peer_worker(
            Arc::clone(&self.recorder),
            rx,
            self.idle_timeout,
            predecessor,
            done,
        ));
        // The worker cannot have closed its queue before the first reading.
        let _ = tx.send(queued);
        self.workers.insert(peer, PeerWorker { tx, finished });
    }
}

/// Record one peer's readings in order. Dropping `_done` marks the worker finished.
async fn run_peer_worker<S: EventStore>(
    recorder: Arc<ContactRecorder<S>>,
    mut rx: mpsc::UnboundedReceiver<Queued>,
    idle_timeout: Duration,
    predecessor: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
) {
    if let Some(predecessor) = predecessor {
        // Resolves once the previous worker for this peer is gone.
        let _ = predecessor.await;
    }
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(queued)) => record(&recorder, queued.reading).await,
            Ok(None) => break,
            Err(_) => {
                rx.close();
                while let Some(queued) = rx.recv().await {
                    record(&recorder, queued.reading).await;
                }
                break;
            }
        }
    }
}

async fn record<S: EventStore>(recorder: &ContactRecorder<S>, reading: Reading) {
    if let Err(err) = recorder.record(reading).await {
        warn!(
            peer = %reading.peer_id,
            timestamp = reading.timestamp,
            error = %err,
            "Failed to record reading"
        );
    }
}
