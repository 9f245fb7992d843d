//! Application state shared across handlers.

use std::sync::Arc;

use proximity_core::{
    ContactRecorder, IngestQueue, JsonFileEventStore, ProximityConfig, RetentionSweeper,
};
use tokio::task::JoinHandle;

/// Shared application state handle.
pub type SharedState = Arc<AppState>;

/// Application state.
pub struct AppState {
    /// Configuration the server was started with.
    pub config: ProximityConfig,

    /// Synchronous write path for batches.
    pub recorder: Arc<ContactRecorder<JsonFileEventStore>>,

    /// Asynchronous per-peer queue for single readings.
    pub ingest: IngestQueue,

    /// On-demand retention sweeps.
    pub sweeper: RetentionSweeper<JsonFileEventStore>,
}

impl AppState {
    /// Build state over the JSON event store in the configured data directory.
    ///
    /// Must be called inside a Tokio runtime. The returned handle finishes once
    /// the state is dropped and every queued reading has been recorded.
    #[must_use]
    pub fn new(config: ProximityConfig) -> (Self, JoinHandle<()>) {
        let store = Arc::new(JsonFileEventStore::new(
            config.storage.resolved_data_dir(),
        ));
        let recorder = Arc::new(ContactRecorder::new(store, &config.aggregation));
        let (ingest, ingest_handle) = IngestQueue::spawn(Arc::clone(&recorder), &config.ingest);
        let sweeper = RetentionSweeper::new(Arc::clone(&recorder), &config.retention);

        (
            Self {
                config,
                recorder,
                ingest,
                sweeper,
            },
            ingest_handle,
        )
    }
}
