//! # proximity-core
//!
//! Core logic for turning a stream of radio proximity readings into contact
//! events: contiguous, non-overlapping sessions of proximity to one peer.
//!
//! This crate provides:
//! - The contact event data model and its validation
//! - The session aggregator that decides whether a reading extends a session
//! - An event store contract with in-memory and JSON-file implementations
//! - A write path that serializes updates per peer
//! - A per-peer ingest queue for asynchronous reading delivery
//! - A retention sweeper for expiring old events
//! - Configuration management
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`event`] - `PeerId`, `Reading`, `ContactEvent`, `StoredEvent` and their invariants
//! - [`aggregate`] - Pure merge decision between a new event and stored events
//! - [`store`] - The `EventStore` trait and an in-memory store
//! - [`storage`] - JSON-file event store
//! - [`recorder`] - Per-peer serialized read-modify-write against a store
//! - [`ingest`] - Per-peer worker queue in front of the recorder
//! - [`retention`] - Periodic deletion of expired events
//! - [`config`](crate::config) - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod event;
pub mod ingest;
pub mod recorder;
pub mod retention;
pub mod storage;
pub mod store;

// Re-export primary types for convenience
pub use aggregate::{aggregate, decide, MergeDecision, MergeThreshold};
pub use crate::config::{
    default_config_path, AggregationConfig, ConfigError, ConfigResult, IngestConfig,
    ProximityConfig, RetentionConfig, ServerConfig, StorageConfig,
};
pub use error::{ProximityError, Result};
pub use event::{ContactEvent, EventError, EventId, PeerId, Reading, StoredEvent, PEER_ID_LEN};
pub use ingest::IngestQueue;
pub use recorder::{ContactRecorder, PeerLocks, RecordKind, RecordOutcome};
pub use retention::RetentionSweeper;
pub use storage::{default_data_dir, JsonFileEventStore};
pub use store::{EventStore, MemoryEventStore};
