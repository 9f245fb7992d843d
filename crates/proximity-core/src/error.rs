//! Unified error types for the proximity core library.
//!
//! [`ProximityError`] covers every failure mode of the crate. Modules with a
//! richer vocabulary of their own ([`EventError`], [`ConfigError`]) convert
//! into it at the module boundary.
//!
//! # Example
//!
//! ```rust
//! use proximity_core::error::{ProximityError, Result};
//! use proximity_core::PeerId;
//!
//! fn parse_peer(text: &str) -> Result<PeerId> {
//!     text.parse()
//! }
//!
//! assert!(matches!(parse_peer("nope"), Err(ProximityError::InvalidPeerId(_))));
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::event::{EventError, PeerId};

/// The unified error type for all proximity operations.
#[derive(Debug, Error)]
pub enum ProximityError {
    // =========================================================================
    // INPUT ERRORS
    // =========================================================================
    /// A contact event violates a structural invariant.
    #[error("Invalid contact event: {0}")]
    InvalidEvent(#[from] EventError),

    /// A peer identifier could not be parsed.
    #[error("Invalid peer identifier: '{0}'. Expected a 128-bit UUID such as '04330a56-ad45-4b0f-81ee-dd414910e1f5'.")]
    InvalidPeerId(String),

    // =========================================================================
    // AGGREGATION ERRORS
    // =========================================================================
    /// The incoming event overlaps more than one stored event for the peer.
    #[error(
        "Incoming event for peer {peer} overlaps {overlapping} stored events; merging into one would overlap the others"
    )]
    AmbiguousMerge {
        /// Peer of the incoming event.
        peer: PeerId,
        /// Number of stored events the incoming span touches.
        overlapping: usize,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading events.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A stored document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // =========================================================================
    // INGEST ERRORS
    // =========================================================================
    /// The ingest queue has shut down and no longer accepts readings.
    #[error("Ingest queue is closed; readings are no longer accepted")]
    IngestClosed,
}

/// A specialized [`Result`] type for proximity operations.
pub type Result<T> = std::result::Result<T, ProximityError>;

impl ProximityError {
    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::InvalidPeerId(_) => "INVALID_PEER_ID",
            Self::AmbiguousMerge { .. } => "AMBIGUOUS_MERGE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
            Self::IngestClosed => "INGEST_CLOSED",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<ConfigError> for ProximityError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
            ConfigError::NoConfigDirectory => {
                Self::ConfigNotFound(PathBuf::from("<unknown config directory>"))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
