//! Contact event data model.
//!
//! A [`ContactEvent`] is a time-ordered run of RSSI samples for one peer.
//! A single [`Reading`] from the radio layer is the degenerate one-sample case.
//!
//! Every event that reaches a store satisfies:
//! - `rssi_values.len() == rssi_timestamps.len() >= 1`
//! - `rssi_timestamps` strictly ascending
//! - `timestamp == rssi_timestamps[0]`
//! - `duration` is the whole-second span of the samples, except for a
//!   single-sample event where it carries the externally supplied dwell time

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ProximityError;

/// Length in bytes of a peer identifier.
pub const PEER_ID_LEN: usize = 16;

/// Opaque identifier of the other device in an encounter.
///
/// Derived from the peer's rotating 128-bit broadcast identifier. Two
/// readings belong to the same encounter only if their identifiers are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Wrap raw identifier bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Uuid::from_bytes(self.0).hyphenated(), f)
    }
}

impl FromStr for PeerId {
    type Err = ProximityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(|uuid| Self(uuid.into_bytes()))
            .map_err(|_| ProximityError::InvalidPeerId(s.to_string()))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A single signal-strength sample as delivered by the radio layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Reading {
    /// Peer the sample was taken from.
    #[schema(value_type = String, example = "04330a56-ad45-4b0f-81ee-dd414910e1f5")]
    pub peer_id: PeerId,

    /// Signal strength in dBm.
    #[schema(example = -62)]
    pub rssi: i16,

    /// When the sample was taken, epoch milliseconds.
    #[schema(example = 1_700_000_000_000_i64)]
    pub timestamp: i64,
}

/// Why a contact event was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The event carries no samples at all.
    #[error("Contact event for peer {peer} has no samples")]
    Empty {
        /// Peer of the offending event.
        peer: PeerId,
    },

    /// RSSI values and timestamps are not index-aligned.
    #[error(
        "Contact event for peer {peer} has {values} RSSI values but {timestamps} timestamps"
    )]
    LengthMismatch {
        /// Peer of the offending event.
        peer: PeerId,
        /// Number of RSSI values.
        values: usize,
        /// Number of timestamps.
        timestamps: usize,
    },

    /// Timestamps are not strictly ascending.
    #[error(
        "Contact event for peer {peer} has non-ascending timestamps at index {index} ({previous} then {current})"
    )]
    NotAscending {
        /// Peer of the offending event.
        peer: PeerId,
        /// Index of the first out-of-order timestamp.
        index: usize,
        /// Timestamp before `index`.
        previous: i64,
        /// Timestamp at `index`.
        current: i64,
    },

    /// The `timestamp` field disagrees with the earliest sample.
    #[error("Contact event for peer {peer} has timestamp {actual}, expected {expected}")]
    TimestampMismatch {
        /// Peer of the offending event.
        peer: PeerId,
        /// Earliest sample timestamp.
        expected: i64,
        /// Value found in the `timestamp` field.
        actual: i64,
    },

    /// An event for a different peer was supplied.
    #[error("Contact event for peer {actual} cannot be combined with peer {expected}")]
    PeerMismatch {
        /// Peer the operation is about.
        expected: PeerId,
        /// Peer found on the event.
        actual: PeerId,
    },
}

/// A contiguous proximity session with one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "peer_id": "04330a56-ad45-4b0f-81ee-dd414910e1f5",
    "rssi_values": [-60, -58, -71],
    "rssi_timestamps": [2000, 3000, 63000],
    "duration": 61,
    "timestamp": 2000
}))]
pub struct ContactEvent {
    /// Peer this session is with.
    #[schema(value_type = String)]
    pub peer_id: PeerId,

    /// Signal strength samples in dBm, aligned with `rssi_timestamps`.
    pub rssi_values: Vec<i16>,

    /// Sample times in epoch milliseconds, strictly ascending.
    pub rssi_timestamps: Vec<i64>,

    /// Session length in whole seconds.
    pub duration: u64,

    /// Start of the session, epoch milliseconds.
    pub timestamp: i64,
}

impl ContactEvent {
    /// Build a validated event from parallel sample arrays.
    ///
    /// `duration` is only honoured for a single-sample event; with two or more
    /// samples it is recomputed from the sample span.
    ///
    /// # Errors
    ///
    /// Returns an [`EventError`] if the arrays are empty, differ in length, or
    /// the timestamps are not strictly ascending.
    pub fn new(
        peer_id: PeerId,
        rssi_values: Vec<i16>,
        rssi_timestamps: Vec<i64>,
        duration: u64,
    ) -> Result<Self, EventError> {
        let timestamp = rssi_timestamps.first().copied().unwrap_or_default();
        let mut event = Self {
            peer_id,
            rssi_values,
            rssi_timestamps,
            duration,
            timestamp,
        };
        event.validate()?;
        if event.len() > 1 {
            event.duration = event.span_secs();
        }
        Ok(event)
    }

    /// Turn a single reading into a one-sample event lasting `dwell_secs`.
    #[must_use]
    pub fn from_reading(reading: Reading, dwell_secs: u64) -> Self {
        Self {
            peer_id: reading.peer_id,
            rssi_values: vec![reading.rssi],
            rssi_timestamps: vec![reading.timestamp],
            duration: dwell_secs,
            timestamp: reading.timestamp,
        }
    }

    /// Check the structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), EventError> {
        let peer = self.peer_id;
        if self.rssi_values.len() != self.rssi_timestamps.len() {
            return Err(EventError::LengthMismatch {
                peer,
                values: self.rssi_values.len(),
                timestamps: self.rssi_timestamps.len(),
            });
        }
        let Some(&first) = self.rssi_timestamps.first() else {
            return Err(EventError::Empty { peer });
        };
        if let Some(index) = self
            .rssi_timestamps
            .windows(2)
            .position(|pair| pair[0] >= pair[1])
        {
            return Err(EventError::NotAscending {
                peer,
                index: index + 1,
                previous: self.rssi_timestamps[index],
                current: self.rssi_timestamps[index + 1],
            });
        }
        if self.timestamp != first {
            return Err(EventError::TimestampMismatch {
                peer,
                expected: first,
                actual: self.timestamp,
            });
        }
        Ok(())
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rssi_timestamps.len()
    }

    /// Whether the event has no samples. Never true for a validated event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rssi_timestamps.is_empty()
    }

    /// First and last sample timestamps.
    #[must_use]
    pub fn span(&self) -> (i64, i64) {
        let first = self.rssi_timestamps.first().copied().unwrap_or(self.timestamp);
        let last = self.rssi_timestamps.last().copied().unwrap_or(first);
        (first, last)
    }

    /// Last sample timestamp.
    #[must_use]
    pub fn end(&self) -> i64 {
        self.span().1
    }

    /// Whole seconds between the first and last sample.
    #[must_use]
    pub fn span_secs(&self) -> u64 {
        let (first, last) = self.span();
        last.abs_diff(first) / 1000
    }

    /// Distance in milliseconds between the two spans, zero if they touch or overlap.
    ///
    /// Saturates at `i64::MAX` for spans further apart than that.
    #[must_use]
    pub fn gap_millis(&self, other: &Self) -> i64 {
        let (start, end) = self.span();
        let (other_start, other_end) = other.span();
        if other_end < start {
            start.saturating_sub(other_end)
        } else if other_start > end {
            other_start.saturating_sub(end)
        } else {
            0
        }
    }

    /// Samples as `(timestamp, rssi)` pairs in time order.
    pub fn samples(&self) -> impl Iterator<Item = (i64, i16)> + '_ {
        self.rssi_timestamps
            .iter()
            .copied()
            .zip(self.rssi_values.iter().copied())
    }
}

/// Store-assigned identity of a persisted event.
///
/// Timestamps are not stable identities: merging a reading from the past
/// moves an event's `timestamp`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
#[schema(value_type = String, example = "01933b8e-5c1a-7d2e-9f3a-1b2c3d4e5f60")]
pub struct EventId(Uuid);

impl EventId {
    /// Allocate a new time-ordered identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A contact event together with its store identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredEvent {
    /// Store identity, stable across merges.
    pub id: EventId,

    /// The session itself.
    #[serde(flatten)]
    pub event: ContactEvent,
}

impl StoredEvent {
    /// Assign a fresh identity to a new event.
    #[must_use]
    pub fn new(event: ContactEvent) -> Self {
        Self {
            id: EventId::new(),
            event,
        }
    }
}
