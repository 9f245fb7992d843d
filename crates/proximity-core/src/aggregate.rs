//! Proximity session aggregation.
//!
//! Given a freshly observed [`ContactEvent`] (one reading or a small batch)
//! and every stored event for the same peer, decide whether it extends one of
//! them or starts a new session.
//!
//! The decision is a pure function of its inputs:
//!
//! 1. Measure the gap between `incoming` and each stored span. Spans that
//!    overlap or touch have a gap of zero.
//! 2. Take the closest stored event. Equal gaps go to the earlier event.
//! 3. If that gap is within the [`MergeThreshold`], splice the samples of both
//!    into one time-ordered sequence and recompute `timestamp` and
//!    `duration`. Otherwise `incoming` stands alone.
//!
//! With no stored events `incoming` is returned untouched, so a single
//! reading keeps its externally supplied dwell time.

use std::cmp::Ordering;

use tracing::debug;

use crate::error::{ProximityError, Result};
use crate::event::{ContactEvent, EventError};

/// Largest gap between two spans that still counts as one encounter.
///
/// Timestamps are epoch milliseconds while policy is expressed in seconds;
/// the conversion happens once, here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MergeThreshold {
    millis: i64,
}

impl MergeThreshold {
    /// Threshold of `secs` whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u32) -> Self {
        Self {
            millis: secs as i64 * 1000,
        }
    }

    /// Threshold in milliseconds; negative input clamps to zero.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self {
            millis: if millis < 0 { 0 } else { millis },
        }
    }

    /// The threshold in milliseconds.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.millis
    }

    /// Whether a gap in milliseconds is close enough to merge.
    #[must_use]
    pub const fn admits(&self, gap_millis: i64) -> bool {
        gap_millis <= self.millis
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// `incoming` extends the stored event at `index`; `event` replaces it.
    Merge {
        /// Position of the extended event in the slice given to [`decide`].
        index: usize,
        /// The merged session.
        event: ContactEvent,
    },

    /// `incoming` starts a new session and should be stored as is.
    Insert(ContactEvent),
}

impl MergeDecision {
    /// The event to persist, whichever way the decision went.
    #[must_use]
    pub fn into_event(self) -> ContactEvent {
        match self {
            Self::Merge { event, .. } | Self::Insert(event) => event,
        }
    }

    /// The event to persist.
    #[must_use]
    pub const fn event(&self) -> &ContactEvent {
        match self {
            Self::Merge { event, .. } | Self::Insert(event) => event,
        }
    }

    /// Whether an existing event was extended.
    #[must_use]
    pub const fn is_merge(&self) -> bool {
        matches!(self, Self::Merge { .. })
    }
}

/// Coalesce `incoming` with the closest of `existing`, if close enough.
///
/// Returns the event the caller should persist: either the merged session or
/// `incoming` unchanged.
///
/// # Errors
///
/// See [`decide`].
pub fn aggregate(
    incoming: &ContactEvent,
    existing: &[ContactEvent],
    threshold: MergeThreshold,
) -> Result<ContactEvent> {
    decide(incoming, existing, threshold).map(MergeDecision::into_event)
}

/// Decide how `incoming` relates to the stored events of its peer.
///
/// `existing` may be in any order and must not contain overlapping events.
///
/// # Errors
///
/// - [`ProximityError::InvalidEvent`] if `incoming` or any stored event is
///   malformed, or a stored event belongs to another peer.
/// - [`ProximityError::AmbiguousMerge`] if `incoming` overlaps two or more
///   stored events.
pub fn decide(
    incoming: &ContactEvent,
    existing: &[ContactEvent],
    threshold: MergeThreshold,
) -> Result<MergeDecision> {
    incoming.validate()?;
    for event in existing {
        event.validate()?;
        if event.peer_id != incoming.peer_id {
            return Err(EventError::PeerMismatch {
                expected: incoming.peer_id,
                actual: event.peer_id,
            }
            .into());
        }
    }

    let Some((index, gap)) = closest(incoming, existing) else {
        debug!(peer = %incoming.peer_id, "No stored events for peer, starting a session");
        return Ok(MergeDecision::Insert(incoming.clone()));
    };

    if gap == 0 {
        let overlapping = existing
            .iter()
            .filter(|event| event.gap_millis(incoming) == 0)
            .count();
        if overlapping > 1 {
            return Err(ProximityError::AmbiguousMerge {
                peer: incoming.peer_id,
                overlapping,
            });
        }
    }

    if !threshold.admits(gap) {
        debug!(
            peer = %incoming.peer_id,
            gap_ms = gap,
            threshold_ms = threshold.as_millis(),
            "Closest session too far away, starting a new one"
        );
        return Ok(MergeDecision::Insert(incoming.clone()));
    }

    let event = merge(&existing[index], incoming);
    debug!(
        peer = %incoming.peer_id,
        gap_ms = gap,
        samples = event.len(),
        duration_secs = event.duration,
        "Extending session"
    );
    Ok(MergeDecision::Merge { index, event })
}

/// Index and gap of the closest event, earliest first on ties.
fn closest(incoming: &ContactEvent, existing: &[ContactEvent]) -> Option<(usize, i64)> {
    existing
        .iter()
        .enumerate()
        .map(|(index, event)| (index, event.gap_millis(incoming)))
        .min_by(|(a_index, a_gap), (b_index, b_gap)| {
            a_gap.cmp(b_gap).then_with(|| {
                existing[*a_index]
                    .timestamp
                    .cmp(&existing[*b_index].timestamp)
            })
        })
}

/// Splice two valid events of the same peer into one.
///
/// Samples stay in timestamp order. If both carry a sample at the same
/// instant, the one from `base` is kept. When nothing new survives, `base`
/// is returned as is.
fn merge(base: &ContactEvent, incoming: &ContactEvent) -> ContactEvent {
    let capacity = base.len() + incoming.len();
    let mut rssi_values = Vec::with_capacity(capacity);
    let mut rssi_timestamps = Vec::with_capacity(capacity);

    let mut left = base.samples().peekable();
    let mut right = incoming.samples().peekable();
    loop {
        let next = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => match l.0.cmp(&r.0) {
                Ordering::Less => left.next(),
                Ordering::Greater => right.next(),
                Ordering::Equal => {
                    right.next();
                    left.next()
                }
            },
            (Some(_), None) => left.next(),
            (None, Some(_)) => right.next(),
            (None, None) => None,
        };
        let Some((timestamp, rssi)) = next else {
            break;
        };
        rssi_timestamps.push(timestamp);
        rssi_values.push(rssi);
    }

    // Every incoming sample collided; a single-sample base keeps its dwell.
    if rssi_timestamps.len() == base.len() {
        return base.clone();
    }

    let mut merged = ContactEvent {
        peer_id: base.peer_id,
        timestamp: rssi_timestamps.first().copied().unwrap_or(base.timestamp),
        rssi_values,
        rssi_timestamps,
        duration: 0,
    };
    merged.duration = merged.span_secs();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PeerId;

    const THRESHOLD: MergeThreshold = MergeThreshold::from_secs(60);

    fn peer() -> PeerId {
        "04330a56-ad45-4b0f-81ee-dd414910e1f5".parse().unwrap()
    }

    fn event(rssi: &[i16], ts: &[i64], duration: u64) -> ContactEvent {
        ContactEvent {
            peer_id: peer(),
            rssi_values: rssi.to_vec(),
            rssi_timestamps: ts.to_vec(),
            duration,
            timestamp: ts[0],
        }
    }

    fn stored() -> Vec<ContactEvent> {
        vec![event(&[1, 2, 3], &[2000, 3000, 63_000], 61)]
    }

    #[test]
    fn test_extends_an_existing_event_into_the_past() {
        let incoming = event(&[4], &[1000], 60);
        assert_eq!(
            aggregate(&incoming, &stored(), THRESHOLD).unwrap(),
            event(&[4, 1, 2, 3], &[1000, 2000, 3000, 63_000], 62)
        );
    }

    #[test]
    fn test_extends_an_existing_event_into_the_future() {
        let incoming = event(&[4], &[64_000], 60);
        assert_eq!(
            aggregate(&incoming, &stored(), THRESHOLD).unwrap(),
            event(&[1, 2, 3, 4], &[2000, 3000, 63_000, 64_000], 62)
        );
    }

    #[test]
    fn test_splices_a_reading_into_the_middle() {
        let incoming = event(&[4], &[4000], 60);
        assert_eq!(
            aggregate(&incoming, &stored(), THRESHOLD).unwrap(),
            event(&[1, 2, 4, 3], &[2000, 3000, 4000, 63_000], 61)
        );
    }

    #[test]
    fn test_distant_reading_is_not_merged() {
        let existing = vec![event(&[1, 2], &[0, 10_000], 10)];
        let incoming = event(&[4], &[130_000], 60);

        let decision = decide(&incoming, &existing, THRESHOLD).unwrap();
        assert_eq!(decision, MergeDecision::Insert(incoming));
    }

    #[test]
    fn test_first_reading_is_returned_unchanged() {
        let incoming = event(&[5], &[500], 30);
        let result = aggregate(&incoming, &[], THRESHOLD).unwrap();
        assert_eq!(result, incoming);
        assert_eq!(result.duration, 30);
    }

    #[test]
    fn test_gap_equal_to_threshold_merges() {
        let existing = vec![event(&[1, 2], &[0, 10_000], 10)];
        let incoming = event(&[4], &[70_000], 60);

        let decision = decide(&incoming, &existing, THRESHOLD).unwrap();
        assert!(decision.is_merge());
        assert_eq!(decision.event().duration, 70);
    }

    #[test]
    fn test_gap_one_past_threshold_does_not_merge() {
        let existing = vec![event(&[1, 2], &[0, 10_000], 10)];
        let incoming = event(&[4], &[70_001], 60);

        let decision = decide(&incoming, &existing, THRESHOLD).unwrap();
        assert!(!decision.is_merge());
    }

    #[test]
    fn test_picks_closest_event() {
        let existing = vec![
            event(&[1], &[0], 60),
            event(&[2, 3], &[100_000, 110_000], 10),
        ];
        let incoming = event(&[4], &[90_000], 60);

        match decide(&incoming, &existing, THRESHOLD).unwrap() {
            MergeDecision::Merge { index, event: merged } => {
                assert_eq!(index, 1);
                assert_eq!(merged.rssi_timestamps, vec![90_000, 100_000, 110_000]);
            }
            other @ MergeDecision::Insert(_) => panic!("expected merge, got {other:?}"),
        }
    }

    #[test]
    fn test_equal_gaps_prefer_the_earlier_event() {
        let later = event(&[2], &[40_000], 60);
        let earlier = event(&[1], &[0], 60);
        let incoming = event(&[3], &[20_000], 60);

        for existing in [vec![later.clone(), earlier.clone()], vec![earlier, later]] {
            let decision = decide(&incoming, &existing, THRESHOLD).unwrap();
            let MergeDecision::Merge { index, event: merged } = decision else {
                panic!("expected merge");
            };
            assert_eq!(existing[index].timestamp, 0);
            assert_eq!(merged.rssi_timestamps, vec![0, 20_000]);
            assert_eq!(merged.duration, 20);
        }
    }

    #[test]
    fn test_batch_interleaves_with_existing_samples() {
        let incoming = event(&[7, 8, 9], &[500, 2500, 70_000], 0);
        let merged = aggregate(&incoming, &stored(), THRESHOLD).unwrap();

        assert_eq!(
            merged.rssi_timestamps,
            vec![500, 2000, 2500, 3000, 63_000, 70_000]
        );
        assert_eq!(merged.rssi_values, vec![7, 1, 8, 2, 3, 9]);
        assert_eq!(merged.timestamp, 500);
        assert_eq!(merged.duration, 69);
        assert!(merged.validate().is_ok());
    }

    #[test]
    fn test_colliding_timestamp_keeps_stored_sample() {
        let incoming = event(&[9], &[3000], 60);
        let merged = aggregate(&incoming, &stored(), THRESHOLD).unwrap();

        assert_eq!(merged.rssi_timestamps, vec![2000, 3000, 63_000]);
        assert_eq!(merged.rssi_values, vec![1, 2, 3]);
        assert_eq!(merged.duration, 61);
    }

    #[test]
    fn test_redelivered_reading_keeps_dwell_time() {
        let existing = vec![event(&[-70], &[500], 30)];
        let incoming = event(&[-65], &[500], 30);
        let decision = decide(&incoming, &existing, THRESHOLD).unwrap();

        assert!(decision.is_merge());
        assert_eq!(decision.event(), &existing[0]);
        assert_eq!(decision.event().duration, 30);
    }

    #[test]
    fn test_extreme_timestamps_are_far_apart() {
        let existing = vec![event(&[1], &[-9_000_000_000_000_000_000], 60)];
        let incoming = event(&[2], &[i64::MAX], 60);
        let decision = decide(&incoming, &existing, THRESHOLD).unwrap();

        assert!(!decision.is_merge());
        assert_eq!(decision.event(), &incoming);
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let existing = stored();
        let incoming = event(&[4], &[1000], 60);
        let _ = aggregate(&incoming, &existing, THRESHOLD).unwrap();

        assert_eq!(existing, stored());
        assert_eq!(incoming, event(&[4], &[1000], 60));
    }

    #[test]
    fn test_merge_keeps_events_disjoint() {
        let existing = vec![
            event(&[1, 2], &[0, 10_000], 10),
            event(&[3, 4], &[200_000, 210_000], 10),
        ];
        let incoming = event(&[5], &[50_000], 60);

        let MergeDecision::Merge { index, event: merged } =
            decide(&incoming, &existing, THRESHOLD).unwrap()
        else {
            panic!("expected merge");
        };
        for (other_index, other) in existing.iter().enumerate() {
            if other_index != index {
                assert!(merged.gap_millis(other) > 0);
            }
        }
    }

    #[test]
    fn test_incoming_spanning_two_events_is_ambiguous() {
        let existing = vec![
            event(&[1, 2], &[0, 10_000], 10),
            event(&[3, 4], &[200_000, 210_000], 10),
        ];
        let incoming = event(&[5, 6], &[5000, 205_000], 0);

        let err = decide(&incoming, &existing, THRESHOLD).unwrap_err();
        assert!(matches!(
            err,
            ProximityError::AmbiguousMerge { overlapping: 2, .. }
        ));
    }

    #[test]
    fn test_malformed_incoming_is_rejected() {
        let mut incoming = event(&[4, 5], &[1000, 900], 60);
        incoming.timestamp = 900;
        let err = aggregate(&incoming, &stored(), THRESHOLD).unwrap_err();
        assert!(matches!(
            err,
            ProximityError::InvalidEvent(EventError::NotAscending { .. })
        ));
    }

    #[test]
    fn test_malformed_stored_event_is_rejected() {
        let existing = vec![event(&[1, 2], &[1000], 0)];
        let incoming = event(&[4], &[1000], 60);
        let err = aggregate(&incoming, &existing, THRESHOLD).unwrap_err();
        assert!(matches!(
            err,
            ProximityError::InvalidEvent(EventError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_events_of_another_peer_are_rejected() {
        let mut other = event(&[1], &[0], 60);
        other.peer_id = PeerId::from_bytes([0xAB; 16]);
        let incoming = event(&[4], &[1000], 60);

        let err = aggregate(&incoming, &[other], THRESHOLD).unwrap_err();
        assert!(matches!(
            err,
            ProximityError::InvalidEvent(EventError::PeerMismatch { .. })
        ));
    }

    #[test]
    fn test_threshold_units() {
        assert_eq!(MergeThreshold::from_secs(60).as_millis(), 60_000);
        assert_eq!(MergeThreshold::from_millis(-5).as_millis(), 0);
        assert!(MergeThreshold::from_secs(1).admits(1000));
        assert!(!MergeThreshold::from_secs(1).admits(1001));
    }
}
