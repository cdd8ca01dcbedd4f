// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hypervisor lifecycle events, as consumed by the reconciliation manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw lifecycle event as emitted by the hypervisor's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    pub metadata: LifecycleEventMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEventMetadata {
    pub action: String,
    pub source: String,
}

/// Drops events whose timestamp is identical to the immediately preceding
/// event's timestamp.
///
/// This reproduces a quirk of the original implementation verbatim: it
/// dedups on timestamp alone, not on `(source, action, timestamp)`, so two
/// distinct events for two different users that happen to share a
/// timestamp would collide. Retained intentionally; see the design notes
/// for why this isn't tightened to a compound key.
#[derive(Debug, Default)]
pub struct TimestampDedup {
    last: Option<DateTime<Utc>>,
}

impl TimestampDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `event` is a duplicate of the previous one and
    /// should be dropped. Updates internal state regardless.
    pub fn is_duplicate(&mut self, event: &LifecycleEvent) -> bool {
        let dup = self.last == Some(event.timestamp);
        self.last = Some(event.timestamp);
        dup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_at(ts: DateTime<Utc>) -> LifecycleEvent {
        LifecycleEvent {
            timestamp: ts,
            metadata: LifecycleEventMetadata {
                action: "instance-started".into(),
                source: "/1.0/instances/ws-u7".into(),
            },
        }
    }

    #[test]
    fn first_event_is_never_a_duplicate() {
        let mut dedup = TimestampDedup::new();
        assert!(!dedup.is_duplicate(&event_at(Utc::now())));
    }

    #[test]
    fn repeated_timestamp_is_dropped() {
        let mut dedup = TimestampDedup::new();
        let ts = Utc::now();
        assert!(!dedup.is_duplicate(&event_at(ts)));
        assert!(dedup.is_duplicate(&event_at(ts)));
    }

    #[test]
    fn distinct_timestamps_both_pass() {
        let mut dedup = TimestampDedup::new();
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1);
        assert!(!dedup.is_duplicate(&event_at(a)));
        assert!(!dedup.is_duplicate(&event_at(b)));
    }
}
