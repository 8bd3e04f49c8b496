//! Live activity feed: wire types, connection state and bounded history.
//!
//! The feed is not session-scoped. It reports every scan recorded by any
//! station so operators can watch the floor in real time.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stocktake_core::{DrumId, ScanId, UserId};

use crate::event::Event;
use crate::projection::Projection;
use crate::sse::SseFrame;

/// Number of feed entries kept for display.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// State of the server-push connection.
///
/// Transitions are driven only by the transport; `Open` is reported once the
/// server has accepted the stream, never optimistically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Error,
    Closed,
}

impl ConnectionState {
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

/// Payload of a `scanEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanActivity {
    pub scan_id: ScanId,
    pub drum_id: DrumId,
    pub scan_type: String,
    pub scan_status: String,
    pub scanned_at: DateTime<Utc>,
    pub user_id: UserId,
}

/// A recognized feed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActivityEvent {
    /// The server acknowledged the subscription.
    Connected { received_at: DateTime<Utc> },
    /// A scan was recorded somewhere on the floor.
    ScanEvent(ScanActivity),
}

#[derive(Debug, Error)]
pub enum ActivityDecodeError {
    #[error("malformed {event_type} payload: {source}")]
    Payload {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ActivityEvent {
    /// Interpret an SSE frame.
    ///
    /// The event type comes from the `event:` field, or from a `type` member of
    /// the JSON data when the server sends unnamed frames. Unknown types yield
    /// `Ok(None)`. Scan payloads may be flat or wrapped in a `data` member.
    pub fn from_frame(
        frame: &SseFrame,
        received_at: DateTime<Utc>,
    ) -> Result<Option<Self>, ActivityDecodeError> {
        let json: Option<JsonValue> = serde_json::from_str(&frame.data).ok();

        let event_type = frame.event.clone().or_else(|| {
            json.as_ref()
                .and_then(|v| v.get("type"))
                .and_then(|t| t.as_str())
                .map(str::to_string)
        });

        match event_type.as_deref() {
            Some("connected") => Ok(Some(ActivityEvent::Connected { received_at })),
            Some("scanEvent") => {
                let payload = match json {
                    Some(JsonValue::Object(mut obj)) => match obj.remove("data") {
                        Some(inner @ JsonValue::Object(_)) => inner,
                        Some(other) => {
                            obj.insert("data".to_string(), other);
                            JsonValue::Object(obj)
                        }
                        None => JsonValue::Object(obj),
                    },
                    Some(other) => other,
                    None => JsonValue::String(frame.data.clone()),
                };
                let scan: ScanActivity = serde_json::from_value(payload).map_err(|source| {
                    ActivityDecodeError::Payload {
                        event_type: "scanEvent",
                        source,
                    }
                })?;
                Ok(Some(ActivityEvent::ScanEvent(scan)))
            }
            _ => Ok(None),
        }
    }
}

impl Event for ActivityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ActivityEvent::Connected { .. } => "activity.connected",
            ActivityEvent::ScanEvent(_) => "activity.scan",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ActivityEvent::Connected { received_at } => *received_at,
            ActivityEvent::ScanEvent(scan) => scan.scanned_at,
        }
    }
}

/// Most-recent-first ring buffer of feed events.
#[derive(Debug, Clone)]
pub struct ActivityHistory {
    capacity: usize,
    entries: VecDeque<ActivityEvent>,
}

impl ActivityHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest entry first.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityEvent> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ActivityEvent> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for ActivityHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl Projection for ActivityHistory {
    type Ev = ActivityEvent;

    fn apply(&mut self, event: &ActivityEvent) {
        self.entries.push_front(event.clone());
        self.entries.truncate(self.capacity);
    }

    fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scan(n: usize) -> ActivityEvent {
        ActivityEvent::ScanEvent(ScanActivity {
            scan_id: ScanId::new(format!("scan-{n}")).unwrap(),
            drum_id: DrumId::new(format!("drum-{n}")).unwrap(),
            scan_type: "stocktake".to_string(),
            scan_status: "success".to_string(),
            scanned_at: Utc::now(),
            user_id: UserId::new("user-1").unwrap(),
        })
    }

    #[test]
    fn decodes_named_scan_event() {
        let frame = SseFrame {
            event: Some("scanEvent".to_string()),
            data: r#"{"scanId":"s1","drumId":"d1","scanType":"stocktake","scanStatus":"success","scannedAt":"2024-05-01T10:00:00Z","userId":"u1"}"#.to_string(),
            id: None,
        };
        let ev = ActivityEvent::from_frame(&frame, Utc::now()).unwrap().unwrap();
        match ev {
            ActivityEvent::ScanEvent(s) => {
                assert_eq!(s.scan_id.as_str(), "s1");
                assert_eq!(s.drum_id.as_str(), "d1");
                assert_eq!(s.scan_status, "success");
            }
            _ => panic!("Expected ScanEvent"),
        }
    }

    #[test]
    fn decodes_typed_envelope_without_event_name() {
        let frame = SseFrame {
            event: None,
            data: r#"{"type":"scanEvent","data":{"scanId":"s2","drumId":"d2","scanType":"intake","scanStatus":"error","scannedAt":"2024-05-01T10:00:00Z","userId":"u2"}}"#.to_string(),
            id: None,
        };
        let ev = ActivityEvent::from_frame(&frame, Utc::now()).unwrap().unwrap();
        assert_eq!(ev.event_type(), "activity.scan");
    }

    #[test]
    fn connected_and_unknown_types() {
        let connected = SseFrame {
            event: Some("connected".to_string()),
            data: String::new(),
            id: None,
        };
        let now = Utc::now();
        assert_eq!(
            ActivityEvent::from_frame(&connected, now).unwrap(),
            Some(ActivityEvent::Connected { received_at: now })
        );

        let unknown = SseFrame {
            event: Some("heartbeat".to_string()),
            data: "{}".to_string(),
            id: None,
        };
        assert_eq!(ActivityEvent::from_frame(&unknown, now).unwrap(), None);
    }

    #[test]
    fn malformed_scan_payload_is_an_error() {
        let frame = SseFrame {
            event: Some("scanEvent".to_string()),
            data: r#"{"scanId":"s1"}"#.to_string(),
            id: None,
        };
        assert!(ActivityEvent::from_frame(&frame, Utc::now()).is_err());
    }

    #[test]
    fn history_is_newest_first_and_reset_clears() {
        let mut history = ActivityHistory::new(3);
        for n in 0..5 {
            history.apply(&scan(n));
        }
        assert_eq!(history.len(), 3);

        let ids: Vec<&str> = history
            .iter()
            .map(|ev| match ev {
                ActivityEvent::ScanEvent(s) => s.scan_id.as_str(),
                ActivityEvent::Connected { .. } => "connected",
            })
            .collect();
        assert_eq!(ids, vec!["scan-4", "scan-3", "scan-2"]);

        history.reset();
        assert!(history.is_empty());
    }

    proptest! {
        #[test]
        fn history_never_exceeds_capacity(capacity in 1usize..80, pushes in 0usize..200) {
            let mut history = ActivityHistory::new(capacity);
            for n in 0..pushes {
                history.apply(&scan(n));
            }
            prop_assert_eq!(history.len(), pushes.min(capacity));
        }
    }
}
