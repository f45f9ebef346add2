//! Session event types
//!
//! Serialized as `{"event": "<name>", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::webrtc::stats::StatsSample;
use crate::webrtc::types::{MediaKind, NegotiationState};

/// Events broadcast by a running session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// Negotiation state transition
    #[serde(rename = "session.state_changed")]
    StateChanged {
        session_id: String,
        state: NegotiationState,
        timestamp: DateTime<Utc>,
    },

    /// A remote track was accepted (video tracks are rendered)
    #[serde(rename = "session.track_rendered")]
    TrackRendered {
        session_id: String,
        track_id: String,
        kind: MediaKind,
        rendered: bool,
    },

    /// Statistics sample from the latest poll
    #[serde(rename = "session.stats_sample")]
    StatsSample {
        session_id: String,
        #[serde(flatten)]
        sample: StatsSample,
    },

    /// A frame was dropped by the compositor
    #[serde(rename = "video.frame_rejected")]
    FrameRejected { source_id: String, reason: String },
}

impl SessionEvent {
    pub fn state_changed(session_id: &str, state: NegotiationState) -> Self {
        Self::StateChanged {
            session_id: session_id.to_string(),
            state,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NegotiationFailure;

    #[test]
    fn test_serialization() {
        let event = SessionEvent::state_changed(
            "s1",
            NegotiationState::Failed(NegotiationFailure::OrderMismatch),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "session.state_changed");
        assert_eq!(json["data"]["session_id"], "s1");
        assert_eq!(json["data"]["state"]["state"], "failed");
        assert_eq!(json["data"]["state"]["reason"], "order_mismatch");

        let event = SessionEvent::StatsSample {
            session_id: "s1".to_string(),
            sample: StatsSample {
                stream_type: "inbound-rtp".to_string(),
                kind: Some(MediaKind::Video),
                round_trip_ms: Some(12.5),
                packets_lost: Some(3),
                fraction_lost: None,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["packets_lost"], 3);
        assert_eq!(json["data"]["stream_type"], "inbound-rtp");
    }
}
