//! Event bus for session notifications
//!
//! State transitions, rendered tracks, stats samples and dropped frames are
//! broadcast to any number of observers (the binary logs them as JSON).

pub mod types;

pub use types::SessionEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for [`SessionEvent`]s
///
/// A subscriber that falls too far behind receives `Lagged` and misses
/// events; publishers never block.
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to all subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::types::NegotiationState;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(SessionEvent::state_changed("s1", NegotiationState::CreatingOffer));

        for rx in [&mut rx1, &mut rx2] {
            let event = rx.recv().await.unwrap();
            assert!(matches!(
                event,
                SessionEvent::StateChanged {
                    state: NegotiationState::CreatingOffer,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        bus.publish(SessionEvent::FrameRejected {
            source_id: "local".to_string(),
            reason: "test".to_string(),
        });
    }
}
