//! Media engine capability interface
//!
//! The negotiator drives the engine through [`MediaEngine`] and receives its
//! asynchronous notifications as [`EngineEvent`]s on a single channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{MediaLine, SessionDescription, TrackHandle};
use crate::error::Result;

/// Notification posted by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A requested offer or answer has been created
    LocalDescriptionReady(SessionDescription),
    /// A remote track appeared after the remote description was applied
    RemoteTrackAdded(TrackHandle),
    /// A remote track went away
    RemoteTrackRemoved(String),
    /// The engine gave up on the session
    NegotiationFailed(String),
}

/// Raw statistics report: one JSON document per report entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStatsReport {
    pub entries: Vec<String>,
}

/// Capability set of the media engine
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Construct the underlying session; events go to `events`
    async fn create_session(&self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<()>;

    /// Register one media line. Lines appear in the offer in call order.
    async fn add_media_line(&self, line: MediaLine) -> Result<()>;

    /// Request an offer; delivered as `LocalDescriptionReady`
    async fn create_offer(&self) -> Result<()>;

    /// Request an answer to the applied remote offer; delivered as `LocalDescriptionReady`
    async fn create_answer(&self) -> Result<()>;

    /// Apply the local description and return the authoritative one
    /// (which may carry gathered candidates)
    async fn set_local_description(&self, desc: &SessionDescription)
        -> Result<SessionDescription>;

    /// Apply the remote description. May trigger `RemoteTrackAdded`.
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()>;

    async fn get_stats(&self) -> Result<RawStatsReport>;

    /// Release the session. Safe to call more than once.
    async fn teardown(&self) -> Result<()>;
}
