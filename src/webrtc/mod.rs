//! WebRTC session negotiation
//!
//! Drives one media session against an SRS or xrtc signaling server:
//! - SDP offer/answer state machine (play, publish and pull modes)
//! - m-line order checking of remote descriptions
//! - HTTP signaling transport
//! - periodic RTP statistics
//!
//! Architecture:
//! ```text
//!                 HttpSignalingTransport <---- HTTP ----> SRS / xrtc
//!                          ^
//!                          | offer / answer
//!                          v
//! WebRtcEngine ---> SessionNegotiator ---> TrackRenderer (VideoCompositor)
//!   (EngineEvent)          |
//!        ^                 | state (watch)
//!        |                 v
//!        +----------- StatsPoller ---> EventBus
//! ```

pub mod engine;
pub mod negotiator;
pub mod peer;
pub mod sdp;
pub mod signaling;
pub mod stats;
pub mod transport;
pub mod types;

pub use engine::{EngineEvent, MediaEngine, RawStatsReport};
pub use negotiator::{SessionNegotiator, TrackRenderer, LOCAL_VIDEO_TRACK_ID};
pub use peer::WebRtcEngine;
pub use signaling::{SignalingError, SignalingTransport};
pub use stats::{StatsDirection, StatsPoller, StatsSample};
pub use transport::HttpSignalingTransport;
pub use types::{
    MediaDirection, MediaDirections, MediaKind, MediaLine, NegotiationState, SdpKind,
    SessionDescription, TrackHandle,
};
