//! Session negotiation data model

use serde::{Deserialize, Serialize};

use crate::error::NegotiationFailure;

/// Media kind of a media line or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Registration order of media lines. Audio must precede video.
    pub const ORDER: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    /// Parse the media field of an SDP `m=` line
    pub fn from_sdp_media(media: &str) -> Option<Self> {
        match media {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Direction assigned to a media line before offer creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDirection {
    SendOnly,
    RecvOnly,
    SendRecv,
}

impl std::fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaDirection::SendOnly => write!(f, "sendonly"),
            MediaDirection::RecvOnly => write!(f, "recvonly"),
            MediaDirection::SendRecv => write!(f, "sendrecv"),
        }
    }
}

/// Directions for both media kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDirections {
    pub audio: MediaDirection,
    pub video: MediaDirection,
}

impl MediaDirections {
    pub fn new(audio: MediaDirection, video: MediaDirection) -> Self {
        Self { audio, video }
    }

    pub fn recv_only() -> Self {
        Self::new(MediaDirection::RecvOnly, MediaDirection::RecvOnly)
    }

    pub fn send_only() -> Self {
        Self::new(MediaDirection::SendOnly, MediaDirection::SendOnly)
    }

    pub fn get(&self, kind: MediaKind) -> MediaDirection {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }

    /// Media lines in registration order
    pub fn media_lines(&self) -> Vec<MediaLine> {
        MediaKind::ORDER
            .iter()
            .map(|&kind| MediaLine {
                kind,
                direction: self.get(kind),
            })
            .collect()
    }
}

/// A registered media line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaLine {
    pub kind: MediaKind,
    pub direction: MediaDirection,
}

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpKind::Offer => write!(f, "offer"),
            SdpKind::Answer => write!(f, "answer"),
        }
    }
}

/// Negotiated media session descriptor. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    kind: SdpKind,
    sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpKind::Offer, sdp)
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpKind::Answer, sdp)
    }

    pub fn kind(&self) -> SdpKind {
        self.kind
    }

    /// Serialized body
    pub fn sdp(&self) -> &str {
        &self.sdp
    }
}

/// Reference to a local or remote media track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackHandle {
    /// Track identity (unique within a session)
    pub id: String,
    pub kind: MediaKind,
}

impl TrackHandle {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, MediaKind::Video)
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id, MediaKind::Audio)
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// Negotiation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum NegotiationState {
    Idle,
    CreatingOffer,
    AwaitingRemoteAnswer,
    Negotiated,
    Failed(NegotiationFailure),
    TornDown,
}

impl NegotiationState {
    /// No further negotiation operations are valid
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed(_) | NegotiationState::TornDown)
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationState::Idle => write!(f, "idle"),
            NegotiationState::CreatingOffer => write!(f, "creating_offer"),
            NegotiationState::AwaitingRemoteAnswer => write!(f, "awaiting_remote_answer"),
            NegotiationState::Negotiated => write!(f, "negotiated"),
            NegotiationState::Failed(reason) => write!(f, "failed ({})", reason),
            NegotiationState::TornDown => write!(f, "torn_down"),
        }
    }
}
