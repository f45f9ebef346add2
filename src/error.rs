use serde::Serialize;
use thiserror::Error;

use crate::webrtc::signaling::SignalingError;

/// Why a negotiation attempt ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationFailure {
    /// Remote media lines are not in the order we registered them
    OrderMismatch,
    /// Remote description (or signaling reply) could not be parsed
    ParseError,
    /// Signaling request never produced a reply
    TransportError,
    /// Signaling server answered with a non-zero code
    RejectedBySignaling,
    /// Media engine refused an operation or reported a failure
    EngineFailure,
}

impl std::fmt::Display for NegotiationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationFailure::OrderMismatch => write!(f, "m-line order mismatch"),
            NegotiationFailure::ParseError => write!(f, "parse error"),
            NegotiationFailure::TransportError => write!(f, "transport error"),
            NegotiationFailure::RejectedBySignaling => write!(f, "rejected by signaling"),
            NegotiationFailure::EngineFailure => write!(f, "engine failure"),
        }
    }
}

impl From<&SignalingError> for NegotiationFailure {
    fn from(err: &SignalingError) -> Self {
        match err {
            SignalingError::Rejected { .. } => NegotiationFailure::RejectedBySignaling,
            SignalingError::Unparseable(_) => NegotiationFailure::ParseError,
            SignalingError::Transport(_) => NegotiationFailure::TransportError,
        }
    }
}

/// Frame-level rendering failure (frame is dropped, session continues)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFailure {
    #[error("invalid frame dimensions {width}x{height}: {detail}")]
    InvalidFrameDimensions {
        width: u32,
        height: u32,
        detail: String,
    },
}

/// Statistics failure (one report skipped, polling continues)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsFailure {
    #[error("report unparseable: {0}")]
    ReportUnparseable(String),
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Negotiation failed: {reason}: {detail}")]
    NegotiationFailed {
        reason: NegotiationFailure,
        detail: String,
    },

    #[error("Render failed: {0}")]
    RenderFailed(#[from] RenderFailure),

    #[error("Stats unavailable: {0}")]
    StatsUnavailable(#[from] StatsFailure),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Media engine error: {0}")]
    Engine(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn negotiation(reason: NegotiationFailure, detail: impl Into<String>) -> Self {
        Self::NegotiationFailed {
            reason,
            detail: detail.into(),
        }
    }

    /// Negotiation failure reason, if this error ended a negotiation
    pub fn negotiation_failure(&self) -> Option<NegotiationFailure> {
        match self {
            AppError::NegotiationFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
