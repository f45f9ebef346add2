//! SDP inspection used before handing a remote description to the engine
//!
//! The media engine rejects an answer whose m-lines are ordered differently
//! from the offer. We check the order up front so the failure is reported as
//! `OrderMismatch` instead of an opaque engine error.

use std::io::Cursor;

use webrtc::sdp::SessionDescription as SdpSession;

use super::types::{MediaDirection, MediaKind, MediaLine};
use crate::error::{AppError, NegotiationFailure, Result};

/// Media lines found in an SDP body, in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpMediaLines {
    pub kinds: Vec<MediaKind>,
    pub directions: Vec<Option<MediaDirection>>,
}

/// Parse an SDP body and list its audio/video media lines
///
/// Application (data channel) sections are skipped.
pub fn parse_media_lines(sdp: &str) -> Result<SdpMediaLines> {
    let trimmed = sdp.trim_start();
    if !trimmed.starts_with("v=") {
        return Err(AppError::negotiation(
            NegotiationFailure::ParseError,
            "session description does not start with v=",
        ));
    }

    let mut reader = Cursor::new(trimmed.as_bytes());
    let session = SdpSession::unmarshal(&mut reader).map_err(|e| {
        AppError::negotiation(
            NegotiationFailure::ParseError,
            format!("invalid session description: {}", e),
        )
    })?;

    let mut kinds = Vec::new();
    let mut directions = Vec::new();
    for media in &session.media_descriptions {
        let Some(kind) = MediaKind::from_sdp_media(&media.media_name.media) else {
            continue;
        };
        let direction = media.attributes.iter().find_map(|attr| match attr.key.as_str() {
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "sendrecv" => Some(MediaDirection::SendRecv),
            _ => None,
        });
        kinds.push(kind);
        directions.push(direction);
    }

    if kinds.is_empty() {
        return Err(AppError::negotiation(
            NegotiationFailure::ParseError,
            "session description has no audio or video media lines",
        ));
    }

    Ok(SdpMediaLines { kinds, directions })
}

/// Check that the remote media lines follow our registration order
///
/// The remote side may omit trailing lines it does not support, but it must
/// never reorder them.
pub fn check_media_order(registered: &[MediaLine], remote: &SdpMediaLines) -> Result<()> {
    let expected: Vec<MediaKind> = registered.iter().map(|line| line.kind).collect();

    if remote.kinds.len() > expected.len() || expected[..remote.kinds.len()] != remote.kinds[..] {
        return Err(AppError::negotiation(
            NegotiationFailure::OrderMismatch,
            format!(
                "remote m-lines {:?} do not match registered order {:?}",
                remote.kinds, expected
            ),
        ));
    }

    Ok(())
}
