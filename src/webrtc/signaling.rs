//! Signaling message shapes and the transport seam
//!
//! Two server dialects are spoken:
//! - SRS (`/rtc/v1/play/`, `/rtc/v1/publish/`): JSON body `{api, streamurl, sdp}`,
//!   reply `{code, sdp}`.
//! - xrtc (`/signaling/pull`): parameters in the query string, reply
//!   `{errNo, errMsg, data: {type, sdp}}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::types::SessionDescription;

/// Signaling failure, distinguished by where it happened
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// Well-formed reply with a non-zero status code
    #[error("rejected by signaling server (code {code}): {message}")]
    Rejected { code: i64, message: String },
    /// Reply body is not a well-formed document
    #[error("unparseable signaling reply: {0}")]
    Unparseable(String),
    /// Connection-level failure
    #[error("signaling transport failure: {0}")]
    Transport(String),
}

/// Request/response exchange with the signaling server
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Send a local offer and return the remote answer body
    async fn exchange_offer(
        &self,
        offer: &SessionDescription,
    ) -> std::result::Result<String, SignalingError>;

    /// Ask the server for a remote offer (remote side proposes first)
    async fn request_offer(&self) -> std::result::Result<String, SignalingError>;

    /// Deliver the local answer for a previously pulled remote offer
    async fn send_answer(
        &self,
        answer: &SessionDescription,
    ) -> std::result::Result<(), SignalingError>;
}

/// SRS play/publish request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    /// API URL the request is posted to
    pub api: String,
    /// Stream URL, e.g. `webrtc://host/live/livestream`
    pub streamurl: String,
    /// Local offer
    pub sdp: String,
    /// Transaction id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
}

/// xrtc query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub uid: u64,
    pub stream_name: String,
    pub audio: bool,
    pub video: bool,
}

impl PullRequest {
    /// Query string for the offer request
    pub fn offer_query(&self) -> String {
        format!(
            "uid={}&streamName={}&audio={}&video={}",
            self.uid,
            urlencoding::encode(&self.stream_name),
            self.audio as u8,
            self.video as u8
        )
    }

    /// Query string delivering the local answer
    pub fn answer_query(&self, answer: &str) -> String {
        format!(
            "uid={}&streamName={}&answer={}&type=pull",
            self.uid,
            urlencoding::encode(&self.stream_name),
            urlencoding::encode(answer)
        )
    }
}

/// Decoded signaling reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingReply {
    /// `code` (SRS) or `errNo` (xrtc); zero on success
    pub code: i64,
    /// `errMsg`/`msg` if present
    pub message: Option<String>,
    /// `sdp` at the top level or under `data`
    pub sdp: Option<String>,
}

impl SignalingReply {
    /// Parse a reply body
    ///
    /// A body that is not JSON, or has neither `code` nor `errNo`, is
    /// `Unparseable`. A non-zero status is `Rejected`.
    pub fn parse(body: &str) -> std::result::Result<Self, SignalingError> {
        let json: Value = serde_json::from_str(body)
            .map_err(|e| SignalingError::Unparseable(format!("{}: {}", e, truncate(body, 128))))?;

        let code = json
            .get("code")
            .or_else(|| json.get("errNo"))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                SignalingError::Unparseable(format!(
                    "reply has no code/errNo: {}",
                    truncate(body, 128)
                ))
            })?;

        let message = json
            .get("errMsg")
            .or_else(|| json.get("msg"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if code != 0 {
            return Err(SignalingError::Rejected {
                code,
                message: message.unwrap_or_default(),
            });
        }

        let sdp = json
            .get("sdp")
            .or_else(|| json.get("data").and_then(|d| d.get("sdp")))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self { code, message, sdp })
    }

    /// The SDP body, required for offer/answer replies
    pub fn require_sdp(self) -> std::result::Result<String, SignalingError> {
        self.sdp
            .ok_or_else(|| SignalingError::Unparseable("reply carries no sdp".to_string()))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_srs_reply() {
        let reply = SignalingReply::parse(r#"{"code":0,"server":"vid-1","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(reply.code, 0);
        assert_eq!(reply.require_sdp().unwrap(), "v=0\r\n");
    }

    #[test]
    fn test_parse_xrtc_reply() {
        let body = r#"{"errNo":0,"errMsg":"success","data":{"type":"offer","sdp":"v=0"}}"#;
        let reply = SignalingReply::parse(body).unwrap();
        assert_eq!(reply.message.as_deref(), Some("success"));
        assert_eq!(reply.sdp.as_deref(), Some("v=0"));
    }

    #[test]
    fn test_parse_rejected() {
        let err = SignalingReply::parse(r#"{"code":1}"#).unwrap_err();
        assert_eq!(
            err,
            SignalingError::Rejected {
                code: 1,
                message: String::new()
            }
        );

        let err = SignalingReply::parse(r#"{"errNo":-1,"errMsg":"no stream"}"#).unwrap_err();
        assert!(matches!(err, SignalingError::Rejected { code: -1, ref message } if message == "no stream"));
    }

    #[test]
    fn test_parse_unparseable() {
        assert!(matches!(
            SignalingReply::parse("<html>502</html>"),
            Err(SignalingError::Unparseable(_))
        ));
        assert!(matches!(
            SignalingReply::parse(r#"{"sdp":"v=0"}"#),
            Err(SignalingError::Unparseable(_))
        ));
        let reply = SignalingReply::parse(r#"{"errNo":0}"#).unwrap();
        assert!(matches!(reply.require_sdp(), Err(SignalingError::Unparseable(_))));
    }

    #[test]
    fn test_offer_request_shape() {
        let req = OfferRequest {
            api: "http://127.0.0.1:1985/rtc/v1/play/".to_string(),
            streamurl: "webrtc://127.0.0.1/live/livestream".to_string(),
            sdp: "v=0".to_string(),
            tid: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["streamurl"], "webrtc://127.0.0.1/live/livestream");
        assert_eq!(json["sdp"], "v=0");
        assert!(json.get("tid").is_none());
    }

    #[test]
    fn test_pull_queries() {
        let req = PullRequest {
            uid: 111,
            stream_name: "xrtc 1992".to_string(),
            audio: true,
            video: true,
        };
        assert_eq!(req.offer_query(), "uid=111&streamName=xrtc%201992&audio=1&video=1");
        let q = req.answer_query("v=0\r\n");
        assert!(q.starts_with("uid=111&streamName=xrtc%201992&answer=v%3D0%0D%0A"));
        assert!(q.ends_with("&type=pull"));
    }
}
