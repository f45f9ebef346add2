//! HTTP signaling transport (SRS and xrtc dialects)

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::signaling::{OfferRequest, PullRequest, SignalingError, SignalingReply, SignalingTransport};
use super::types::{MediaDirection, MediaDirections, SessionDescription};
use crate::config::{SignalingConfig, SignalingMode};
use crate::error::{AppError, Result};
use crate::utils::rand_string;

/// Signaling over HTTP POST
pub struct HttpSignalingTransport {
    client: reqwest::Client,
    mode: SignalingMode,
    api_url: String,
    stream_url: String,
    pull: PullRequest,
}

impl HttpSignalingTransport {
    pub fn new(config: &SignalingConfig, directions: MediaDirections) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let uid = config.uid.unwrap_or_else(|| u64::from(rand::random::<u32>()));
        let receives = |d: MediaDirection| d != MediaDirection::SendOnly;

        Ok(Self {
            client,
            mode: config.mode,
            api_url: config.effective_api_url().to_string(),
            stream_url: config.stream_url.clone(),
            pull: PullRequest {
                uid,
                stream_name: config.stream_name.clone(),
                audio: receives(directions.audio),
                video: receives(directions.video),
            },
        })
    }

    fn url_with_query(&self, query: &str) -> String {
        let sep = if self.api_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.api_url, sep, query)
    }

    async fn post(&self, request: reqwest::RequestBuilder) -> std::result::Result<SignalingReply, SignalingError> {
        let response = request
            .send()
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SignalingError::Transport(e.to_string()))?;
        debug!("Signaling response ({}): {}", status, body);

        SignalingReply::parse(&body)
    }
}

#[async_trait]
impl SignalingTransport for HttpSignalingTransport {
    async fn exchange_offer(
        &self,
        offer: &SessionDescription,
    ) -> std::result::Result<String, SignalingError> {
        if self.mode == SignalingMode::Pull {
            return Err(SignalingError::Transport(
                "pull signaling does not accept local offers".to_string(),
            ));
        }

        let body = OfferRequest {
            api: self.api_url.clone(),
            streamurl: self.stream_url.clone(),
            sdp: offer.sdp().to_string(),
            tid: Some(rand_string(7)),
        };
        info!("Posting {} offer to {} ({})", self.mode, self.api_url, self.stream_url);

        let reply = self.post(self.client.post(&self.api_url).json(&body)).await?;
        reply.require_sdp()
    }

    async fn request_offer(&self) -> std::result::Result<String, SignalingError> {
        let url = self.url_with_query(&self.pull.offer_query());
        info!("Requesting remote offer: {}", url);

        let reply = self.post(self.client.post(&url)).await?;
        reply.require_sdp()
    }

    async fn send_answer(
        &self,
        answer: &SessionDescription,
    ) -> std::result::Result<(), SignalingError> {
        let url = self.url_with_query(&self.pull.answer_query(answer.sdp()));
        info!(
            "Delivering answer for stream {} (uid {})",
            self.pull.stream_name, self.pull.uid
        );

        self.post(self.client.post(&url)).await?;
        Ok(())
    }
}
