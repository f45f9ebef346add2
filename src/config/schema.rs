use serde::{Deserialize, Serialize};

use crate::webrtc::types::{MediaDirection, MediaDirections};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Signaling server settings
    pub signaling: SignalingConfig,
    /// Media line directions
    pub media: MediaConfig,
    /// ICE servers
    pub webrtc: WebRtcConfig,
    /// Statistics polling
    pub stats: StatsConfig,
    /// Headless display surface
    pub display: DisplayConfig,
}

impl AppConfig {
    /// Media directions, falling back to the mode's defaults
    pub fn media_directions(&self) -> MediaDirections {
        let defaults = self.signaling.mode.default_directions();
        MediaDirections::new(
            self.media.audio.unwrap_or(defaults.audio),
            self.media.video.unwrap_or(defaults.video),
        )
    }
}

/// Which side proposes first and which server dialect is spoken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMode {
    /// SRS play: we offer, receive only
    #[default]
    Play,
    /// SRS publish: we offer, send only
    Publish,
    /// xrtc pull: remote offers, we answer
    Pull,
}

impl SignalingMode {
    /// Whether this side creates the offer
    pub fn is_offerer(&self) -> bool {
        !matches!(self, SignalingMode::Pull)
    }

    pub fn default_directions(&self) -> MediaDirections {
        match self {
            SignalingMode::Play | SignalingMode::Pull => MediaDirections::recv_only(),
            SignalingMode::Publish => MediaDirections::send_only(),
        }
    }

    /// Default API endpoint for the mode
    pub fn default_api_url(&self) -> &'static str {
        match self {
            SignalingMode::Play => "http://127.0.0.1:1985/rtc/v1/play/",
            SignalingMode::Publish => "http://127.0.0.1:1985/rtc/v1/publish/",
            SignalingMode::Pull => "http://127.0.0.1:8080/signaling/pull",
        }
    }
}

impl std::fmt::Display for SignalingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalingMode::Play => write!(f, "play"),
            SignalingMode::Publish => write!(f, "publish"),
            SignalingMode::Pull => write!(f, "pull"),
        }
    }
}

/// Signaling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub mode: SignalingMode,
    /// API URL; empty means the mode's default
    pub api_url: String,
    /// SRS stream URL
    pub stream_url: String,
    /// xrtc stream name
    pub stream_name: String,
    /// xrtc user id; random when unset
    pub uid: Option<u64>,
    /// HTTP request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            mode: SignalingMode::Play,
            api_url: String::new(),
            stream_url: "webrtc://127.0.0.1/live/livestream".to_string(),
            stream_name: "livestream".to_string(),
            uid: None,
            timeout_ms: 10_000,
        }
    }
}

impl SignalingConfig {
    pub fn effective_api_url(&self) -> &str {
        if self.api_url.trim().is_empty() {
            self.mode.default_api_url()
        } else {
            &self.api_url
        }
    }
}

/// Media line directions (unset = mode default)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: Option<MediaDirection>,
    pub video: Option<MediaDirection>,
}

/// WebRTC configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Statistics polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

/// Headless display surface size
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}
