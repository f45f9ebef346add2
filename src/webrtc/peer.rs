//! WebRTC peer connection adapter
//!
//! [`WebRtcEngine`] implements [`MediaEngine`] over `webrtc-rs`. Callbacks from
//! the peer connection are translated into [`EngineEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use super::engine::{EngineEvent, MediaEngine, RawStatsReport};
use super::types::{MediaDirection, MediaKind, MediaLine, SdpKind, SessionDescription, TrackHandle};
use crate::config::WebRtcConfig;
use crate::error::{AppError, Result};

/// Upper bound on waiting for ICE gathering before the local description is sent
const GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// Media engine backed by an `RTCPeerConnection`
pub struct WebRtcEngine {
    config: WebRtcConfig,
    pc: RwLock<Option<Arc<RTCPeerConnection>>>,
    events: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

impl WebRtcEngine {
    pub fn new(config: WebRtcConfig) -> Self {
        Self {
            config,
            pc: RwLock::new(None),
            events: Mutex::new(None),
        }
    }

    fn peer(&self) -> Result<Arc<RTCPeerConnection>> {
        self.pc
            .read()
            .clone()
            .ok_or_else(|| AppError::Engine("media session not created".to_string()))
    }

    fn event_sender(&self) -> Result<mpsc::UnboundedSender<EngineEvent>> {
        self.events
            .lock()
            .clone()
            .ok_or_else(|| AppError::Engine("media session not created".to_string()))
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers = vec![];

        for stun_url in &self.config.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }

        for turn in &self.config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        ice_servers
    }

    fn setup_event_handlers(pc: &RTCPeerConnection, events: mpsc::UnboundedSender<EngineEvent>) {
        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                info!("Peer connection state: {}", s);
                if s == RTCPeerConnectionState::Failed {
                    let _ = events.send(EngineEvent::NegotiationFailed(
                        "peer connection failed".to_string(),
                    ));
                }
            })
        }));

        pc.on_ice_connection_state_change(Box::new(move |state| {
            Box::pin(async move {
                debug!("[ICE] connection state: {:?}", state);
            })
        }));

        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        RTPCodecType::Video => MediaKind::Video,
                        _ => return,
                    };
                    let handle = TrackHandle::new(track_identity(&track), kind);
                    info!("Remote {} track {} (ssrc {})", kind, handle.id, track.ssrc());

                    let _ = events.send(EngineEvent::RemoteTrackAdded(handle.clone()));
                    tokio::spawn(drain_track(track, handle.id, events));
                })
            },
        ));
    }

    /// Create the offer or answer off the caller's task and post the result
    fn spawn_local_description(&self, kind: SdpKind) -> Result<()> {
        let pc = self.peer()?;
        let events = self.event_sender()?;

        tokio::spawn(async move {
            let created = match kind {
                SdpKind::Offer => pc.create_offer(None).await,
                SdpKind::Answer => pc.create_answer(None).await,
            };
            let event = match created {
                Ok(desc) => {
                    debug!("Created local {}:\n{}", kind, desc.sdp);
                    EngineEvent::LocalDescriptionReady(SessionDescription::new(kind, desc.sdp))
                }
                Err(e) => EngineEvent::NegotiationFailed(format!("create {} failed: {}", kind, e)),
            };
            let _ = events.send(event);
        });

        Ok(())
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_session(&self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<()> {
        if self.pc.read().is_some() {
            return Err(AppError::Engine("media session already created".to_string()));
        }

        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::Engine(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::Engine(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| AppError::Engine(format!("Failed to create peer connection: {}", e)))?;

        Self::setup_event_handlers(&pc, events.clone());

        *self.pc.write() = Some(Arc::new(pc));
        *self.events.lock() = Some(events);
        info!("Media session created");
        Ok(())
    }

    async fn add_media_line(&self, line: MediaLine) -> Result<()> {
        let pc = self.peer()?;
        let kind = match line.kind {
            MediaKind::Audio => RTPCodecType::Audio,
            MediaKind::Video => RTPCodecType::Video,
        };
        let direction = match line.direction {
            MediaDirection::SendOnly => RTCRtpTransceiverDirection::Sendonly,
            MediaDirection::RecvOnly => RTCRtpTransceiverDirection::Recvonly,
            MediaDirection::SendRecv => RTCRtpTransceiverDirection::Sendrecv,
        };

        pc.add_transceiver_from_kind(
            kind,
            Some(RTCRtpTransceiverInit {
                direction,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|e| AppError::Engine(format!("Failed to add {} transceiver: {}", line.kind, e)))?;

        debug!("Registered {} media line ({})", line.kind, line.direction);
        Ok(())
    }

    async fn create_offer(&self) -> Result<()> {
        self.spawn_local_description(SdpKind::Offer)
    }

    async fn create_answer(&self) -> Result<()> {
        self.spawn_local_description(SdpKind::Answer)
    }

    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<SessionDescription> {
        let pc = self.peer()?;
        let rtc_desc = to_rtc_description(desc)?;

        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(rtc_desc)
            .await
            .map_err(|e| AppError::Engine(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(GATHERING_TIMEOUT, gather_complete.recv())
            .await
            .is_err()
        {
            warn!("ICE gathering did not complete within {:?}", GATHERING_TIMEOUT);
        }

        Ok(match pc.local_description().await {
            Some(local) => SessionDescription::new(desc.kind(), local.sdp),
            None => desc.clone(),
        })
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        let pc = self.peer()?;
        let rtc_desc = to_rtc_description(desc)?;

        pc.set_remote_description(rtc_desc)
            .await
            .map_err(|e| AppError::Engine(format!("Failed to set remote description: {}", e)))
    }

    async fn get_stats(&self) -> Result<RawStatsReport> {
        let pc = self.peer()?;
        let report = pc.get_stats().await;

        let entries = report
            .reports
            .values()
            .map(stats_entry_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(RawStatsReport { entries })
    }

    async fn teardown(&self) -> Result<()> {
        self.events.lock().take();
        let pc = self.pc.write().take();

        if let Some(pc) = pc {
            pc.close()
                .await
                .map_err(|e| AppError::Engine(format!("Failed to close peer connection: {}", e)))?;
            info!("Media session closed");
        }
        Ok(())
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = desc.sdp().to_string();
    match desc.kind() {
        SdpKind::Offer => RTCSessionDescription::offer(sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp),
    }
    .map_err(|e| AppError::Engine(format!("Invalid {}: {}", desc.kind(), e)))
}

/// Serialize one report entry
///
/// webrtc-rs fills `roundTripTime` of the remote RTP entries in milliseconds
/// (not W3C seconds), so it is exposed as `rttMs` instead.
fn stats_entry_json(entry: &StatsReportType) -> Result<String> {
    let mut value = serde_json::to_value(entry)?;
    if matches!(
        entry,
        StatsReportType::RemoteInboundRTP(_) | StatsReportType::RemoteOutboundRTP(_)
    ) {
        if let Some(obj) = value.as_object_mut() {
            if let Some(rtt) = obj.remove("roundTripTime") {
                obj.insert("rttMs".to_string(), rtt);
            }
        }
    }
    Ok(serde_json::to_string(&value)?)
}

/// Stable identity for a remote track: stream id + track id, falling back to the SSRC
fn track_identity(track: &TrackRemote) -> String {
    let id = track.id();
    if id.is_empty() {
        format!("ssrc-{}", track.ssrc())
    } else {
        format!("{}/{}", track.stream_id(), id)
    }
}

/// Read RTP until the track ends, then report its removal
///
/// Depacketization and decoding happen outside this crate; packets are only
/// pulled so the receiver's buffers do not fill up.
async fn drain_track(
    track: Arc<TrackRemote>,
    track_id: String,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let mut packets: u64 = 0;
    while track.read_rtp().await.is_ok() {
        packets += 1;
    }
    debug!("Remote track {} ended after {} packets", track_id, packets);
    let _ = events.send(EngineEvent::RemoteTrackRemoved(track_id));
}
