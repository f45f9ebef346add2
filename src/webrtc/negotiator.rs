//! Session negotiation state machine
//!
//! One [`SessionNegotiator`] drives one media session from `Idle` to
//! `Negotiated` or `Failed`, exactly once. All state mutations happen on the
//! task that owns the negotiator; the engine's notifications arrive as
//! [`EngineEvent`]s on a single channel and are applied in order.
//!
//! Offerer (play, publish):
//! ```text
//! Idle -> CreatingOffer -> AwaitingRemoteAnswer -> Negotiated
//!          create_offer     offer sent,            answer applied
//!                           answer received
//! ```
//! Answerer (pull):
//! ```text
//! Idle -> AwaitingRemoteAnswer -> (offer applied, answer requested) -> Negotiated
//!          remote offer pulled                                         answer sent
//! ```
//! Every failure is terminal. Teardown is valid from any state.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{EngineEvent, MediaEngine};
use super::sdp::{check_media_order, parse_media_lines};
use super::signaling::SignalingTransport;
use super::types::{
    MediaDirection, MediaDirections, MediaLine, NegotiationState, SdpKind, SessionDescription,
    TrackHandle,
};
use crate::config::SignalingMode;
use crate::error::{AppError, NegotiationFailure, Result};
use crate::events::{EventBus, SessionEvent};

/// Track id used for the locally captured video shown as the thumbnail
pub const LOCAL_VIDEO_TRACK_ID: &str = "local-video";

/// Receiver of video tracks accepted by the negotiator
pub trait TrackRenderer: Send + Sync {
    /// Begin rendering a remote video track
    fn start_remote_renderer(&self, track: &TrackHandle);

    fn stop_remote_renderer(&self, track_id: &str);

    /// Begin rendering the local (outgoing) video track
    fn start_local_renderer(&self, track: &TrackHandle);

    fn stop_local_renderer(&self, track_id: &str);
}

/// Drives one session through offer/answer
pub struct SessionNegotiator {
    session_id: String,
    mode: SignalingMode,
    engine: Arc<dyn MediaEngine>,
    transport: Arc<dyn SignalingTransport>,
    renderer: Option<Arc<dyn TrackRenderer>>,
    events: Option<Arc<EventBus>>,
    state_tx: watch::Sender<NegotiationState>,
    registered: Vec<MediaLine>,
    remote_applied: bool,
    tracks: HashSet<String>,
    local_track: Option<TrackHandle>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    engine_rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,
}

impl SessionNegotiator {
    pub fn new(
        mode: SignalingMode,
        engine: Arc<dyn MediaEngine>,
        transport: Arc<dyn SignalingTransport>,
    ) -> Self {
        let (state_tx, _) = watch::channel(NegotiationState::Idle);
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            mode,
            engine,
            transport,
            renderer: None,
            events: None,
            state_tx,
            registered: Vec::new(),
            remote_applied: false,
            tracks: HashSet::new(),
            local_track: None,
            engine_tx,
            engine_rx: Some(engine_rx),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TrackRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mode(&self) -> SignalingMode {
        self.mode
    }

    pub fn state(&self) -> NegotiationState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    /// Media lines in registration order
    pub fn registered_lines(&self) -> &[MediaLine] {
        &self.registered
    }

    /// Remote tracks accepted so far
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn set_state(&self, state: NegotiationState) {
        let previous = self.state_tx.send_replace(state);
        if previous == state {
            return;
        }
        info!("Session {} state: {} -> {}", self.session_id, previous, state);
        if let Some(ref events) = self.events {
            events.publish(SessionEvent::state_changed(&self.session_id, state));
        }
    }

    /// Enter `Failed` and build the error surfaced to the caller
    fn fail(&self, reason: NegotiationFailure, detail: impl Into<String>) -> AppError {
        let detail = detail.into();
        error!("Session {} negotiation failed ({}): {}", self.session_id, reason, detail);
        self.set_state(NegotiationState::Failed(reason));
        AppError::negotiation(reason, detail)
    }

    fn invalid_state(&self, operation: &str) -> AppError {
        AppError::InvalidState(format!("{} not valid in state {}", operation, self.state()))
    }

    /// Construct the engine session, register media lines and start negotiating
    ///
    /// Offerers request an offer from the engine; the answerer pulls the
    /// remote offer from the signaling server. May be called once.
    pub async fn initialize(&mut self, directions: MediaDirections) -> Result<()> {
        if self.state() != NegotiationState::Idle || !self.registered.is_empty() {
            return Err(self.invalid_state("initialize"));
        }

        if self.mode.is_offerer() {
            self.set_state(NegotiationState::CreatingOffer);
        }

        if let Err(e) = self.engine.create_session(self.engine_tx.clone()).await {
            return Err(self.fail(NegotiationFailure::EngineFailure, e.to_string()));
        }

        for line in directions.media_lines() {
            if let Err(e) = self.engine.add_media_line(line).await {
                return Err(self.fail(NegotiationFailure::EngineFailure, e.to_string()));
            }
            self.registered.push(line);
        }
        info!(
            "Session {} ({}) registered audio:{} video:{}",
            self.session_id, self.mode, directions.audio, directions.video
        );

        if directions.video != MediaDirection::RecvOnly {
            let track = TrackHandle::video(LOCAL_VIDEO_TRACK_ID);
            if let Some(ref renderer) = self.renderer {
                renderer.start_local_renderer(&track);
            }
            self.local_track = Some(track);
        }

        if self.mode.is_offerer() {
            if let Err(e) = self.engine.create_offer().await {
                return Err(self.fail(NegotiationFailure::EngineFailure, e.to_string()));
            }
            return Ok(());
        }

        self.set_state(NegotiationState::AwaitingRemoteAnswer);
        match self.transport.request_offer().await {
            Ok(offer) => self.on_remote_description_received(&offer, SdpKind::Offer).await,
            Err(e) => Err(self.fail(NegotiationFailure::from(&e), e.to_string())),
        }
    }

    /// The engine finished creating an offer or answer
    pub async fn on_local_description_ready(&mut self, desc: SessionDescription) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            debug!("Ignoring local {} in state {}", desc.kind(), state);
            return Ok(());
        }

        match (desc.kind(), state) {
            (SdpKind::Offer, NegotiationState::Idle | NegotiationState::CreatingOffer)
                if self.mode.is_offerer() =>
            {
                let local = match self.engine.set_local_description(&desc).await {
                    Ok(local) => local,
                    Err(e) => return Err(self.fail(NegotiationFailure::EngineFailure, e.to_string())),
                };
                self.set_state(NegotiationState::AwaitingRemoteAnswer);
                debug!("Local offer:\n{}", local.sdp());

                match self.transport.exchange_offer(&local).await {
                    Ok(answer) => self.on_remote_description_received(&answer, SdpKind::Answer).await,
                    Err(e) => Err(self.fail(NegotiationFailure::from(&e), e.to_string())),
                }
            }
            (SdpKind::Answer, NegotiationState::AwaitingRemoteAnswer)
                if !self.mode.is_offerer() && self.remote_applied =>
            {
                let local = match self.engine.set_local_description(&desc).await {
                    Ok(local) => local,
                    Err(e) => return Err(self.fail(NegotiationFailure::EngineFailure, e.to_string())),
                };
                debug!("Local answer:\n{}", local.sdp());

                if let Err(e) = self.transport.send_answer(&local).await {
                    return Err(self.fail(NegotiationFailure::from(&e), e.to_string()));
                }
                self.set_state(NegotiationState::Negotiated);
                Ok(())
            }
            (kind, _) => Err(self.invalid_state(&format!("local {}", kind))),
        }
    }

    /// Parse, check and apply a remote description
    ///
    /// A remote answer completes negotiation. A remote offer is applied and
    /// an answer is requested from the engine.
    pub async fn on_remote_description_received(&mut self, text: &str, kind: SdpKind) -> Result<()> {
        let state = self.state();
        if state != NegotiationState::AwaitingRemoteAnswer || self.remote_applied {
            return Err(self.invalid_state(&format!("remote {}", kind)));
        }
        let expected = if self.mode.is_offerer() {
            SdpKind::Answer
        } else {
            SdpKind::Offer
        };
        if kind != expected {
            return Err(self.invalid_state(&format!("remote {}", kind)));
        }

        let lines = match parse_media_lines(text) {
            Ok(lines) => lines,
            Err(e) => return Err(self.fail(NegotiationFailure::ParseError, e.to_string())),
        };
        if let Err(e) = check_media_order(&self.registered, &lines) {
            return Err(self.fail(NegotiationFailure::OrderMismatch, e.to_string()));
        }

        let remote = SessionDescription::new(kind, text);
        if let Err(e) = self.engine.set_remote_description(&remote).await {
            return Err(self.fail(NegotiationFailure::EngineFailure, e.to_string()));
        }
        self.remote_applied = true;
        info!(
            "Session {} applied remote {} ({:?})",
            self.session_id, kind, lines.kinds
        );

        match kind {
            SdpKind::Answer => {
                self.set_state(NegotiationState::Negotiated);
                Ok(())
            }
            SdpKind::Offer => {
                if let Err(e) = self.engine.create_answer().await {
                    return Err(self.fail(NegotiationFailure::EngineFailure, e.to_string()));
                }
                Ok(())
            }
        }
    }

    /// A remote track appeared. Video tracks go to the renderer, once per id.
    pub fn on_track_added(&mut self, track: TrackHandle) -> Result<()> {
        let state = self.state();
        if state.is_terminal() || !self.remote_applied {
            debug!("Ignoring track {} in state {}", track.id, state);
            return Ok(());
        }
        if !self.tracks.insert(track.id.clone()) {
            debug!("Track {} already registered", track.id);
            return Ok(());
        }

        let rendered = track.is_video() && self.renderer.is_some();
        if track.is_video() {
            if let Some(ref renderer) = self.renderer {
                renderer.start_remote_renderer(&track);
            }
        }
        info!(
            "Session {} accepted {} track {} (rendered: {})",
            self.session_id, track.kind, track.id, rendered
        );

        if let Some(ref events) = self.events {
            events.publish(SessionEvent::TrackRendered {
                session_id: self.session_id.clone(),
                track_id: track.id.clone(),
                kind: track.kind,
                rendered,
            });
        }
        Ok(())
    }

    /// A remote track ended
    pub fn on_track_removed(&mut self, track_id: &str) {
        if !self.tracks.remove(track_id) {
            return;
        }
        if let Some(ref renderer) = self.renderer {
            renderer.stop_remote_renderer(track_id);
        }
        info!("Session {} removed track {}", self.session_id, track_id);
    }

    /// The engine reported a failure. Terminal.
    pub fn on_negotiation_failed(&mut self, detail: &str) -> Result<()> {
        if self.state().is_terminal() {
            debug!("Ignoring engine failure in state {}: {}", self.state(), detail);
            return Ok(());
        }
        Err(self.fail(NegotiationFailure::EngineFailure, detail))
    }

    /// Dispatch one engine notification
    pub async fn handle_event(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::LocalDescriptionReady(desc) => self.on_local_description_ready(desc).await,
            EngineEvent::RemoteTrackAdded(track) => self.on_track_added(track),
            EngineEvent::RemoteTrackRemoved(id) => {
                self.on_track_removed(&id);
                Ok(())
            }
            EngineEvent::NegotiationFailed(detail) => self.on_negotiation_failed(&detail),
        }
    }

    /// Next pending engine notification, if the receiver is still owned here
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.engine_rx.as_mut()?.recv().await
    }

    /// Release the engine session and the renderers this session owns
    ///
    /// Valid from any state, including `Failed`, and idempotent.
    pub async fn teardown(&mut self) {
        if self.state() == NegotiationState::TornDown {
            return;
        }

        if let Some(ref renderer) = self.renderer {
            for id in self.tracks.drain() {
                renderer.stop_remote_renderer(&id);
            }
            if let Some(track) = self.local_track.take() {
                renderer.stop_local_renderer(&track.id);
            }
        }
        self.tracks.clear();

        if let Err(e) = self.engine.teardown().await {
            warn!("Session {} engine teardown failed: {}", self.session_id, e);
        }
        self.set_state(NegotiationState::TornDown);
    }

    /// Process engine notifications until negotiation fails or `cancel` fires,
    /// then tear down. Returns the last state before teardown.
    pub async fn run(mut self, cancel: CancellationToken) -> NegotiationState {
        let Some(mut engine_rx) = self.engine_rx.take() else {
            self.teardown().await;
            return self.state();
        };

        while !self.state().is_terminal() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Session {} cancelled", self.session_id);
                    break;
                }
                event = engine_rx.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle_event(event).await {
                        if matches!(e, AppError::InvalidState(_)) {
                            warn!("Session {}: {}", self.session_id, e);
                        }
                    }
                }
            }
        }

        let last = self.state();
        self.teardown().await;
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::engine::fake::FakeEngine;
    use crate::webrtc::sdp::fixtures;
    use crate::webrtc::signaling::{SignalingError, SignalingReply};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    /// Transport returning canned reply bodies
    struct FakeTransport {
        offer_reply: std::result::Result<String, SignalingError>,
        pulled_offer: std::result::Result<String, SignalingError>,
        sent: Mutex<Vec<SessionDescription>>,
    }

    impl FakeTransport {
        fn answering(body: &str) -> Self {
            Self {
                offer_reply: Ok(body.to_string()),
                pulled_offer: Err(SignalingError::Transport("unused".to_string())),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn offering(body: &str) -> Self {
            Self {
                offer_reply: Err(SignalingError::Transport("unused".to_string())),
                pulled_offer: Ok(body.to_string()),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SignalingTransport for FakeTransport {
        async fn exchange_offer(
            &self,
            offer: &SessionDescription,
        ) -> std::result::Result<String, SignalingError> {
            self.sent.lock().push(offer.clone());
            SignalingReply::parse(self.offer_reply.clone()?.as_str())?.require_sdp()
        }

        async fn request_offer(&self) -> std::result::Result<String, SignalingError> {
            SignalingReply::parse(self.pulled_offer.clone()?.as_str())?.require_sdp()
        }

        async fn send_answer(
            &self,
            answer: &SessionDescription,
        ) -> std::result::Result<(), SignalingError> {
            self.sent.lock().push(answer.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        remote: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
        local: Mutex<Vec<String>>,
    }

    impl TrackRenderer for RecordingRenderer {
        fn start_remote_renderer(&self, track: &TrackHandle) {
            self.remote.lock().push(track.id.clone());
        }

        fn stop_remote_renderer(&self, track_id: &str) {
            self.stopped.lock().push(track_id.to_string());
        }

        fn start_local_renderer(&self, track: &TrackHandle) {
            self.local.lock().push(track.id.clone());
        }

        fn stop_local_renderer(&self, _track_id: &str) {}
    }

    fn srs_reply(sdp: &str) -> String {
        serde_json::json!({ "code": 0, "sdp": sdp }).to_string()
    }

    fn xrtc_offer(sdp: &str) -> String {
        serde_json::json!({ "errNo": 0, "errMsg": "success", "data": { "type": "offer", "sdp": sdp } })
            .to_string()
    }

    struct Harness {
        engine: Arc<FakeEngine>,
        transport: Arc<FakeTransport>,
        renderer: Arc<RecordingRenderer>,
        negotiator: SessionNegotiator,
    }

    fn harness(mode: SignalingMode, transport: FakeTransport) -> Harness {
        let engine = Arc::new(FakeEngine::new());
        let transport = Arc::new(transport);
        let renderer = Arc::new(RecordingRenderer::default());
        let negotiator = SessionNegotiator::new(mode, engine.clone(), transport.clone())
            .with_renderer(renderer.clone());
        Harness {
            engine,
            transport,
            renderer,
            negotiator,
        }
    }

    /// Initialize and apply the engine's offer
    async fn negotiate(h: &mut Harness, directions: MediaDirections) -> Result<()> {
        h.negotiator.initialize(directions).await?;
        assert_eq!(h.negotiator.state(), NegotiationState::CreatingOffer);
        let event = h.negotiator.next_event().await.unwrap();
        h.negotiator.handle_event(event).await
    }

    #[tokio::test]
    async fn test_end_to_end_play() {
        let mut h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply(&fixtures::answer_audio_video())),
        );
        let mut states = h.negotiator.subscribe_state();

        negotiate(&mut h, MediaDirections::recv_only()).await.unwrap();
        assert_eq!(h.negotiator.state(), NegotiationState::Negotiated);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), NegotiationState::Negotiated);

        assert_eq!(
            h.engine.calls(),
            vec![
                "create_session",
                "add_media_line:audio:recvonly",
                "add_media_line:video:recvonly",
                "create_offer",
                "set_local_description:offer",
                "set_remote_description:answer",
            ]
        );
        assert_eq!(h.transport.sent.lock()[0].kind(), SdpKind::Offer);

        h.engine.emit(EngineEvent::RemoteTrackAdded(TrackHandle::video("v0")));
        h.engine.emit(EngineEvent::RemoteTrackAdded(TrackHandle::audio("a0")));
        for _ in 0..2 {
            let event = h.negotiator.next_event().await.unwrap();
            h.negotiator.handle_event(event).await.unwrap();
        }
        assert_eq!(*h.renderer.remote.lock(), vec!["v0"]);
        assert_eq!(h.negotiator.track_count(), 2);
        assert!(h.renderer.local.lock().is_empty());
    }

    #[tokio::test]
    async fn test_remote_video_reaches_compositor() {
        use crate::video::{I420Frame, VideoCompositor};

        let engine = Arc::new(FakeEngine::new());
        let transport = Arc::new(FakeTransport::answering(&srs_reply(
            &fixtures::answer_audio_video(),
        )));
        let compositor = Arc::new(VideoCompositor::new());
        let mut negotiator = SessionNegotiator::new(SignalingMode::Play, engine.clone(), transport)
            .with_renderer(compositor.clone());

        negotiator.initialize(MediaDirections::recv_only()).await.unwrap();
        let event = negotiator.next_event().await.unwrap();
        negotiator.handle_event(event).await.unwrap();
        assert_eq!(negotiator.state(), NegotiationState::Negotiated);

        engine.emit(EngineEvent::RemoteTrackAdded(TrackHandle::video("v0")));
        let event = negotiator.next_event().await.unwrap();
        negotiator.handle_event(event).await.unwrap();
        assert_eq!(compositor.remote_source().as_deref(), Some("v0"));

        compositor
            .on_frame("v0", &I420Frame::filled(640, 480, 235, 128, 128))
            .unwrap();
        let out = compositor.paint(640, 480);
        assert_eq!(out.placeholder, None);
        assert!(!out.is_letterboxed());
        assert_eq!(out.bitmap.pixel(320, 240), Some([255, 255, 255, 255]));

        negotiator.teardown().await;
        assert!(compositor.remote_source().is_none());
        assert!(!compositor.has_source("v0"));
    }

    #[tokio::test]
    async fn test_audio_registered_before_video_for_all_directions() {
        let all = [
            MediaDirection::SendOnly,
            MediaDirection::RecvOnly,
            MediaDirection::SendRecv,
        ];
        for audio in all {
            for video in all {
                let mut h = harness(
                    SignalingMode::Play,
                    FakeTransport::answering(&srs_reply(&fixtures::answer_video_audio())),
                );
                let err = negotiate(&mut h, MediaDirections::new(audio, video))
                    .await
                    .unwrap_err();

                let lines = h.engine.lines();
                assert_eq!(lines[0].kind, crate::webrtc::types::MediaKind::Audio);
                assert_eq!(lines[1].kind, crate::webrtc::types::MediaKind::Video);
                assert_eq!(h.negotiator.registered_lines(), &lines[..]);

                assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::OrderMismatch));
                assert_eq!(
                    h.negotiator.state(),
                    NegotiationState::Failed(NegotiationFailure::OrderMismatch)
                );
                assert!(!h.engine.calls().iter().any(|c| c.starts_with("set_remote")));
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_answer_is_parse_error() {
        let mut h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply("this is not sdp")),
        );
        let err = negotiate(&mut h, MediaDirections::recv_only()).await.unwrap_err();
        assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::ParseError));
        assert_eq!(
            h.negotiator.state(),
            NegotiationState::Failed(NegotiationFailure::ParseError)
        );
        assert!(!h.engine.calls().iter().any(|c| c.starts_with("set_remote")));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_parse_error() {
        let mut h = harness(SignalingMode::Play, FakeTransport::answering("<html>"));
        let err = negotiate(&mut h, MediaDirections::recv_only()).await.unwrap_err();
        assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::ParseError));
    }

    #[tokio::test]
    async fn test_rejected_by_signaling_ignores_tracks() {
        let mut h = harness(SignalingMode::Play, FakeTransport::answering(r#"{"code":1}"#));
        let err = negotiate(&mut h, MediaDirections::recv_only()).await.unwrap_err();
        assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::RejectedBySignaling));
        assert_eq!(
            h.negotiator.state(),
            NegotiationState::Failed(NegotiationFailure::RejectedBySignaling)
        );

        h.negotiator.on_track_added(TrackHandle::video("v0")).unwrap();
        assert!(h.renderer.remote.lock().is_empty());
        assert_eq!(h.negotiator.track_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_error() {
        let mut transport = FakeTransport::answering("");
        transport.offer_reply = Err(SignalingError::Transport("connection refused".to_string()));
        let mut h = harness(SignalingMode::Play, transport);
        let err = negotiate(&mut h, MediaDirections::recv_only()).await.unwrap_err();
        assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::TransportError));
    }

    #[tokio::test]
    async fn test_track_added_is_idempotent() {
        let mut h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply(&fixtures::answer_audio_video())),
        );
        negotiate(&mut h, MediaDirections::recv_only()).await.unwrap();

        let track = TrackHandle::video("v0");
        h.negotiator.on_track_added(track.clone()).unwrap();
        h.negotiator.on_track_added(track).unwrap();
        assert_eq!(*h.renderer.remote.lock(), vec!["v0"]);

        h.negotiator.on_track_removed("v0");
        h.negotiator.on_track_removed("v0");
        assert_eq!(*h.renderer.stopped.lock(), vec!["v0"]);
    }

    #[tokio::test]
    async fn test_track_before_remote_description_ignored() {
        let mut h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply(&fixtures::answer_audio_video())),
        );
        h.negotiator.initialize(MediaDirections::recv_only()).await.unwrap();
        h.negotiator.on_track_added(TrackHandle::video("v0")).unwrap();
        assert_eq!(h.negotiator.track_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_after_negotiated() {
        let mut h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply(&fixtures::answer_audio_video())),
        );
        negotiate(&mut h, MediaDirections::recv_only()).await.unwrap();

        let err = h
            .negotiator
            .handle_event(EngineEvent::NegotiationFailed("ice failed".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::EngineFailure));
        assert!(h.negotiator.state().is_terminal());

        // A second failure does not change the reason
        h.negotiator.on_negotiation_failed("again").unwrap();
        assert_eq!(
            h.negotiator.state(),
            NegotiationState::Failed(NegotiationFailure::EngineFailure)
        );
    }

    #[tokio::test]
    async fn test_engine_construction_failure() {
        let mut h = harness(SignalingMode::Play, FakeTransport::answering(""));
        h.engine.fail_create_session.store(true, Ordering::SeqCst);

        let err = h
            .negotiator
            .initialize(MediaDirections::recv_only())
            .await
            .unwrap_err();
        assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::EngineFailure));
    }

    #[tokio::test]
    async fn test_remote_apply_failure() {
        let mut h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply(&fixtures::answer_audio_video())),
        );
        h.engine.fail_remote.store(true, Ordering::SeqCst);
        let err = negotiate(&mut h, MediaDirections::recv_only()).await.unwrap_err();
        assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::EngineFailure));
    }

    #[tokio::test]
    async fn test_initialize_twice() {
        let mut h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply(&fixtures::answer_audio_video())),
        );
        h.negotiator.initialize(MediaDirections::recv_only()).await.unwrap();
        let err = h
            .negotiator
            .initialize(MediaDirections::recv_only())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(h.negotiator.state(), NegotiationState::CreatingOffer);
    }

    #[tokio::test]
    async fn test_remote_description_in_wrong_state() {
        let mut h = harness(SignalingMode::Play, FakeTransport::answering(""));
        let err = h
            .negotiator
            .on_remote_description_received(&fixtures::answer_audio_video(), SdpKind::Answer)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(h.negotiator.state(), NegotiationState::Idle);
    }

    #[tokio::test]
    async fn test_teardown_from_failed() {
        let mut h = harness(SignalingMode::Play, FakeTransport::answering(r#"{"code":400}"#));
        negotiate(&mut h, MediaDirections::recv_only()).await.unwrap_err();

        h.negotiator.teardown().await;
        assert_eq!(h.negotiator.state(), NegotiationState::TornDown);
        h.negotiator.teardown().await;
        assert_eq!(
            h.engine.calls().iter().filter(|c| *c == "teardown").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_teardown_releases_renderers() {
        let mut h = harness(
            SignalingMode::Publish,
            FakeTransport::answering(&srs_reply(&fixtures::media_sdp(&["audio", "video"], "recvonly"))),
        );
        negotiate(&mut h, MediaDirections::send_only()).await.unwrap();
        assert_eq!(*h.renderer.local.lock(), vec![LOCAL_VIDEO_TRACK_ID]);

        h.negotiator.on_track_added(TrackHandle::video("v0")).unwrap();
        h.negotiator.teardown().await;
        assert_eq!(*h.renderer.stopped.lock(), vec!["v0"]);
        assert_eq!(h.negotiator.track_count(), 0);
    }

    #[tokio::test]
    async fn test_pull_answerer_path() {
        let mut h = harness(
            SignalingMode::Pull,
            FakeTransport::offering(&xrtc_offer(&fixtures::offer_audio_video())),
        );
        h.negotiator.initialize(MediaDirections::recv_only()).await.unwrap();
        assert_eq!(h.negotiator.state(), NegotiationState::AwaitingRemoteAnswer);

        let event = h.negotiator.next_event().await.unwrap();
        assert!(matches!(
            event,
            EngineEvent::LocalDescriptionReady(ref d) if d.kind() == SdpKind::Answer
        ));
        h.negotiator.handle_event(event).await.unwrap();
        assert_eq!(h.negotiator.state(), NegotiationState::Negotiated);

        assert_eq!(
            h.engine.calls()[3..],
            [
                "set_remote_description:offer",
                "create_answer",
                "set_local_description:answer",
            ]
        );
        let sent = h.transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind(), SdpKind::Answer);
    }

    #[tokio::test]
    async fn test_pull_rejected() {
        let mut h = harness(
            SignalingMode::Pull,
            FakeTransport::offering(r#"{"errNo":-1,"errMsg":"stream not found"}"#),
        );
        let err = h
            .negotiator
            .initialize(MediaDirections::recv_only())
            .await
            .unwrap_err();
        assert_eq!(err.negotiation_failure(), Some(NegotiationFailure::RejectedBySignaling));
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply(&fixtures::answer_audio_video())),
        );
        let engine = h.engine.clone();
        let mut negotiator = h.negotiator;
        let mut states = negotiator.subscribe_state();
        negotiator.initialize(MediaDirections::recv_only()).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(negotiator.run(cancel.clone()));

        states
            .wait_for(|s| *s == NegotiationState::Negotiated)
            .await
            .unwrap();
        cancel.cancel();

        let last = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last, NegotiationState::Negotiated);
        assert_eq!(*states.borrow(), NegotiationState::TornDown);
        assert!(engine.calls().contains(&"teardown".to_string()));
    }

    #[tokio::test]
    async fn test_run_stops_on_failure() {
        let h = harness(SignalingMode::Play, FakeTransport::answering(r#"{"code":1}"#));
        let mut negotiator = h.negotiator;
        negotiator.initialize(MediaDirections::recv_only()).await.unwrap();

        let last = tokio::time::timeout(
            Duration::from_secs(1),
            negotiator.run(CancellationToken::new()),
        )
        .await
        .unwrap();
        assert_eq!(last, NegotiationState::Failed(NegotiationFailure::RejectedBySignaling));
    }

    #[tokio::test]
    async fn test_state_events_published() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let mut h = harness(
            SignalingMode::Play,
            FakeTransport::answering(&srs_reply(&fixtures::answer_audio_video())),
        );
        h.negotiator = h.negotiator.with_event_bus(bus);
        negotiate(&mut h, MediaDirections::recv_only()).await.unwrap();

        let mut names = Vec::new();
        while let Ok(SessionEvent::StateChanged { state, .. }) = rx.try_recv() {
            names.push(state.to_string());
        }
        assert_eq!(names, vec!["creating_offer", "awaiting_remote_answer", "negotiated"]);
    }
}
