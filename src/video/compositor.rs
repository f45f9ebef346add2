//! Video compositor
//!
//! Keeps one [`FrameBuffer`] per source, each behind its own lock, and
//! produces the display bitmap: the remote video scaled to fit and centered
//! on black, with the local video as a quarter-size thumbnail in the
//! bottom-right corner. Until remote video arrives a status message is shown.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use super::buffer::{Bitmap, FrameBuffer};
use super::frame::I420Frame;
use super::glyphs::draw_text_centered;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::utils::LogThrottler;
use crate::warn_throttled;
use crate::webrtc::negotiator::TrackRenderer;
use crate::webrtc::types::TrackHandle;

/// Thumbnails are drawn only when the destination exceeds this in both dimensions
pub const THUMBNAIL_MIN_DEST: u32 = 200;
/// Thumbnail distance from the remote image's bottom-right corner (before scaling)
pub const THUMBNAIL_MARGIN: u32 = 10;

const BLACK: [u8; 4] = [0, 0, 0, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Why the placeholder is shown instead of video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStatus {
    /// Neither local nor remote video has produced a frame
    NoVideoEitherWay,
    /// Local video is flowing but nothing has arrived from the remote side
    NoIncomingVideo,
}

impl PlaceholderStatus {
    pub fn text(&self) -> &'static str {
        match self {
            Self::NoVideoEitherWay => "Connecting... (no video streams either way)",
            Self::NoIncomingVideo => "Connecting... (no incoming video)",
        }
    }
}

/// Axis-aligned rectangle in destination pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Result of one compositing pass
#[derive(Debug, Clone)]
pub struct Composited {
    pub bitmap: Bitmap,
    /// Set when the status message was drawn
    pub placeholder: Option<PlaceholderStatus>,
    /// Where the remote image landed
    pub remote_rect: Option<Rect>,
    /// Where the local thumbnail landed
    pub thumbnail_rect: Option<Rect>,
}

impl Composited {
    /// Remote image leaves black bars in the destination
    pub fn is_letterboxed(&self) -> bool {
        match self.remote_rect {
            Some(rect) => {
                rect.x != 0
                    || rect.y != 0
                    || rect.width != self.bitmap.width()
                    || rect.height != self.bitmap.height()
            }
            None => false,
        }
    }
}

/// Uniform scale-to-fit of `src` into `dest`, centered
fn fit_rect(src: (u32, u32), dest: (u32, u32)) -> (Rect, f64) {
    let scale = f64::min(
        dest.0 as f64 / src.0 as f64,
        dest.1 as f64 / src.1 as f64,
    );
    let width = ((src.0 as f64 * scale).round() as u32).min(dest.0);
    let height = ((src.1 as f64 * scale).round() as u32).min(dest.1);
    let rect = Rect {
        x: (dest.0 - width) / 2,
        y: (dest.1 - height) / 2,
        width,
        height,
    };
    (rect, scale)
}

/// Per-source frame buffers and the compositing pass
pub struct VideoCompositor {
    sources: RwLock<HashMap<String, Arc<Mutex<FrameBuffer>>>>,
    remote_source: RwLock<Option<String>>,
    local_source: RwLock<Option<String>>,
    /// Sources that have produced a frame, kept after their buffers are removed
    seen_sources: RwLock<HashSet<String>>,
    redraw_tx: watch::Sender<u64>,
    events: Option<Arc<EventBus>>,
    throttler: LogThrottler,
}

impl VideoCompositor {
    pub fn new() -> Self {
        let (redraw_tx, _) = watch::channel(0);
        Self {
            sources: RwLock::new(HashMap::new()),
            remote_source: RwLock::new(None),
            local_source: RwLock::new(None),
            seen_sources: RwLock::new(HashSet::new()),
            redraw_tx,
            events: None,
            throttler: LogThrottler::new(Duration::from_secs(5)),
        }
    }

    /// Publish `video.frame_rejected` for dropped frames
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Redraw requests: the value increases with every accepted frame
    pub fn subscribe_redraw(&self) -> watch::Receiver<u64> {
        self.redraw_tx.subscribe()
    }

    fn buffer(&self, source_id: &str) -> Option<Arc<Mutex<FrameBuffer>>> {
        self.sources.read().get(source_id).cloned()
    }

    fn buffer_or_insert(&self, source_id: &str) -> Arc<Mutex<FrameBuffer>> {
        if let Some(buffer) = self.buffer(source_id) {
            return buffer;
        }
        let buffer = self
            .sources
            .write()
            .entry(source_id.to_string())
            .or_insert_with(|| {
                debug!("New frame buffer for {}", source_id);
                Arc::new(Mutex::new(FrameBuffer::new()))
            })
            .clone();
        self.seen_sources.write().insert(source_id.to_string());
        buffer
    }

    /// Convert a decoded frame into the source's buffer
    ///
    /// The frame is validated here once; conversion assumes a valid frame.
    /// Malformed frames are dropped with a (rate-limited) warning and the
    /// buffer keeps its previous contents.
    pub fn on_frame(&self, source_id: &str, frame: &I420Frame) -> Result<()> {
        if let Err(e) = frame.validate() {
            warn_throttled!(self.throttler, source_id, "Dropping frame from {}: {}", source_id, e);
            if let Some(ref events) = self.events {
                events.publish(SessionEvent::FrameRejected {
                    source_id: source_id.to_string(),
                    reason: e.to_string(),
                });
            }
            return Err(AppError::RenderFailed(e));
        }

        let buffer = self.buffer_or_insert(source_id);
        let reallocated = buffer.lock().write_frame(frame);
        if reallocated {
            let (width, height) = frame.display_size();
            info!("Source {} frame size now {}x{}", source_id, width, height);
        }

        self.redraw_tx.send_modify(|generation| *generation += 1);
        Ok(())
    }

    /// Drop a source's buffer
    pub fn remove_source(&self, source_id: &str) {
        if self.sources.write().remove(source_id).is_some() {
            self.throttler.clear(source_id);
            debug!("Removed frame buffer for {}", source_id);
            self.redraw_tx.send_modify(|generation| *generation += 1);
        }
    }

    pub fn has_source(&self, source_id: &str) -> bool {
        self.sources.read().contains_key(source_id)
    }

    /// Run `f` on a source's buffer under its lock
    pub fn inspect<R>(&self, source_id: &str, f: impl FnOnce(&FrameBuffer) -> R) -> Option<R> {
        let buffer = self.buffer(source_id)?;
        let guard = buffer.lock();
        Some(f(&guard))
    }

    /// Source currently shown as the main image
    pub fn remote_source(&self) -> Option<String> {
        self.remote_source.read().clone()
    }

    /// Source currently shown as the thumbnail
    pub fn local_source(&self) -> Option<String> {
        self.local_source.read().clone()
    }

    /// Composite the current remote and local sources
    pub fn paint(&self, width: u32, height: u32) -> Composited {
        let remote = self.remote_source();
        let local = self.local_source();
        self.composite(
            remote.as_deref().unwrap_or_default(),
            local.as_deref().unwrap_or_default(),
            width,
            height,
        )
    }

    /// Produce a `width`x`height` bitmap from the given sources
    pub fn composite(&self, remote_id: &str, local_id: &str, width: u32, height: u32) -> Composited {
        let mut bitmap = Bitmap::new(width, height);
        let mut result_remote = None;
        let mut scale = 1.0;

        if width > 0 && height > 0 {
            if let Some(buffer) = self.buffer(remote_id) {
                let guard = buffer.lock();
                if let Some(remote) = guard.bitmap() {
                    let (rect, s) = fit_rect((remote.width(), remote.height()), (width, height));
                    bitmap.blit_scaled(remote, rect.x, rect.y, rect.width, rect.height);
                    result_remote = Some(rect);
                    scale = s;
                }
            }
        }

        let Some(remote_rect) = result_remote else {
            let status = if self.source_seen(local_id) {
                PlaceholderStatus::NoIncomingVideo
            } else {
                PlaceholderStatus::NoVideoEitherWay
            };
            draw_text_centered(&mut bitmap, status.text(), WHITE);
            return Composited {
                bitmap,
                placeholder: Some(status),
                remote_rect: None,
                thumbnail_rect: None,
            };
        };

        let mut thumbnail_rect = None;
        if width > THUMBNAIL_MIN_DEST && height > THUMBNAIL_MIN_DEST {
            if let Some(buffer) = self.buffer(local_id) {
                let guard = buffer.lock();
                if let Some(local) = guard.bitmap() {
                    let thumb_w = (local.width() as f64 / 4.0 * scale).round() as u32;
                    let thumb_h = (local.height() as f64 / 4.0 * scale).round() as u32;
                    let margin = (THUMBNAIL_MARGIN as f64 * scale).round() as u32;
                    let right = remote_rect.x + remote_rect.width;
                    let bottom = remote_rect.y + remote_rect.height;

                    if thumb_w > 0 && thumb_h > 0 {
                        let rect = Rect {
                            x: right.saturating_sub(thumb_w + margin),
                            y: bottom.saturating_sub(thumb_h + margin),
                            width: thumb_w,
                            height: thumb_h,
                        };
                        bitmap.blit_scaled(local, rect.x, rect.y, rect.width, rect.height);
                        thumbnail_rect = Some(rect);
                    }
                }
            }
        }

        Composited {
            bitmap,
            placeholder: None,
            remote_rect: Some(remote_rect),
            thumbnail_rect,
        }
    }

    /// Source has produced a frame at some point, even if its buffer is gone
    fn source_seen(&self, source_id: &str) -> bool {
        self.seen_sources.read().contains(source_id)
    }
}

impl Default for VideoCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackRenderer for VideoCompositor {
    fn start_remote_renderer(&self, track: &TrackHandle) {
        info!("Rendering remote track {}", track.id);
        *self.remote_source.write() = Some(track.id.clone());
        self.redraw_tx.send_modify(|generation| *generation += 1);
    }

    fn stop_remote_renderer(&self, track_id: &str) {
        {
            let mut remote = self.remote_source.write();
            if remote.as_deref() == Some(track_id) {
                *remote = None;
            }
        }
        self.remove_source(track_id);
    }

    fn start_local_renderer(&self, track: &TrackHandle) {
        info!("Rendering local track {}", track.id);
        *self.local_source.write() = Some(track.id.clone());
    }

    fn stop_local_renderer(&self, track_id: &str) {
        {
            let mut local = self.local_source.write();
            if local.as_deref() == Some(track_id) {
                *local = None;
            }
        }
        self.remove_source(track_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::frame::VideoRotation;

    fn white(width: u32, height: u32) -> I420Frame {
        I420Frame::filled(width, height, 235, 128, 128)
    }

    #[test]
    fn test_placeholder_selection() {
        let compositor = VideoCompositor::new();

        let out = compositor.composite("remote", "local", 320, 240);
        assert_eq!(out.placeholder, Some(PlaceholderStatus::NoVideoEitherWay));
        assert!(out.remote_rect.is_none());
        assert!(out.bitmap.as_bytes().chunks_exact(4).any(|px| px == WHITE));

        compositor.on_frame("local", &white(64, 48)).unwrap();
        let out = compositor.composite("remote", "local", 320, 240);
        assert_eq!(out.placeholder, Some(PlaceholderStatus::NoIncomingVideo));
    }

    #[test]
    fn test_no_letterbox_when_aspect_matches() {
        let compositor = VideoCompositor::new();
        compositor.on_frame("remote", &white(640, 480)).unwrap();

        let out = compositor.composite("remote", "local", 640, 480);
        assert_eq!(out.placeholder, None);
        assert_eq!(
            out.remote_rect,
            Some(Rect { x: 0, y: 0, width: 640, height: 480 })
        );
        assert!(!out.is_letterboxed());
        assert!(out.thumbnail_rect.is_none());
        assert!(out.bitmap.as_bytes().chunks_exact(4).all(|px| px == WHITE));
    }

    #[test]
    fn test_letterbox_centers_image() {
        let compositor = VideoCompositor::new();
        compositor.on_frame("remote", &white(640, 480)).unwrap();

        let out = compositor.composite("remote", "", 800, 480);
        assert_eq!(
            out.remote_rect,
            Some(Rect { x: 80, y: 0, width: 640, height: 480 })
        );
        assert!(out.is_letterboxed());
        assert_eq!(out.bitmap.pixel(79, 100), Some(BLACK));
        assert_eq!(out.bitmap.pixel(80, 100), Some(WHITE));
        assert_eq!(out.bitmap.pixel(720, 100), Some(BLACK));
    }

    #[test]
    fn test_thumbnail_gating() {
        let compositor = VideoCompositor::new();
        compositor.on_frame("remote", &white(640, 480)).unwrap();
        compositor
            .on_frame("local", &I420Frame::filled(320, 240, 16, 128, 128))
            .unwrap();

        let out = compositor.composite("remote", "local", 150, 150);
        assert!(out.remote_rect.is_some());
        assert!(out.thumbnail_rect.is_none());

        let out = compositor.composite("remote", "local", 300, 300);
        let thumb = out.thumbnail_rect.unwrap();
        let remote = out.remote_rect.unwrap();
        // scale = 300/640
        assert_eq!((thumb.width, thumb.height), (38, 28));
        assert_eq!(thumb.x + thumb.width + 5, remote.x + remote.width);
        assert_eq!(thumb.y + thumb.height + 5, remote.y + remote.height);
        assert_eq!(out.bitmap.pixel(thumb.x + 1, thumb.y + 1), Some(BLACK));
    }

    #[test]
    fn test_thumbnail_needs_local_frames() {
        let compositor = VideoCompositor::new();
        compositor.on_frame("remote", &white(640, 480)).unwrap();
        let out = compositor.composite("remote", "local", 640, 480);
        assert!(out.thumbnail_rect.is_none());
    }

    #[test]
    fn test_rejected_frame_keeps_buffer() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let compositor = VideoCompositor::new().with_event_bus(bus);
        compositor.on_frame("remote", &white(64, 48)).unwrap();

        let err = compositor
            .on_frame("remote", &I420Frame::filled(0, 0, 0, 0, 0))
            .unwrap_err();
        assert!(matches!(err, AppError::RenderFailed(_)));
        assert_eq!(compositor.inspect("remote", |b| b.size()), Some(Some((64, 48))));
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::FrameRejected { .. }));

        // Rejected frames for unknown sources do not create buffers
        assert!(compositor.on_frame("other", &I420Frame::filled(0, 4, 0, 0, 0)).is_err());
        assert!(!compositor.has_source("other"));
    }

    #[test]
    fn test_buffer_reused_across_frames() {
        let compositor = VideoCompositor::new();
        compositor.on_frame("remote", &white(64, 48)).unwrap();
        let ptr = compositor.inspect("remote", |b| b.data_ptr()).unwrap();

        compositor.on_frame("remote", &white(64, 48)).unwrap();
        assert_eq!(compositor.inspect("remote", |b| b.data_ptr()).unwrap(), ptr);

        compositor.on_frame("remote", &white(32, 32)).unwrap();
        assert_eq!(compositor.inspect("remote", |b| b.allocations()), Some(2));
    }

    #[test]
    fn test_rotated_frame_fits() {
        let compositor = VideoCompositor::new();
        let frame = white(640, 480).with_rotation(VideoRotation::Rotate90);
        compositor.on_frame("remote", &frame).unwrap();

        let out = compositor.composite("remote", "", 640, 480);
        assert_eq!(
            out.remote_rect,
            Some(Rect { x: 140, y: 0, width: 360, height: 480 })
        );
    }

    #[tokio::test]
    async fn test_redraw_notifications() {
        let compositor = VideoCompositor::new();
        let mut redraw = compositor.subscribe_redraw();

        compositor.on_frame("remote", &white(16, 16)).unwrap();
        redraw.changed().await.unwrap();
        assert_eq!(*redraw.borrow_and_update(), 1);

        let _ = compositor.on_frame("remote", &I420Frame::filled(0, 16, 0, 0, 0));
        assert!(!redraw.has_changed().unwrap());
    }

    #[test]
    fn test_local_seen_survives_renderer_restart() {
        let compositor = VideoCompositor::new();
        compositor.start_local_renderer(&TrackHandle::video("local-video"));
        compositor.on_frame("local-video", &white(64, 48)).unwrap();
        assert_eq!(
            compositor.paint(320, 240).placeholder,
            Some(PlaceholderStatus::NoIncomingVideo)
        );

        compositor.stop_local_renderer("local-video");
        assert!(!compositor.has_source("local-video"));
        compositor.start_local_renderer(&TrackHandle::video("local-video"));
        assert_eq!(
            compositor.paint(320, 240).placeholder,
            Some(PlaceholderStatus::NoIncomingVideo)
        );
    }

    #[test]
    fn test_concurrent_frames_never_tear() {
        const WHITE_FRAME: (u32, u32) = (64, 48);
        const BLACK_FRAME: (u32, u32) = (32, 32);

        let compositor = Arc::new(VideoCompositor::new());
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer = {
            let compositor = compositor.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let white_frame = white(WHITE_FRAME.0, WHITE_FRAME.1);
                let black_frame = I420Frame::filled(BLACK_FRAME.0, BLACK_FRAME.1, 16, 128, 128);
                for i in 0..500 {
                    let frame = if i % 2 == 0 { &white_frame } else { &black_frame };
                    compositor.on_frame("remote", frame).unwrap();
                }
                done.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };

        let mut checked = 0;
        loop {
            let finished = done.load(std::sync::atomic::Ordering::SeqCst);
            let out = compositor.composite("remote", "", 320, 240);
            if let Some(rect) = out.remote_rect {
                let expected = if (rect.width, rect.height) == (320, 240) {
                    WHITE
                } else {
                    assert_eq!((rect.width, rect.height), (240, 240));
                    BLACK
                };
                for y in rect.y..rect.y + rect.height {
                    for x in rect.x..rect.x + rect.width {
                        assert_eq!(out.bitmap.pixel(x, y), Some(expected), "torn at {},{}", x, y);
                    }
                }
                checked += 1;
            }
            if finished {
                break;
            }
        }

        writer.join().unwrap();
        assert!(checked > 0);
        assert_eq!(compositor.inspect("remote", |b| b.frames()), Some(500));
    }

    #[test]
    fn test_track_renderer() {
        let compositor = VideoCompositor::new();
        compositor.start_remote_renderer(&TrackHandle::video("v0"));
        compositor.start_local_renderer(&TrackHandle::video("local-video"));
        compositor.on_frame("v0", &white(64, 48)).unwrap();

        let out = compositor.paint(640, 480);
        assert!(out.placeholder.is_none());

        compositor.stop_remote_renderer("v0");
        assert!(compositor.remote_source().is_none());
        assert!(!compositor.has_source("v0"));
        assert_eq!(
            compositor.paint(640, 480).placeholder,
            Some(PlaceholderStatus::NoVideoEitherWay)
        );
    }
}
