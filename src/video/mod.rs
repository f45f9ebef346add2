//! Video rendering
//!
//! Incoming I420 frames are rotated and converted to BGRA into one
//! size-adaptive buffer per source; the compositor paints the remote image
//! letterboxed on black with the local image as a corner thumbnail.

pub mod buffer;
pub mod compositor;
pub mod convert;
pub mod frame;
pub mod glyphs;

pub use buffer::{Bitmap, FrameBuffer};
pub use compositor::{Composited, PlaceholderStatus, Rect, VideoCompositor};
pub use frame::{I420Frame, Plane, VideoRotation};
