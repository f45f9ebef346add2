//! crtc - WebRTC session client for SRS and xrtc signaling servers
//!
//! Negotiates one media session (play, publish or pull), renders the
//! received video into a composited bitmap and polls RTP statistics.

pub mod config;
pub mod error;
pub mod events;
pub mod utils;
pub mod video;
pub mod webrtc;

pub use error::{AppError, Result};
