//! Configuration schema and persistent store

pub mod schema;
pub mod store;

pub use schema::{
    AppConfig, DisplayConfig, MediaConfig, SignalingConfig, SignalingMode, StatsConfig,
    TurnServer, WebRtcConfig,
};
pub use store::ConfigStore;
