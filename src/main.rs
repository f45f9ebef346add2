use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crtc::config::{AppConfig, ConfigStore, SignalingMode};
use crtc::events::EventBus;
use crtc::video::VideoCompositor;
use crtc::webrtc::{
    HttpSignalingTransport, MediaEngine, NegotiationState, SessionNegotiator, SignalingTransport,
    StatsDirection, StatsPoller, TrackRenderer, WebRtcEngine,
};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Signaling mode selected on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Play,
    Publish,
    Pull,
}

impl From<ModeArg> for SignalingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Play => SignalingMode::Play,
            ModeArg::Publish => SignalingMode::Publish,
            ModeArg::Pull => SignalingMode::Pull,
        }
    }
}

/// crtc command line arguments
#[derive(Parser, Debug)]
#[command(name = "crtc")]
#[command(version, about = "WebRTC player/publisher for SRS and xrtc servers", long_about = None)]
struct CliArgs {
    /// Configuration file (default: ./crtc.json)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Signaling mode (overrides config)
    #[arg(short = 'm', long, value_enum)]
    mode: Option<ModeArg>,

    /// Signaling API URL (overrides config)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// SRS stream URL, e.g. webrtc://host/live/livestream
    #[arg(long, value_name = "URL")]
    stream_url: Option<String>,

    /// xrtc stream name
    #[arg(long, value_name = "NAME")]
    stream_name: Option<String>,

    /// xrtc user id
    #[arg(long)]
    uid: Option<u64>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Write the overrides above back to the configuration file
    #[arg(long)]
    save: bool,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting crtc v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    let config_store = ConfigStore::new(&config_path).await?;
    tracing::info!("Configuration: {}", config_store.path().display());

    let config = if args.save {
        config_store.update(|c| apply_cli_overrides(c, &args)).await?;
        tracing::info!("Saved overrides to {}", config_store.path().display());
        config_store.get()
    } else {
        let mut config = (*config_store.get()).clone();
        apply_cli_overrides(&mut config, &args);
        Arc::new(config)
    };

    let mode = config.signaling.mode;
    let directions = config.media_directions();
    tracing::info!(
        "Mode {} against {} (audio {:?}, video {:?})",
        mode,
        config.signaling.effective_api_url(),
        directions.audio,
        directions.video
    );

    let events = Arc::new(EventBus::new());
    let cancel = CancellationToken::new();

    // Event log
    {
        let mut rx = events.subscribe();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => match serde_json::to_string(&event) {
                            Ok(json) => tracing::info!(target: "crtc::events", "{}", json),
                            Err(e) => tracing::warn!("Failed to serialize event: {}", e),
                        },
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Event log lagged, {} events dropped", n);
                        }
                        Err(_) => break,
                    }
                }
            }
        });
    }

    let engine: Arc<dyn MediaEngine> = Arc::new(WebRtcEngine::new(config.webrtc.clone()));
    let transport: Arc<dyn SignalingTransport> =
        Arc::new(HttpSignalingTransport::new(&config.signaling, directions)?);
    let compositor = Arc::new(VideoCompositor::new().with_event_bus(events.clone()));

    let mut negotiator = SessionNegotiator::new(mode, engine.clone(), transport)
        .with_renderer(compositor.clone() as Arc<dyn TrackRenderer>)
        .with_event_bus(events.clone());
    let session_id = negotiator.session_id().to_string();
    let state_rx = negotiator.subscribe_state();

    if config.stats.enabled {
        let poller = StatsPoller::new(
            engine.clone(),
            StatsDirection::for_mode(mode),
            Duration::from_millis(config.stats.interval_ms.max(100)),
        )
        .with_event_bus(events.clone(), session_id.clone());
        tokio::spawn(poller.run(state_rx.clone(), cancel.clone()));
    }

    // Headless display: composite on every redraw request
    let display = {
        let compositor = compositor.clone();
        let cancel = cancel.clone();
        let (width, height) = (config.display.width, config.display.height);
        tokio::spawn(async move {
            let mut redraw = compositor.subscribe_redraw();
            let mut painted: u64 = 0;
            if let Some(status) = compositor.paint(width, height).placeholder {
                tracing::info!("Display: {}", status.text());
            }
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = redraw.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let _ = redraw.borrow_and_update();
                        let frame = compositor.paint(width, height);
                        painted += 1;
                        if let Some(status) = frame.placeholder {
                            tracing::debug!("Display: {}", status.text());
                        } else if painted % 300 == 1 {
                            tracing::debug!(
                                "Display: painted {} frames, remote at {:?}",
                                painted,
                                frame.remote_rect
                            );
                        }
                    }
                }
            }
            tracing::info!("Display stopped after {} frames", painted);
        })
    };

    if let Err(e) = negotiator.initialize(directions).await {
        tracing::error!("Session {} failed to start: {}", session_id, e);
        negotiator.teardown().await;
        cancel.cancel();
        let _ = display.await;
        return Err(e.into());
    }

    let mut session = tokio::spawn(negotiator.run(cancel.clone()));

    let shutdown_signal = {
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for CTRL+C: {}", e);
                return;
            }
            tracing::info!("Shutdown signal received");
            cancel.cancel();
        }
    };

    let final_state = tokio::select! {
        _ = shutdown_signal => (&mut session).await.ok(),
        result = &mut session => result.ok(),
    };
    cancel.cancel();
    let _ = display.await;

    match final_state {
        Some(NegotiationState::Failed(reason)) => {
            tracing::error!("Session {} ended: negotiation failed ({})", session_id, reason);
            anyhow::bail!("negotiation failed: {}", reason);
        }
        Some(state) => tracing::info!("Session {} ended in state {}", session_id, state),
        None => tracing::info!("Session {} stopped", session_id),
    }

    Ok(())
}

fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(mode) = args.mode {
        config.signaling.mode = mode.into();
    }
    if let Some(ref url) = args.api_url {
        config.signaling.api_url = url.clone();
    }
    if let Some(ref url) = args.stream_url {
        config.signaling.stream_url = url.clone();
    }
    if let Some(ref name) = args.stream_name {
        config.signaling.stream_name = name.clone();
    }
    if let Some(uid) = args.uid {
        config.signaling.uid = Some(uid);
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "crtc=error,webrtc=error",
        LogLevel::Warn => "crtc=warn,webrtc=warn",
        LogLevel::Info => "crtc=info,webrtc=warn",
        LogLevel::Verbose => "crtc=debug,webrtc=warn",
        LogLevel::Debug => "crtc=debug,webrtc=info",
        LogLevel::Trace => "crtc=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Configuration file location
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CRTC_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("crtc.json")
}
