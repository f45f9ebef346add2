//! Periodic session statistics
//!
//! Each poll asks the engine for a report and keeps a whitelist of fields from
//! the RTP entries matching the session's direction. Polls are independent:
//! an unparseable report is logged and skipped, and the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{MediaEngine, RawStatsReport};
use super::types::{MediaKind, NegotiationState};
use crate::config::SignalingMode;
use crate::error::{AppError, Result, StatsFailure};
use crate::events::{EventBus, SessionEvent};

/// Which RTP stream entries are of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsDirection {
    Inbound,
    Outbound,
}

impl StatsDirection {
    /// Receiving sessions watch inbound streams, publishing sessions outbound
    pub fn for_mode(mode: SignalingMode) -> Self {
        match mode {
            SignalingMode::Play | SignalingMode::Pull => StatsDirection::Inbound,
            SignalingMode::Publish => StatsDirection::Outbound,
        }
    }

    /// Value of the entry's `type` field
    pub fn stats_type(&self) -> &'static str {
        match self {
            StatsDirection::Inbound => "inbound-rtp",
            StatsDirection::Outbound => "outbound-rtp",
        }
    }

    /// Entry the remote side reports about the same stream (RTCP SR/RR derived)
    pub fn remote_stats_type(&self) -> &'static str {
        match self {
            StatsDirection::Inbound => "remote-outbound-rtp",
            StatsDirection::Outbound => "remote-inbound-rtp",
        }
    }
}

/// Fields extracted from one report entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSample {
    pub stream_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    pub round_trip_ms: Option<f64>,
    pub packets_lost: Option<i64>,
    pub fraction_lost: Option<f64>,
}

type Entry = Map<String, Value>;

/// Extract samples for `direction` from a raw report
///
/// One sample per local RTP stream entry. Fields the local entry lacks are
/// taken from the remote entry describing the same stream, matched by
/// `localId` or else by SSRC and kind. Any entry that is not a JSON object
/// with a `type` makes the whole report unparseable.
pub fn extract_samples(
    report: &RawStatsReport,
    direction: StatsDirection,
) -> std::result::Result<Vec<StatsSample>, StatsFailure> {
    let mut entries: Vec<(String, Entry)> = Vec::with_capacity(report.entries.len());

    for raw in &report.entries {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| StatsFailure::ReportUnparseable(format!("entry is not JSON: {}", e)))?;
        let entry = unwrap_entry(value).ok_or_else(|| {
            StatsFailure::ReportUnparseable(format!("entry has no type: {}", raw))
        })?;

        let Some(stream_type) = entry.get("type").and_then(Value::as_str) else {
            return Err(StatsFailure::ReportUnparseable(format!(
                "entry type is not a string: {}",
                raw
            )));
        };
        entries.push((stream_type.to_string(), entry));
    }

    let remotes: Vec<&Entry> = entries
        .iter()
        .filter(|(t, _)| t == direction.remote_stats_type())
        .map(|(_, e)| e)
        .collect();

    let samples = entries
        .iter()
        .filter(|(t, _)| t == direction.stats_type())
        .map(|(stream_type, entry)| {
            let remote = find_remote(entry, &remotes);
            let lookup = |names: &[&str]| {
                field(entry, names).or_else(|| remote.and_then(|r| field(r, names)))
            };

            StatsSample {
                stream_type: stream_type.clone(),
                kind: field(entry, &["kind"])
                    .and_then(Value::as_str)
                    .and_then(MediaKind::from_sdp_media),
                round_trip_ms: round_trip_ms(entry).or_else(|| remote.and_then(round_trip_ms)),
                packets_lost: lookup(&["packetsLost", "packets_lost"]).and_then(Value::as_i64),
                fraction_lost: lookup(&["fractionLost", "fraction_lost"]).and_then(Value::as_f64),
            }
        })
        .collect();

    Ok(samples)
}

/// `rttMs`, or W3C `roundTripTime` in seconds
fn round_trip_ms(entry: &Entry) -> Option<f64> {
    field(entry, &["rttMs", "rtt_ms"])
        .and_then(Value::as_f64)
        .or_else(|| {
            field(entry, &["roundTripTime", "round_trip_time"])
                .and_then(Value::as_f64)
                .map(|secs| secs * 1000.0)
        })
}

fn find_remote<'a>(entry: &Entry, remotes: &[&'a Entry]) -> Option<&'a Entry> {
    let id = entry.get("id").and_then(Value::as_str);
    let by_id = id.and_then(|id| {
        remotes
            .iter()
            .find(|r| r.get("localId").and_then(Value::as_str) == Some(id))
    });

    by_id
        .or_else(|| {
            let ssrc = entry.get("ssrc").and_then(Value::as_u64)?;
            remotes.iter().find(|r| {
                r.get("ssrc").and_then(Value::as_u64) == Some(ssrc)
                    && r.get("kind") == entry.get("kind")
            })
        })
        .copied()
}

/// The entry object, looking through a single-key enum wrapper if present
fn unwrap_entry(value: Value) -> Option<Entry> {
    let Value::Object(mut obj) = value else {
        return None;
    };
    if obj.contains_key("type") {
        return Some(obj);
    }
    if obj.len() != 1 {
        return None;
    }
    let key = obj.keys().next()?.clone();
    match obj.remove(&key) {
        Some(Value::Object(inner)) if inner.contains_key("type") => Some(inner),
        _ => None,
    }
}

fn field<'a>(entry: &'a Entry, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| entry.get(*name))
}

/// Timer-driven statistics collector
pub struct StatsPoller {
    engine: Arc<dyn MediaEngine>,
    direction: StatsDirection,
    interval: Duration,
    session_id: String,
    events: Option<Arc<EventBus>>,
    latest_tx: watch::Sender<Vec<StatsSample>>,
}

impl StatsPoller {
    pub fn new(engine: Arc<dyn MediaEngine>, direction: StatsDirection, interval: Duration) -> Self {
        let (latest_tx, _) = watch::channel(Vec::new());
        Self {
            engine,
            direction,
            interval,
            session_id: String::new(),
            events: None,
            latest_tx,
        }
    }

    /// Also publish samples as `session.stats_sample`
    pub fn with_event_bus(mut self, events: Arc<EventBus>, session_id: impl Into<String>) -> Self {
        self.events = Some(events);
        self.session_id = session_id.into();
        self
    }

    /// Samples from the most recent successful poll
    pub fn latest(&self) -> watch::Receiver<Vec<StatsSample>> {
        self.latest_tx.subscribe()
    }

    /// Run one poll and deliver its samples
    pub async fn poll_once(&self) -> Result<Vec<StatsSample>> {
        let report = self.engine.get_stats().await?;
        let samples = extract_samples(&report, self.direction).map_err(AppError::from)?;

        for sample in &samples {
            debug!(
                "{} {:?}: rtt={:?}ms lost={:?} fraction={:?}",
                sample.stream_type,
                sample.kind,
                sample.round_trip_ms,
                sample.packets_lost,
                sample.fraction_lost
            );
            if let Some(ref events) = self.events {
                events.publish(SessionEvent::StatsSample {
                    session_id: self.session_id.clone(),
                    sample: sample.clone(),
                });
            }
        }

        self.latest_tx.send_replace(samples.clone());
        Ok(samples)
    }

    /// Poll while the session is Negotiated
    ///
    /// Waits for `Negotiated`, then ticks until the session reaches a terminal
    /// state or `cancel` fires.
    pub async fn run(self, mut state: watch::Receiver<NegotiationState>, cancel: CancellationToken) {
        loop {
            let current = *state.borrow_and_update();
            if current == NegotiationState::Negotiated {
                break;
            }
            if current.is_terminal() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = state.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        info!(
            "Stats polling started ({}, every {:?})",
            self.direction.stats_type(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() || state.borrow().is_terminal() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Skipping stats report: {}", e);
                    }
                }
            }
        }
        info!("Stats polling stopped");
    }
}
