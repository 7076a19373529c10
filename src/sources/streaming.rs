//! Primary real-time source: a single long-lived WebSocket subscribed
//! to a bounding box and/or MMSI filter, with reconnect backoff and
//! ping keepalive run on a dedicated worker task.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{AisSource, PositionQueue, SourceStatus, Subscription, POSITION_QUEUE_CAPACITY};
use crate::geo::BoundingBox;
use crate::models::{Position, VesselInfo};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const BACKOFF_START: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

fn status_from_code(code: u8) -> SourceStatus {
    match code {
        0 => SourceStatus::Disconnected,
        1 => SourceStatus::Connecting,
        2 => SourceStatus::Connected,
        3 => SourceStatus::RateLimited,
        _ => SourceStatus::Error,
    }
}

fn code_from_status(status: SourceStatus) -> u8 {
    match status {
        SourceStatus::Disconnected => 0,
        SourceStatus::Connecting => 1,
        SourceStatus::Connected => 2,
        SourceStatus::RateLimited => 3,
        SourceStatus::Error => 4,
    }
}

enum WsCommand {
    Subscribe(Subscription),
    Shutdown,
}

pub struct StreamingAisSource {
    name: String,
    url: String,
    api_key: String,
    status: AtomicU8,
    cmd_tx: mpsc::Sender<WsCommand>,
    positions: Arc<RwLock<HashMap<String, Position>>>,
    vessel_info: Arc<RwLock<HashMap<String, VesselInfo>>>,
    enabled: Arc<std::sync::atomic::AtomicBool>,
    queue: Arc<PositionQueue>,
}

#[derive(Debug, Deserialize)]
struct MetaData {
    #[serde(rename = "MMSI")]
    mmsi: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PositionReport {
    #[serde(rename = "Latitude")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    longitude: Option<f64>,
    #[serde(rename = "Sog")]
    sog: Option<f64>,
    #[serde(rename = "Cog")]
    cog: Option<f64>,
    #[serde(rename = "TrueHeading")]
    true_heading: Option<f64>,
    #[serde(rename = "NavigationalStatus")]
    nav_status: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct StaticDataReport {
    #[serde(rename = "ShipName")]
    ship_name: Option<String>,
    #[serde(rename = "CallSign")]
    call_sign: Option<String>,
    #[serde(rename = "ImoNumber")]
    imo_number: Option<i64>,
    #[serde(rename = "Type")]
    ship_type: Option<i32>,
    #[serde(rename = "Destination")]
    destination: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IngressFrame {
    #[serde(rename = "MessageType")]
    message_type: String,
    #[serde(rename = "MetaData")]
    meta_data: MetaData,
    #[serde(rename = "Message")]
    message: serde_json::Value,
}

const POSITION_REPORT_TYPES: &[&str] = &[
    "PositionReport",
    "StandardClassBPositionReport",
    "ExtendedClassBPositionReport",
];
const STATIC_DATA_TYPES: &[&str] = &["StaticDataReport", "ShipStaticData"];

impl StreamingAisSource {
    pub fn spawn(name: impl Into<String>, url: impl Into<String>, api_key: impl Into<String>) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(16);
        let source = Arc::new(Self {
            name: name.into(),
            url: url.into(),
            api_key: api_key.into(),
            status: AtomicU8::new(code_from_status(SourceStatus::Disconnected)),
            cmd_tx,
            positions: Arc::new(RwLock::new(HashMap::new())),
            vessel_info: Arc::new(RwLock::new(HashMap::new())),
            enabled: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            queue: PositionQueue::new(POSITION_QUEUE_CAPACITY),
        });

        let worker = source.clone();
        tokio::spawn(async move {
            worker.run(cmd_rx).await;
        });

        source
    }

    fn set_status(&self, status: SourceStatus) {
        self.status.store(code_from_status(status), Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>, mut cmd_rx: mpsc::Receiver<WsCommand>) {
        let mut subscription = Subscription::default();
        let mut backoff = BACKOFF_START;

        loop {
            if !self.enabled.load(Ordering::SeqCst) {
                return;
            }

            match self.connect_and_stream(&mut cmd_rx, &mut subscription).await {
                Ok(true) => return, // explicit shutdown
                Ok(false) => {
                    backoff = BACKOFF_START;
                }
                Err(e) => {
                    if self.status() == SourceStatus::Error {
                        // Auth failure: suppress further reconnects.
                        warn!(source = %self.name, error = %e, "streaming source in terminal error state");
                        return;
                    }
                    warn!(source = %self.name, error = %e, "streaming source disconnected; reconnecting");
                    let delay = Duration::from_secs_f64(backoff.as_secs_f64() * full_jitter());
                    sleep(delay).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
    }

    /// Returns `Ok(true)` on an explicit shutdown command, `Ok(false)`
    /// on any other stream end (reconnect), `Err` on a failure.
    async fn connect_and_stream(
        &self,
        cmd_rx: &mut mpsc::Receiver<WsCommand>,
        subscription: &mut Subscription,
    ) -> anyhow::Result<bool> {
        self.set_status(SourceStatus::Connecting);
        info!(source = %self.name, "connecting to streaming AIS source");

        let (ws_stream, _resp) = connect_async(&self.url).await?;
        self.set_status(SourceStatus::Connected);
        info!(source = %self.name, "streaming AIS source connected");

        let (mut write, mut read) = ws_stream.split();
        write
            .send(Message::Text(subscription_frame(&self.api_key, subscription)))
            .await?;

        let mut ping = interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    if self.status() == SourceStatus::RateLimited {
                        // One probe attempt before resuming backoff.
                        let _ = write.send(Message::Ping(Vec::new())).await;
                    } else {
                        let _ = write.send(Message::Ping(Vec::new())).await;
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(WsCommand::Subscribe(new_sub)) => {
                            *subscription = new_sub;
                            write.send(Message::Text(subscription_frame(&self.api_key, subscription))).await?;
                        }
                        Some(WsCommand::Shutdown) | None => {
                            self.set_status(SourceStatus::Disconnected);
                            return Ok(true);
                        }
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        self.set_status(SourceStatus::Disconnected);
                        return Ok(false);
                    };
                    match msg {
                        Ok(Message::Text(text)) => self.handle_text(&text),
                        Ok(Message::Ping(payload)) => { let _ = write.send(Message::Pong(payload)).await; }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "streaming AIS source close frame");
                            self.set_status(SourceStatus::Disconnected);
                            return Ok(false);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let text = e.to_string();
                            if text.contains("401") || text.to_lowercase().contains("unauthorized") {
                                self.set_status(SourceStatus::Error);
                            } else if text.contains("429") || text.to_lowercase().contains("rate") {
                                self.set_status(SourceStatus::RateLimited);
                            }
                            return Err(anyhow::anyhow!("streaming ws error: {e}"));
                        }
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let frame: IngressFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "dropping unparseable streaming frame");
                return;
            }
        };

        let Some(mmsi_num) = frame.meta_data.mmsi else {
            return;
        };
        let mmsi = format!("{:09}", mmsi_num);

        if POSITION_REPORT_TYPES.contains(&frame.message_type.as_str()) {
            if let Some(report) = extract_sub_object::<PositionReport>(&frame.message) {
                let (Some(lat), Some(lon)) = (report.latitude, report.longitude) else {
                    return;
                };
                let position = Position {
                    mmsi: mmsi.clone(),
                    lat,
                    lon,
                    timestamp: chrono::Utc::now(),
                    speed_knots: report.sog,
                    course_deg: report.cog,
                    heading_deg: report.true_heading,
                    nav_status_code: report.nav_status,
                    source_id: self.name.clone(),
                    source_received_at: chrono::Utc::now(),
                };
                if position.is_valid() {
                    self.positions.write().insert(mmsi, position.clone());
                    self.queue.push(position);
                }
            }
        } else if STATIC_DATA_TYPES.contains(&frame.message_type.as_str()) {
            if let Some(report) = extract_sub_object::<StaticDataReport>(&frame.message) {
                let info = VesselInfo {
                    mmsi: mmsi.clone(),
                    imo: report.imo_number.map(|n| format!("{:07}", n)),
                    name: report.ship_name,
                    callsign: report.call_sign,
                    ship_type_code: report.ship_type,
                    ship_type_text: report.ship_type.map(|c| super::rest::ship_type_text(c).to_string()),
                    destination: report.destination,
                    source_id: self.name.clone(),
                    ..Default::default()
                };
                self.vessel_info.write().insert(mmsi, info);
            }
        }
        // Everything else (unrecognized message types) is silently ignored.
    }
}

fn extract_sub_object<T: serde::de::DeserializeOwned>(message: &serde_json::Value) -> Option<T> {
    message
        .as_object()
        .and_then(|obj| obj.values().next())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Full-jitter backoff factor in `[0, 1)`, seeded from the system
/// clock so no extra randomness dependency is needed for a single
/// scalar per reconnect attempt.
fn full_jitter() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1_000_000) as f64 / 1_000_000.0
}

fn subscription_frame(api_key: &str, subscription: &Subscription) -> String {
    let boxes: Vec<[[f64; 2]; 2]> = if subscription.bounding_boxes.is_empty() {
        vec![[[BoundingBox::GLOBAL.lat_min, BoundingBox::GLOBAL.lon_min],
              [BoundingBox::GLOBAL.lat_max, BoundingBox::GLOBAL.lon_max]]]
    } else {
        subscription
            .bounding_boxes
            .iter()
            .map(|b| [[b.lat_min, b.lon_min], [b.lat_max, b.lon_max]])
            .collect()
    };

    let mut frame = serde_json::json!({
        "APIKey": api_key,
        "BoundingBoxes": boxes,
    });
    if !subscription.mmsis.is_empty() {
        let mmsis: Vec<&String> = subscription.mmsis.iter().collect();
        frame["FiltersShipMMSI"] = serde_json::json!(mmsis);
    }
    frame.to_string()
}

#[async_trait]
impl AisSource for StreamingAisSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> SourceStatus {
        status_from_code(self.status.load(Ordering::SeqCst))
    }

    async fn connect(&self) -> anyhow::Result<()> {
        // Connection is owned by the background worker task; this
        // just confirms it hasn't landed in a terminal error state.
        if self.status() == SourceStatus::Error {
            return Err(anyhow::anyhow!("{} is in terminal error state", self.name));
        }
        Ok(())
    }

    async fn subscribe(&self, subscription: Subscription) -> anyhow::Result<()> {
        self.cmd_tx.send(WsCommand::Subscribe(subscription)).await.ok();
        Ok(())
    }

    async fn fetch_positions(&self, mmsis: &[String]) -> Vec<Position> {
        let cache = self.positions.read();
        mmsis.iter().filter_map(|m| cache.get(m).cloned()).collect()
    }

    async fn fetch_vessel_info(&self, mmsi: &str) -> Option<VesselInfo> {
        self.vessel_info.read().get(mmsi).cloned()
    }

    async fn disconnect(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.cmd_tx.send(WsCommand::Shutdown).await.ok();
        self.set_status(SourceStatus::Disconnected);
    }

    fn position_queue(&self) -> Option<Arc<PositionQueue>> {
        Some(self.queue.clone())
    }
}
