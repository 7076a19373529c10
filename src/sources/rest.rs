//! Polled REST adapters: per-source minimum interval, TTL position
//! cache, schema-tolerant JSON field lookup by synonym list.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{AisSource, SourceStatus, Subscription};
use crate::geo::BoundingBox;
use crate::models::{Position, VesselInfo};

/// Ship type code (ITU-R M.1371) to human-readable text, with
/// range-fallback for codes not individually enumerated.
pub fn ship_type_text(code: i32) -> &'static str {
    match code {
        0 => "Not available",
        30 => "Fishing",
        31 => "Towing",
        32 => "Towing (large)",
        33 => "Dredging",
        34 => "Diving ops",
        35 => "Military ops",
        36 => "Sailing",
        37 => "Pleasure craft",
        50 => "Pilot vessel",
        51 => "Search and rescue",
        52 => "Tug",
        53 => "Port tender",
        54 => "Anti-pollution",
        55 => "Law enforcement",
        90 => "Other",
        21..=29 => "Wing in ground",
        40..=49 => "High speed craft",
        60..=69 => "Passenger",
        70..=79 => "Cargo",
        80..=89 => "Tanker",
        _ => "Unknown",
    }
}

/// Looks up the first present field among an ordered synonym list,
/// returning `None` rather than silently coercing a wrongly-typed
/// value.
fn lookup_f64(obj: &Value, synonyms: &[&str]) -> Option<f64> {
    for key in synonyms {
        if let Some(v) = obj.get(*key) {
            if let Some(n) = v.as_f64() {
                return Some(n);
            }
            if let Some(s) = v.as_str() {
                if let Ok(n) = s.parse::<f64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

fn lookup_str(obj: &Value, synonyms: &[&str]) -> Option<String> {
    for key in synonyms {
        if let Some(v) = obj.get(*key).and_then(|v| v.as_str()) {
            return Some(v.to_string());
        }
    }
    None
}

pub const LAT_SYNONYMS: &[&str] = &["latitude", "lat", "LATITUDE", "LAT"];
pub const LON_SYNONYMS: &[&str] = &["longitude", "lon", "lng", "LONGITUDE", "LON"];
pub const SPEED_SYNONYMS: &[&str] = &["speed", "sog", "SPEED", "SOG"];
pub const COURSE_SYNONYMS: &[&str] = &["course", "cog", "COURSE", "COG"];
pub const MMSI_SYNONYMS: &[&str] = &["mmsi", "MMSI"];

fn position_from_value(v: &Value, source_id: &str) -> Option<Position> {
    let mmsi = lookup_str(v, MMSI_SYNONYMS)?;
    let lat = lookup_f64(v, LAT_SYNONYMS)?;
    let lon = lookup_f64(v, LON_SYNONYMS)?;
    let position = Position {
        mmsi,
        lat,
        lon,
        timestamp: chrono::Utc::now(),
        speed_knots: lookup_f64(v, SPEED_SYNONYMS),
        course_deg: lookup_f64(v, COURSE_SYNONYMS),
        heading_deg: lookup_f64(v, &["heading", "trueHeading", "HEADING"]),
        nav_status_code: v
            .get("nav_status")
            .or_else(|| v.get("NAVSTAT"))
            .and_then(|x| x.as_i64())
            .map(|x| x as i32),
        source_id: source_id.to_string(),
        source_received_at: chrono::Utc::now(),
    };
    if position.is_valid() {
        Some(position)
    } else {
        warn!(mmsi = %position.mmsi, source = %source_id, "dropping invalid REST position record");
        None
    }
}

struct TtlCache<T: Clone> {
    entries: RwLock<HashMap<String, (T, std::time::Instant)>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read();
        let (value, inserted_at) = entries.get(key)?;
        if inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    fn insert(&self, key: String, value: T) {
        self.entries.write().insert(key, (value, std::time::Instant::now()));
    }
}

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

/// Community AIS feed adapter: query-string username auth, upper-case
/// JSON field names, errors arrive as an object with an `ERROR` field.
pub struct AisHubSource {
    name: String,
    base_url: String,
    username: String,
    client: Client,
    status: AtomicU8,
    min_interval: Duration,
    last_fetch: AtomicI64,
    position_cache: TtlCache<Position>,
    subscription: RwLock<Subscription>,
}

impl AisHubSource {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>) -> anyhow::Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Arc::new(Self {
            name: "aishub".to_string(),
            base_url: base_url.into(),
            username: username.into(),
            client,
            status: AtomicU8::new(code_from_status(SourceStatus::Disconnected)),
            min_interval: Duration::from_secs(60),
            last_fetch: AtomicI64::new(0),
            position_cache: TtlCache::new(Duration::from_secs(300)),
            subscription: RwLock::new(Subscription::default()),
        }))
    }

    fn gate(&self) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        let last = self.last_fetch.load(Ordering::SeqCst);
        if now - last < self.min_interval.as_millis() as i64 {
            return false;
        }
        self.last_fetch.store(now, Ordering::SeqCst);
        true
    }

    async fn poll_box(&self, bbox: BoundingBox) -> anyhow::Result<Vec<Position>> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("username", self.username.as_str()),
                ("format", "1"),
                ("output", "json"),
                ("latmin", &bbox.lat_min.to_string()),
                ("latmax", &bbox.lat_max.to_string()),
                ("lonmin", &bbox.lon_min.to_string()),
                ("lonmax", &bbox.lon_max.to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body: Value = resp.json().await?;

        if let Some(err) = body.get("ERROR") {
            self.status.store(code_from_status(SourceStatus::Error), Ordering::SeqCst);
            return Err(anyhow::anyhow!("AISHub error: {err}"));
        }
        if status.as_u16() == 429 {
            self.status.store(code_from_status(SourceStatus::RateLimited), Ordering::SeqCst);
            return Ok(vec![]);
        }

        let rows = body.as_array().cloned().unwrap_or_default();
        Ok(rows.iter().filter_map(|r| position_from_value(r, &self.name)).collect())
    }
}

#[async_trait]
impl AisSource for AisHubSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> SourceStatus {
        status_from_code(self.status.load(Ordering::SeqCst))
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.status.store(code_from_status(SourceStatus::Connected), Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, subscription: Subscription) -> anyhow::Result<()> {
        *self.subscription.write() = subscription;
        Ok(())
    }

    async fn fetch_positions(&self, mmsis: &[String]) -> Vec<Position> {
        if self.gate() {
            let bbox = self
                .subscription
                .read()
                .bounding_boxes
                .first()
                .copied()
                .unwrap_or(BoundingBox::GLOBAL);
            if let Ok(fresh) = self.poll_box(bbox).await {
                for pos in &fresh {
                    self.position_cache.insert(pos.mmsi.clone(), pos.clone());
                }
            }
        }
        mmsis.iter().filter_map(|m| self.position_cache.get(m)).collect()
    }

    async fn fetch_vessel_info(&self, _mmsi: &str) -> Option<VesselInfo> {
        None
    }

    async fn disconnect(&self) {
        self.status.store(code_from_status(SourceStatus::Disconnected), Ordering::SeqCst);
    }
}

/// Vessel API v1 adapter: Bearer and/or `X-API-Key` authentication,
/// per-vessel endpoints.
pub struct MarinesiaSource {
    name: String,
    base_url: String,
    client: Client,
    status: AtomicU8,
    min_interval: Duration,
    last_fetch: AtomicI64,
    position_cache: TtlCache<Position>,
}

impl MarinesiaSource {
    pub fn new(base_url: impl Into<String>, api_key: &str) -> anyhow::Result<Arc<Self>> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", api_key).parse()?,
        );
        headers.insert("X-API-Key", api_key.parse()?);
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;
        Ok(Arc::new(Self {
            name: "marinesia".to_string(),
            base_url: base_url.into(),
            client,
            status: AtomicU8::new(code_from_status(SourceStatus::Disconnected)),
            min_interval: Duration::from_secs(10),
            last_fetch: AtomicI64::new(0),
            position_cache: TtlCache::new(Duration::from_secs(300)),
        }))
    }

    fn gate(&self) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        let last = self.last_fetch.load(Ordering::SeqCst);
        if now - last < self.min_interval.as_millis() as i64 {
            return false;
        }
        self.last_fetch.store(now, Ordering::SeqCst);
        true
    }

    async fn fetch_one(&self, mmsi: &str) -> anyhow::Result<Option<Position>> {
        let url = format!("{}/vessel/{}/location/latest", self.base_url, mmsi);
        let resp = self.client.get(&url).send().await?;
        if resp.status().as_u16() == 429 {
            self.status.store(code_from_status(SourceStatus::RateLimited), Ordering::SeqCst);
            return Ok(None);
        }
        if resp.status().as_u16() == 401 {
            self.status.store(code_from_status(SourceStatus::Error), Ordering::SeqCst);
            return Err(anyhow::anyhow!("marinesia unauthorized"));
        }
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: Value = resp.json().await?;
        Ok(position_from_value(&body, &self.name))
    }
}

#[async_trait]
impl AisSource for MarinesiaSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> SourceStatus {
        status_from_code(self.status.load(Ordering::SeqCst))
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.status.store(code_from_status(SourceStatus::Connected), Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, _subscription: Subscription) -> anyhow::Result<()> {
        Ok(())
    }

    async fn fetch_positions(&self, mmsis: &[String]) -> Vec<Position> {
        let mut out = Vec::with_capacity(mmsis.len());
        for mmsi in mmsis {
            if let Some(cached) = self.position_cache.get(mmsi) {
                out.push(cached);
                continue;
            }
            if !self.gate() {
                continue;
            }
            if let Ok(Some(pos)) = self.fetch_one(mmsi).await {
                self.position_cache.insert(mmsi.clone(), pos.clone());
                out.push(pos);
            }
        }
        out
    }

    async fn fetch_vessel_info(&self, mmsi: &str) -> Option<VesselInfo> {
        let url = format!("{}/vessel/{}/profile", self.base_url, mmsi);
        let resp = self.client.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: Value = resp.json().await.ok()?;
        Some(VesselInfo {
            mmsi: mmsi.to_string(),
            imo: lookup_str(&body, &["imo", "IMO"]),
            name: lookup_str(&body, &["name", "NAME"]),
            callsign: lookup_str(&body, &["callsign"]),
            destination: lookup_str(&body, &["destination"]),
            source_id: self.name.clone(),
            ..Default::default()
        })
    }

    async fn disconnect(&self) {
        self.status.store(code_from_status(SourceStatus::Disconnected), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ship_type_falls_back_to_range() {
        assert_eq!(ship_type_text(80), "Tanker");
        assert_eq!(ship_type_text(84), "Tanker");
        assert_eq!(ship_type_text(71), "Cargo");
    }

    #[test]
    fn field_synonym_lookup_tries_each_name() {
        let v = serde_json::json!({ "LATITUDE": "31.5", "LONGITUDE": -120.2 });
        assert_eq!(lookup_f64(&v, LAT_SYNONYMS), Some(31.5));
        assert_eq!(lookup_f64(&v, LON_SYNONYMS), Some(-120.2));
    }

    #[test]
    fn wrongly_typed_field_is_not_coerced() {
        let v = serde_json::json!({ "latitude": {"nested": true} });
        assert_eq!(lookup_f64(&v, LAT_SYNONYMS), None);
    }
}
