//! Enrichment-only adapter: no real-time positions, only historical
//! behavior events and SAR presence pulled from a fishing-activity
//! gateway.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use super::EnrichmentSource;
use crate::geo::BoundingBox;
use crate::models::{BehaviorEvent, BehaviorKind, SarDetection};

pub struct GfwSource {
    base_url: String,
    client: Client,
}

impl GfwSource {
    pub fn new(base_url: impl Into<String>, api_key: &str) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", api_key).parse()?,
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn map_event_type(raw: &str) -> Option<BehaviorKind> {
        match raw {
            "loitering" => Some(BehaviorKind::Loitering),
            "encounter" => Some(BehaviorKind::Encounter),
            "ais_gap" | "gap" => Some(BehaviorKind::AisGap),
            "port_visit" => None, // not part of the common taxonomy
            _ => None,
        }
    }
}

#[async_trait]
impl EnrichmentSource for GfwSource {
    async fn fetch_events(&self, mmsi: &str, days: u32) -> Vec<BehaviorEvent> {
        let end = chrono::Utc::now();
        let start = end - chrono::Duration::days(days as i64);
        let url = format!("{}/events", self.base_url);

        let resp = match self
            .client
            .get(&url)
            .query(&[
                ("vessels", mmsi),
                ("datasets", "loitering,encounter,ais_gap"),
                ("start-date", &start.date_naive().to_string()),
                ("end-date", &end.date_naive().to_string()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "GFW events fetch failed");
                return vec![];
            }
        };

        let body: Value = match resp.json().await {
            Ok(b) => b,
            Err(_) => return vec![],
        };

        let entries = body.get("entries").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        entries
            .iter()
            .filter_map(|e| {
                let event_type = e.get("type").and_then(|v| v.as_str())?;
                let kind = Self::map_event_type(event_type)?;
                let lat = e.get("lat").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let lon = e.get("lon").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let confidence = e.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5);
                Some(BehaviorEvent {
                    kind,
                    mmsi: mmsi.to_string(),
                    start_time: start,
                    end_time: end,
                    lat,
                    lon,
                    confidence,
                    details: e.clone(),
                })
            })
            .collect()
    }

    async fn fetch_sar_detections(&self, bbox: BoundingBox, window_minutes: u32) -> Vec<SarDetection> {
        let url = format!("{}/4wings/report", self.base_url);
        let resp = match self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "bbox": [bbox.lon_min, bbox.lat_min, bbox.lon_max, bbox.lat_max],
                "window_minutes": window_minutes,
                "dataset": "sar",
            }))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "GFW SAR presence fetch failed");
                return vec![];
            }
        };

        let body: Value = match resp.json().await {
            Ok(b) => b,
            Err(_) => return vec![],
        };

        body.get("detections")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|d| {
                let lat = d.get("lat").and_then(|v| v.as_f64())?;
                let lon = d.get("lon").and_then(|v| v.as_f64())?;
                Some(SarDetection {
                    id: d.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    timestamp: chrono::Utc::now(),
                    lat,
                    lon,
                    length_m: d.get("length_m").and_then(|v| v.as_f64()),
                    width_m: d.get("width_m").and_then(|v| v.as_f64()),
                    confidence: d.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.8),
                    source_file: None,
                    matched_vessel: d
                        .get("matched")
                        .and_then(|v| v.as_bool())
                        .filter(|m| *m)
                        .and(d.get("matched_mmsi").and_then(|v| v.as_str()))
                        .map(String::from),
                    match_distance_km: None,
                })
            })
            .collect()
    }
}
