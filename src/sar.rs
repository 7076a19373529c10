//! SAR Correlator: parses detection batches from SNAP-style CSV or XML
//! exports and correlates them against stored AIS positions.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::warn;

use crate::geo::haversine_km;
use crate::models::{Position, SarDetection};
use crate::store::TrackStore;

pub const DEFAULT_TIME_WINDOW_MINUTES: i64 = 30;
pub const DEFAULT_DISTANCE_THRESHOLD_KM: f64 = 2.0;

/// Column positions are fixed by the SNAP Ocean Object Detection
/// processor's CSV export shape.
const LAT_COL: usize = 5;
const LON_COL: usize = 7;
const LENGTH_COL: usize = 11;

pub fn parse_csv(contents: &str, source_file: &str, acquisition_time: DateTime<Utc>) -> Vec<SarDetection> {
    let mut detections = Vec::new();
    for (row_num, line) in contents.lines().enumerate() {
        let fields: Vec<&str> = line.split(',').map(|f| f.trim().trim_matches('"')).collect();
        if fields.len() <= LENGTH_COL {
            continue;
        }
        let (lat_str, lon_str) = (fields[LAT_COL], fields[LON_COL]);
        if lat_str.is_empty() || lon_str.is_empty() {
            continue;
        }
        let (Ok(lat), Ok(lon)) = (lat_str.parse::<f64>(), lon_str.parse::<f64>()) else {
            warn!(row = row_num, "SAR CSV row has unparseable coordinates, skipping");
            continue;
        };
        if lat == 0.0 && lon == 0.0 {
            warn!(row = row_num, "SAR CSV row at null island, skipping");
            continue;
        }
        let length_m = fields[LENGTH_COL].parse::<f64>().ok();
        detections.push(SarDetection {
            id: format!("csv_{}", row_num + 1),
            timestamp: acquisition_time,
            lat,
            lon,
            length_m,
            width_m: None,
            confidence: 0.8,
            source_file: Some(source_file.to_string()),
            matched_vessel: None,
            match_distance_km: None,
        });
    }
    detections
}

pub fn parse_xml(contents: &str, source_file: &str, acquisition_time: DateTime<Utc>) -> Vec<SarDetection> {
    let mut detections = Vec::new();
    // Minimal attribute-only scan over <detection .../> elements; the
    // source format never nests attributes or mixes quote styles.
    for (idx, chunk) in contents.split("<detection").enumerate().skip(1) {
        let end = chunk.find('>').unwrap_or(chunk.len());
        let attrs = &chunk[..end];
        let get = |name: &str| -> Option<String> {
            let needle = format!("{name}=\"");
            let start = attrs.find(&needle)? + needle.len();
            let rest = &attrs[start..];
            let close = rest.find('"')?;
            Some(rest[..close].to_string())
        };

        let lat = get("lat").and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
        let lon = get("lon").and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
        if lat == 0.0 && lon == 0.0 {
            warn!(detection = idx, "SAR XML detection at null island, skipping");
            continue;
        }
        let id = get("id").unwrap_or_default();
        detections.push(SarDetection {
            id: format!("xml_{id}"),
            timestamp: acquisition_time,
            lat,
            lon,
            length_m: get("length").and_then(|s| s.parse::<f64>().ok()),
            width_m: get("width").and_then(|s| s.parse::<f64>().ok()),
            confidence: get("confidence").and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.8),
            source_file: Some(source_file.to_string()),
            matched_vessel: None,
            match_distance_km: None,
        });
    }
    detections
}

/// Auto-detects format by file extension, falling back to first-byte
/// sniffing, then CSV-then-XML for unrecognized extensions.
pub fn parse_detections(filename: &str, contents: &str, acquisition_time: DateTime<Utc>) -> Vec<SarDetection> {
    let lower = filename.to_lowercase();
    if lower.ends_with(".xml") {
        return parse_xml(contents, filename, acquisition_time);
    }
    if lower.ends_with(".csv") {
        return parse_csv(contents, filename, acquisition_time);
    }
    if contents.trim_start().starts_with('<') {
        return parse_xml(contents, filename, acquisition_time);
    }
    let csv_result = parse_csv(contents, filename, acquisition_time);
    if !csv_result.is_empty() {
        csv_result
    } else {
        parse_xml(contents, filename, acquisition_time)
    }
}

/// Correlates a batch of detections sharing a common acquisition
/// window against the Track Store. Within one batch, a vessel accepts
/// only its single closest detection; any runner-up is marked dark.
pub async fn correlate_with_ais(
    store: &TrackStore,
    detections: Vec<SarDetection>,
    window_minutes: i64,
    distance_threshold_km: f64,
) -> anyhow::Result<Vec<SarDetection>> {
    let mut best_per_vessel: std::collections::HashMap<String, (usize, f64)> = std::collections::HashMap::new();
    let mut candidate_matches: Vec<Option<(String, f64)>> = vec![None; detections.len()];

    for (idx, detection) in detections.iter().enumerate() {
        let since = detection.timestamp - Duration::minutes(window_minutes);
        let until = detection.timestamp + Duration::minutes(window_minutes);
        let candidates = nearby_positions(store, detection, since, until).await?;

        let mut nearest: Option<(String, f64)> = None;
        for pos in candidates {
            let dist = haversine_km(detection.lat, detection.lon, pos.lat, pos.lon);
            if nearest.as_ref().map(|(_, d)| dist < *d).unwrap_or(true) {
                nearest = Some((pos.mmsi, dist));
            }
        }

        if let Some((mmsi, dist)) = nearest {
            if dist <= distance_threshold_km {
                let better = best_per_vessel
                    .get(&mmsi)
                    .map(|(_, best_dist)| dist < *best_dist)
                    .unwrap_or(true);
                if better {
                    best_per_vessel.insert(mmsi.clone(), (idx, dist));
                }
                candidate_matches[idx] = Some((mmsi, dist));
            }
        }
    }

    let accepted: std::collections::HashSet<usize> = best_per_vessel.values().map(|(idx, _)| *idx).collect();

    let mut out = detections;
    for (idx, detection) in out.iter_mut().enumerate() {
        if accepted.contains(&idx) {
            if let Some((mmsi, dist)) = &candidate_matches[idx] {
                detection.matched_vessel = Some(mmsi.clone());
                detection.match_distance_km = Some(*dist);
            }
        } else {
            detection.matched_vessel = None;
            detection.match_distance_km = None;
        }
    }
    Ok(out)
}

async fn nearby_positions(
    store: &TrackStore,
    detection: &SarDetection,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> anyhow::Result<Vec<Position>> {
    // A generous box around the detection keeps the time-window query
    // cheap; the real filter is haversine distance in the caller.
    let margin = 2.0;
    let bbox = crate::geo::BoundingBox::new(
        detection.lat - margin,
        detection.lon - margin,
        detection.lat + margin,
        detection.lon + margin,
    );
    store.all_positions_in_box(bbox, since).await.map(|positions| {
        positions
            .into_iter()
            .filter(|p| p.timestamp >= since && p.timestamp <= until)
            .collect()
    })
}

pub fn dark_vessel_event(detection: &SarDetection) -> Value {
    serde_json::json!({
        "type": "DARK_VESSEL_DETECTED",
        "lat": detection.lat,
        "lon": detection.lon,
        "length_m": detection.length_m,
        "source_file": detection.source_file,
        "detection_id": detection.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parsing_reads_fixed_columns() {
        let csv = "a,b,c,d,e,31.5,f,121.5,h,i,j,220.0\n";
        let detections = parse_csv(csv, "test.csv", Utc::now());
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].lat, 31.5);
        assert_eq!(detections[0].lon, 121.5);
        assert_eq!(detections[0].length_m, Some(220.0));
    }

    #[test]
    fn csv_parsing_skips_null_island_rows() {
        let csv = "a,b,c,d,e,0,f,0,h,i,j,100\n";
        assert!(parse_csv(csv, "test.csv", Utc::now()).is_empty());
    }

    #[test]
    fn xml_parsing_reads_detection_attributes() {
        let xml = r#"<report><detection lat="45.6234" lon="13.7456" length="180" confidence="0.9" id="1"/></report>"#;
        let detections = parse_xml(xml, "test.xml", Utc::now());
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].lat, 45.6234);
        assert_eq!(detections[0].confidence, 0.9);
    }

    #[test]
    fn format_autodetection_uses_extension_first() {
        let xml = r#"<detection lat="1" lon="1"/>"#;
        let detections = parse_detections("batch.xml", xml, Utc::now());
        assert_eq!(detections.len(), 1);
    }
}
