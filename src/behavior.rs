//! Behavior Analyzer: pure, deterministic detectors over an ordered
//! position track for one vessel, using a window-scan-then-emit
//! structure shared across loitering, gap, speed, and encounter
//! detection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::haversine_km;
use crate::models::{BehaviorEvent, BehaviorKind, Position};

#[derive(Debug, Clone, Copy)]
pub struct BehaviorThresholds {
    pub loiter_speed_max_kn: f64,
    pub loiter_radius_max_nm: f64,
    pub loiter_min_duration: Duration,
    pub gap_max: Duration,
    pub max_reasonable_speed_kn: f64,
    pub spoof_speed_margin: f64,
    pub sts_min_hours: f64,
    pub encounter_min_hours: f64,
    pub sts_speed_max_kn: f64,
    pub sts_distance_max_nm: f64,
}

impl Default for BehaviorThresholds {
    fn default() -> Self {
        Self {
            loiter_speed_max_kn: 2.0,
            loiter_radius_max_nm: 0.5,
            loiter_min_duration: Duration::hours(3),
            gap_max: Duration::minutes(60),
            max_reasonable_speed_kn: 50.0,
            spoof_speed_margin: 1.5,
            sts_min_hours: 4.0,
            encounter_min_hours: 0.5,
            sts_speed_max_kn: 1.0,
            sts_distance_max_nm: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapSeverity {
    Low,
    Medium,
    High,
}

fn hours_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_seconds() as f64 / 3600.0
}

/// Loitering: a maximal run of contiguous positions with speed and
/// pairwise distance both under threshold, spanning at least the
/// minimum duration.
pub fn detect_loitering(track: &[Position], thresholds: &BehaviorThresholds) -> Vec<BehaviorEvent> {
    if track.len() < 2 {
        return vec![];
    }
    let mut events = Vec::new();
    let is_slow = |p: &Position| p.speed_knots.map(|s| s <= thresholds.loiter_speed_max_kn).unwrap_or(false);
    let within_radius_of_anchor = |anchor: &Position, p: &Position| {
        haversine_km(anchor.lat, anchor.lon, p.lat, p.lon) / 1.852 <= thresholds.loiter_radius_max_nm
    };

    let mut i = 0;
    while i < track.len() {
        if !is_slow(&track[i]) {
            i += 1;
            continue;
        }
        let mut j = i;
        while j + 1 < track.len() && is_slow(&track[j + 1]) && within_radius_of_anchor(&track[i], &track[j + 1]) {
            j += 1;
        }
        let span = hours_between(track[i].timestamp, track[j].timestamp);
        let min_duration_h = thresholds.loiter_min_duration.num_seconds() as f64 / 3600.0;
        if span >= min_duration_h && j > i {
            let avg_speed = track[i..=j]
                .iter()
                .filter_map(|p| p.speed_knots)
                .sum::<f64>()
                / (j - i + 1) as f64;
            let inverse_speed_factor = 1.0 - (avg_speed / thresholds.loiter_speed_max_kn).min(1.0);
            let confidence = (span / min_duration_h * 0.5 + inverse_speed_factor).min(1.0);
            events.push(BehaviorEvent {
                kind: BehaviorKind::Loitering,
                mmsi: track[i].mmsi.clone(),
                start_time: track[i].timestamp,
                end_time: track[j].timestamp,
                lat: track[i].lat,
                lon: track[i].lon,
                confidence,
                details: serde_json::json!({ "span_hours": span, "positions": j - i + 1 }),
            });
        }
        i = j + 1;
    }
    events
}

pub fn detect_ais_gaps(track: &[Position], thresholds: &BehaviorThresholds) -> Vec<BehaviorEvent> {
    if track.len() < 2 {
        return vec![];
    }
    track
        .windows(2)
        .filter_map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            let delta = b.timestamp - a.timestamp;
            if delta <= thresholds.gap_max {
                return None;
            }
            let gap_minutes = delta.num_minutes() as f64;
            let gap_hours = gap_minutes / 60.0;
            let severity = if gap_hours <= 12.0 {
                GapSeverity::Low
            } else if gap_hours <= 48.0 {
                GapSeverity::Medium
            } else {
                GapSeverity::High
            };
            Some(BehaviorEvent {
                kind: BehaviorKind::AisGap,
                mmsi: a.mmsi.clone(),
                start_time: a.timestamp,
                end_time: b.timestamp,
                lat: a.lat,
                lon: a.lon,
                confidence: 1.0,
                details: serde_json::json!({ "gap_minutes": gap_minutes, "severity": format!("{:?}", severity).to_lowercase() }),
            })
        })
        .collect()
}

pub fn detect_impossible_speed(track: &[Position], thresholds: &BehaviorThresholds) -> Vec<BehaviorEvent> {
    if track.len() < 2 {
        return vec![];
    }
    track
        .windows(2)
        .filter_map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            let dt_hours = hours_between(a.timestamp, b.timestamp);
            if dt_hours <= 0.0 {
                return None;
            }
            let dist_km = haversine_km(a.lat, a.lon, b.lat, b.lon);
            let implied_kn = (dist_km / 1.852) / dt_hours;
            if implied_kn > thresholds.max_reasonable_speed_kn && dist_km > 50.0 {
                Some(BehaviorEvent {
                    kind: BehaviorKind::ImpossibleSpeed,
                    mmsi: a.mmsi.clone(),
                    start_time: a.timestamp,
                    end_time: b.timestamp,
                    lat: b.lat,
                    lon: b.lon,
                    confidence: 1.0,
                    details: serde_json::json!({ "implied_speed_kn": implied_kn, "distance_km": dist_km }),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Distinct from impossible speed: catches under-reported speed with
/// a teleporting position.
pub fn detect_spoofing(track: &[Position], thresholds: &BehaviorThresholds) -> Vec<BehaviorEvent> {
    if track.len() < 2 {
        return vec![];
    }
    track
        .windows(2)
        .filter_map(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            let reported_speed = a.speed_knots?;
            let dt_hours = hours_between(a.timestamp, b.timestamp);
            if dt_hours <= 0.0 {
                return None;
            }
            let dist_km = haversine_km(a.lat, a.lon, b.lat, b.lon);
            let expected_max_km = reported_speed * dt_hours * 1.852 * thresholds.spoof_speed_margin;
            if dist_km > expected_max_km && dist_km > 50.0 {
                Some(BehaviorEvent {
                    kind: BehaviorKind::Spoofing,
                    mmsi: a.mmsi.clone(),
                    start_time: a.timestamp,
                    end_time: b.timestamp,
                    lat: b.lat,
                    lon: b.lon,
                    confidence: 1.0,
                    details: serde_json::json!({ "reported_speed_kn": reported_speed, "distance_km": dist_km, "expected_max_km": expected_max_km }),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Encounter / STS over a pair of tracks. Both tracks must already be
/// restricted to the overlapping time window by the caller.
pub fn detect_encounter(
    track_a: &[Position],
    track_b: &[Position],
    thresholds: &BehaviorThresholds,
) -> Vec<BehaviorEvent> {
    let mut windows = Vec::new();
    let mut run_start: Option<DateTime<Utc>> = None;
    let mut run_end: Option<DateTime<Utc>> = None;
    let mut anchor = (0.0, 0.0);

    for a in track_a {
        let Some(nearest) = track_b
            .iter()
            .min_by(|x, y| {
                let dx = (x.timestamp - a.timestamp).num_seconds().abs();
                let dy = (y.timestamp - a.timestamp).num_seconds().abs();
                dx.cmp(&dy)
            })
        else {
            continue;
        };

        let slow = a.speed_knots.map(|s| s <= thresholds.sts_speed_max_kn).unwrap_or(false)
            && nearest.speed_knots.map(|s| s <= thresholds.sts_speed_max_kn).unwrap_or(false);
        let close = haversine_km(a.lat, a.lon, nearest.lat, nearest.lon) / 1.852 <= thresholds.sts_distance_max_nm;

        if slow && close {
            if run_start.is_none() {
                run_start = Some(a.timestamp);
                anchor = (a.lat, a.lon);
            }
            run_end = Some(a.timestamp);
        } else if let (Some(s), Some(e)) = (run_start, run_end) {
            windows.push((s, e, anchor));
            run_start = None;
            run_end = None;
        }
    }
    if let (Some(s), Some(e)) = (run_start, run_end) {
        windows.push((s, e, anchor));
    }

    windows
        .into_iter()
        .filter_map(|(start, end, (lat, lon))| {
            let span_hours = hours_between(start, end);
            if span_hours >= thresholds.sts_min_hours {
                Some(BehaviorEvent {
                    kind: BehaviorKind::StsTransfer,
                    mmsi: track_a.first()?.mmsi.clone(),
                    start_time: start,
                    end_time: end,
                    lat,
                    lon,
                    confidence: 1.0,
                    details: serde_json::json!({ "other_mmsi": track_b.first().map(|p| p.mmsi.clone()), "span_hours": span_hours }),
                })
            } else if span_hours >= thresholds.encounter_min_hours {
                Some(BehaviorEvent {
                    kind: BehaviorKind::Encounter,
                    mmsi: track_a.first()?.mmsi.clone(),
                    start_time: start,
                    end_time: end,
                    lat,
                    lon,
                    confidence: 1.0,
                    details: serde_json::json!({ "other_mmsi": track_b.first().map(|p| p.mmsi.clone()), "span_hours": span_hours }),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Keeps the first position of any run closer together than
/// `interval`; never drops the first or last position.
pub fn downsample(track: &[Position], interval: Duration) -> Vec<Position> {
    if track.is_empty() {
        return vec![];
    }
    let mut out = vec![track[0].clone()];
    for pos in &track[1..] {
        if pos.timestamp - out.last().unwrap().timestamp >= interval {
            out.push(pos.clone());
        }
    }
    if out.last().unwrap().timestamp != track.last().unwrap().timestamp {
        out.push(track.last().unwrap().clone());
    }
    out
}

/// Splits a track into contiguous segments on any gap ≥ `gap`.
pub fn segment(track: &[Position], gap: Duration) -> Vec<Vec<Position>> {
    if track.is_empty() {
        return vec![];
    }
    let mut segments = vec![vec![track[0].clone()]];
    for pair in track.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if b.timestamp - a.timestamp >= gap {
            segments.push(vec![b.clone()]);
        } else {
            segments.last_mut().unwrap().push(b.clone());
        }
    }
    segments
}

pub fn filter_by_distance(track: &[Position], center_lat: f64, center_lon: f64, radius_km: f64) -> Vec<Position> {
    track
        .iter()
        .filter(|p| haversine_km(p.lat, p.lon, center_lat, center_lon) <= radius_km)
        .cloned()
        .collect()
}

/// Drops positions arriving within `window` of a kept position,
/// keeping the earliest of each cluster.
pub fn dedup_within_window(track: &[Position], window: Duration) -> Vec<Position> {
    let mut out: Vec<Position> = Vec::new();
    for pos in track {
        match out.last() {
            Some(last) if pos.timestamp - last.timestamp < window => continue,
            _ => out.push(pos.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(mmsi: &str, lat: f64, lon: f64, hours_from_now: i64, speed: Option<f64>) -> Position {
        Position {
            mmsi: mmsi.to_string(),
            lat,
            lon,
            timestamp: Utc::now() + Duration::hours(hours_from_now),
            speed_knots: speed,
            course_deg: None,
            heading_deg: None,
            nav_status_code: None,
            source_id: "test".to_string(),
            source_received_at: Utc::now(),
        }
    }

    #[test]
    fn loitering_emits_one_event_for_a_slow_stationary_run() {
        let speeds = [0.5, 0.3, 0.2, 0.4, 0.1];
        let track: Vec<Position> = speeds
            .iter()
            .enumerate()
            .map(|(i, s)| pos("636012345", 31.0, 121.0, i as i64, Some(*s)))
            .collect();
        let events = detect_loitering(&track, &BehaviorThresholds::default());
        assert_eq!(events.len(), 1);
        assert!(events[0].end_time - events[0].start_time >= Duration::hours(3));
    }

    #[test]
    fn ais_gap_detects_delta_over_threshold() {
        let track = vec![pos("636012345", 31.0, 121.0, 0, None), pos("636012345", 31.5, 121.5, 3, None)];
        let events = detect_ais_gaps(&track, &BehaviorThresholds::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, BehaviorKind::AisGap);
        assert!(events[0].details["gap_minutes"].as_f64().unwrap() > 60.0);
    }

    #[test]
    fn impossible_speed_flags_teleport() {
        let track = vec![pos("636012345", 31.0, 121.0, 0, None), pos("636012345", 40.0, 121.0, 1, None)];
        let events = detect_impossible_speed(&track, &BehaviorThresholds::default());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn short_tracks_return_empty_not_error() {
        let track = vec![pos("636012345", 31.0, 121.0, 0, None)];
        assert!(detect_loitering(&track, &BehaviorThresholds::default()).is_empty());
        assert!(detect_ais_gaps(&track, &BehaviorThresholds::default()).is_empty());
        assert!(detect_impossible_speed(&track, &BehaviorThresholds::default()).is_empty());
    }

    #[test]
    fn downsample_never_drops_endpoints() {
        let track: Vec<Position> = (0..10).map(|i| pos("636012345", 31.0, 121.0, i, None)).collect();
        let out = downsample(&track, Duration::hours(5));
        assert_eq!(out.first().unwrap().timestamp, track.first().unwrap().timestamp);
        assert_eq!(out.last().unwrap().timestamp, track.last().unwrap().timestamp);
    }
}
