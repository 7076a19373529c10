//! Alert Engine: pure rules evaluated against each newly ingested
//! Position, with persistence and 6 h duplicate suppression delegated
//! to the Track Store.

use chrono::{Duration, Utc};

use crate::behavior::{self, BehaviorThresholds};
use crate::models::Position;
use crate::sanctions::{SanctionsIndex, ZoneIndex};
use crate::store::TrackStore;

pub const DEFAULT_DARK_PERIOD_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RaisedAlert {
    pub rule: String,
    pub zone: Option<String>,
    pub severity: AlertSeverity,
    pub message: String,
}

/// Evaluates every alert rule against the just-ingested position and
/// writes any that pass the 6 h per-(mmsi, rule, zone) dedup gate.
pub async fn evaluate(
    store: &TrackStore,
    sanctions: &SanctionsIndex,
    zones: &ZoneIndex,
    position: &Position,
    prior_track: &[Position],
    imo: Option<&str>,
    name: Option<&str>,
    dark_period_hours: i64,
) -> anyhow::Result<Vec<RaisedAlert>> {
    let mut raised = Vec::new();

    for zone in zones.zones_for(position.lat, position.lon) {
        let was_outside = !prior_track
            .iter()
            .rev()
            .take_while(|p| position.timestamp - p.timestamp <= Duration::hours(24))
            .any(|p| zones.zones_for(p.lat, p.lon).iter().any(|z| z.id == zone.id));

        match zone.kind {
            crate::models::ZoneKind::Terminal if was_outside || prior_track.is_empty() => {
                raised.push(RaisedAlert {
                    rule: "terminal_arrival".to_string(),
                    zone: Some(zone.id.clone()),
                    severity: AlertSeverity::Critical,
                    message: format!("{} entered terminal zone {}", position.mmsi, zone.name),
                });
            }
            crate::models::ZoneKind::StsZone => {
                raised.push(RaisedAlert {
                    rule: "sts_zone_entry".to_string(),
                    zone: Some(zone.id.clone()),
                    severity: AlertSeverity::High,
                    message: format!("{} entered STS zone {}", position.mmsi, zone.name),
                });
            }
            crate::models::ZoneKind::CableRoute => {
                raised.push(RaisedAlert {
                    rule: "geofence_enter".to_string(),
                    zone: Some(zone.id.clone()),
                    severity: AlertSeverity::Medium,
                    message: format!("{} entered protected asset {}", position.mmsi, zone.name),
                });
            }
            _ => {}
        }
    }

    if sanctions.lookup(imo, Some(&position.mmsi), name).is_some() {
        raised.push(RaisedAlert {
            rule: "sanctioned_vessel".to_string(),
            zone: None,
            severity: AlertSeverity::Critical,
            message: format!("{} matched sanctions index", position.mmsi),
        });
    }

    let thresholds = BehaviorThresholds::default();
    let mut full_track = prior_track.to_vec();
    full_track.push(position.clone());
    let spoofing_hits = behavior::detect_spoofing(&full_track, &thresholds);
    let impossible_speed_hits = behavior::detect_impossible_speed(&full_track, &thresholds);
    if !spoofing_hits.is_empty() || !impossible_speed_hits.is_empty() {
        raised.push(RaisedAlert {
            rule: "spoofing".to_string(),
            zone: None,
            severity: AlertSeverity::High,
            message: format!(
                "{} triggered {} event(s)",
                position.mmsi,
                if spoofing_hits.is_empty() { "impossible speed" } else { "spoofing" }
            ),
        });
    }
    if let Some(last) = prior_track.last() {
        let dark_for = position.timestamp - last.timestamp;
        if dark_for > Duration::hours(dark_period_hours) {
            raised.push(RaisedAlert {
                rule: "dark_period".to_string(),
                zone: None,
                severity: AlertSeverity::Medium,
                message: format!("{} was dark for {} hours", position.mmsi, dark_for.num_hours()),
            });
        }
    }

    let mut accepted = Vec::new();
    for alert in raised {
        let is_dup = store
            .recent_duplicate_alert(&position.mmsi, &alert.rule, alert.zone.as_deref())
            .await?;
        if is_dup {
            continue;
        }
        store
            .append_alert(
                Some(&position.mmsi),
                &alert.rule,
                alert.zone.as_deref(),
                alert.severity.as_str(),
                &alert.message,
            )
            .await?;
        accepted.push(alert);
    }
    Ok(accepted)
}

/// Checked independently of the per-position evaluator above, since it
/// depends on wall-clock elapsed time rather than a new ingest event.
pub async fn check_dark_period(store: &TrackStore, mmsi: &str, dark_period_hours: i64) -> anyhow::Result<Option<RaisedAlert>> {
    let Some(last) = store.last_position(mmsi).await? else {
        return Ok(None);
    };
    let dark_for = Utc::now() - last.timestamp;
    if dark_for <= Duration::hours(dark_period_hours) {
        return Ok(None);
    }
    if store.recent_duplicate_alert(mmsi, "dark_period", None).await? {
        return Ok(None);
    }
    let alert = RaisedAlert {
        rule: "dark_period".to_string(),
        zone: None,
        severity: AlertSeverity::Medium,
        message: format!("{mmsi} has been dark for {} hours", dark_for.num_hours()),
    };
    store
        .append_alert(Some(mmsi), &alert.rule, None, alert.severity.as_str(), &alert.message)
        .await?;
    Ok(Some(alert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InfrastructureAsset, ZoneGeometry, ZoneKind};

    fn pos(mmsi: &str, lat: f64, lon: f64, hours_ago: i64) -> Position {
        Position {
            mmsi: mmsi.to_string(),
            lat,
            lon,
            timestamp: Utc::now() - Duration::hours(hours_ago),
            speed_knots: Some(0.0),
            course_deg: None,
            heading_deg: None,
            nav_status_code: None,
            source_id: "test".to_string(),
            source_received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn terminal_arrival_alert_fires_on_empty_prior_track() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = TrackStore::open(tmp.path().to_str().unwrap()).unwrap();
        let sanctions = SanctionsIndex::new();
        let zones = ZoneIndex::new(vec![InfrastructureAsset {
            id: "terminal-1".to_string(),
            name: "Jose Terminal".to_string(),
            kind: ZoneKind::Terminal,
            geometry: ZoneGeometry::Point { lat: 10.15, lon: -64.68 },
            radius_nm: 5.0,
        }]);
        let position = pos("636012345", 10.15, -64.68, 0);
        let raised = evaluate(&store, &sanctions, &zones, &position, &[], None, None, DEFAULT_DARK_PERIOD_HOURS)
            .await
            .unwrap();
        assert!(raised.iter().any(|a| a.rule == "terminal_arrival" && a.severity == AlertSeverity::Critical));
    }
}
