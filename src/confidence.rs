//! Confidence / Risk Scorer: AIS consistency, behavioral normalcy,
//! SAR corroboration, deception likelihood, and dark-fleet risk.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::haversine_km;
use crate::identifiers::{is_flag_of_convenience, is_shadow_fleet_flag};
use crate::models::{ConfidenceScore, Position, RiskLevel};
use crate::store::TrackStore;

pub const SCORING_WINDOW_DAYS: i64 = 30;

fn hours_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_seconds() as f64 / 3600.0
}

/// Starts at 1.0; penalizes timing gaps and unexplained-distance
/// anomalies. The returned bool is set whenever a leg's observed
/// distance exceeded what the reported speed could cover over the
/// elapsed time and that distance was itself > 50 km — the position
/// anomaly `deception_likelihood` tallies against.
fn ais_consistency(track: &[Position]) -> (f64, Option<String>, bool) {
    if track.len() < 2 {
        return (0.5, Some("insufficient_data".to_string()), false);
    }
    let mut score = 1.0;
    let mut gap_penalty = 0.0;
    let mut anomaly_penalty = 0.0;
    let mut had_anomaly = false;

    for pair in track.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let dt_hours = hours_between(a.timestamp, b.timestamp);
        if dt_hours > 6.0 {
            gap_penalty = (gap_penalty + 0.1_f64).min(0.4);
        }
        if dt_hours > 0.0 {
            if let Some(reported_speed) = a.speed_knots {
                let expected_max_km = reported_speed * dt_hours * 1.852;
                let observed_km = haversine_km(a.lat, a.lon, b.lat, b.lon);
                if observed_km > expected_max_km && observed_km > 50.0 {
                    anomaly_penalty = (anomaly_penalty + 0.15_f64).min(0.3);
                    had_anomaly = true;
                }
            }
        }
    }

    score -= gap_penalty + anomaly_penalty;
    (score.clamp(0.0, 1.0), None, had_anomaly)
}

fn behavioral_normalcy(track: &[Position]) -> f64 {
    if track.len() < 3 {
        return 0.5;
    }
    let mut score = 1.0;
    let mut speed_penalty = 0.0;
    let mut course_penalty = 0.0;

    for pair in track.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if let (Some(sa), Some(sb)) = (a.speed_knots, b.speed_knots) {
            if (sb - sa).abs() > 15.0 {
                speed_penalty = (speed_penalty + 0.1_f64).min(0.3);
            }
        }
        if let (Some(ca), Some(cb)) = (a.course_deg, b.course_deg) {
            let mut delta = (cb - ca).abs();
            if delta > 180.0 {
                delta = 360.0 - delta;
            }
            if delta > 90.0 {
                course_penalty = (course_penalty + 0.1_f64).min(0.3);
            }
        }
    }
    score -= speed_penalty + course_penalty;

    let slow_count = track.iter().filter(|p| p.speed_knots.map(|s| s < 2.0).unwrap_or(false)).count();
    if slow_count * 2 > track.len() {
        score -= 0.2;
    }
    score.clamp(0.0, 1.0)
}

/// Reason strings double as the concrete reading of "SAR contradicts"
/// used by `deception_likelihood`/the intelligence assembler: only the
/// `present_unmatched` case counts as contradiction evidence.
async fn sar_corroboration(store: &TrackStore, mmsi: &str, since: DateTime<Utc>, region_has_ais: bool) -> anyhow::Result<(f64, &'static str)> {
    if !store.sar_table_exists().await? {
        return Ok((0.5, "no_sar_table"));
    }
    let matches = store.sar_match_count(mmsi, since).await?;
    if matches > 0 {
        return Ok(((0.6 + 0.1 * matches as f64).min(1.0), "matched"));
    }
    if !region_has_ais {
        return Ok((0.3, "ais_absent"));
    }
    Ok((0.5, "present_unmatched"))
}

pub async fn score_vessel(store: &TrackStore, mmsi: &str, days: i64) -> anyhow::Result<ConfidenceScore> {
    let since = Utc::now() - Duration::days(days.max(1));
    let until = Utc::now();
    let track = store.history(mmsi, since, until).await?;

    let (ais, ais_reason, had_position_anomaly) = ais_consistency(&track);
    let behav = behavioral_normalcy(&track);
    let region_has_ais = !track.is_empty();
    let (sar, sar_reason) = sar_corroboration(store, mmsi, since, region_has_ais).await?;

    Ok(ConfidenceScore {
        mmsi: mmsi.to_string(),
        ais_consistency: ais,
        behavioral_normalcy: behav,
        sar_corroboration: sar,
        deception_likelihood: 0.0, // filled in by `deception_likelihood` below
        ais_consistency_reason: ais_reason,
        behavioral_normalcy_reason: None,
        sar_corroboration_reason: Some(sar_reason.to_string()),
        had_position_anomaly,
        computed_at: Utc::now(),
    })
}

/// Separate additive tally, independent of `ConfidenceScore::overall`'s
/// clamped weighted average — intentionally asymmetric with the
/// dark-fleet risk score's 0-100 cap.
pub fn deception_likelihood(ais: f64, behav: f64, had_position_anomaly: bool, sar_contradicts: bool) -> f64 {
    let mut score: f64 = 0.0;
    if ais < 0.5 {
        score += 0.3;
    }
    if had_position_anomaly {
        score += 0.3;
    }
    if behav < 0.5 {
        score += 0.2;
    }
    if sar_contradicts {
        score += 0.2;
    }
    score.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkFleetFactor {
    pub name: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkFleetRiskInput {
    pub flag_state: Option<String>,
    pub year_built: Option<i32>,
    pub owner: Option<String>,
    pub ais_gap_count: u32,
    pub spoofing_count: u32,
    pub loitering_count: u32,
    pub sts_count: u32,
    pub is_tanker: bool,
}

pub fn dark_fleet_risk(input: &DarkFleetRiskInput) -> (u32, Vec<DarkFleetFactor>) {
    let mut factors = Vec::new();
    let mut score: u32 = 0;

    if let Some(flag) = &input.flag_state {
        if is_shadow_fleet_flag(flag) {
            factors.push(DarkFleetFactor { name: "shadow_fleet_flag".to_string(), weight: 25 });
            score += 25;
        } else if is_flag_of_convenience(flag) {
            factors.push(DarkFleetFactor { name: "flag_of_convenience".to_string(), weight: 15 });
            score += 15;
        }
    }
    if let Some(year) = input.year_built {
        let age = Utc::now().date_naive().format("%Y").to_string().parse::<i32>().unwrap_or(2026) - year;
        if age >= 25 {
            factors.push(DarkFleetFactor { name: "aging_hull".to_string(), weight: 20 });
            score += 20;
        }
    }
    if input.owner.as_deref().unwrap_or("").trim().is_empty() {
        factors.push(DarkFleetFactor { name: "unknown_owner".to_string(), weight: 15 });
        score += 15;
    }
    if input.ais_gap_count >= 3 {
        factors.push(DarkFleetFactor { name: "repeated_ais_gaps".to_string(), weight: 20 });
        score += 20;
    }
    if input.spoofing_count > 0 {
        factors.push(DarkFleetFactor { name: "spoofing_events".to_string(), weight: 15 });
        score += 15;
    }
    if input.loitering_count > 0 {
        factors.push(DarkFleetFactor { name: "loitering_events".to_string(), weight: 10 });
        score += 10;
    }
    if input.sts_count > 0 {
        factors.push(DarkFleetFactor { name: "sts_events".to_string(), weight: 15 });
        score += 15;
    }
    if input.is_tanker {
        factors.push(DarkFleetFactor { name: "tanker_type".to_string(), weight: 5 });
        score += 5;
    }

    (score.min(100), factors)
}

pub fn dark_fleet_risk_level(score: u32) -> RiskLevel {
    crate::models::risk_level_for_score(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ais_consistency_is_neutral_below_two_positions() {
        let (score, reason, had_anomaly) = ais_consistency(&[]);
        assert_eq!(score, 0.5);
        assert_eq!(reason.as_deref(), Some("insufficient_data"));
        assert!(!had_anomaly);
    }

    #[test]
    fn dark_fleet_risk_combined_scenario_is_critical() {
        let input = DarkFleetRiskInput {
            flag_state: Some("Gabon".to_string()),
            year_built: Some(1998),
            owner: Some(String::new()),
            ais_gap_count: 5,
            spoofing_count: 3,
            loitering_count: 0,
            sts_count: 0,
            is_tanker: true,
        };
        let (score, _factors) = dark_fleet_risk(&input);
        assert!(score >= 70);
        assert_eq!(dark_fleet_risk_level(score), RiskLevel::Critical);
    }

    #[test]
    fn deception_likelihood_is_clamped() {
        let score = deception_likelihood(0.1, 0.1, true, true);
        assert!(score <= 1.0);
    }
}
