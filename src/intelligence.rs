//! Intelligence Assembler: collects the latest position, recent
//! behavior, confidence, dark-fleet risk, sanctions, and zone matches
//! for a vessel into a single ordered assessment.

use chrono::{Duration, Utc};

use crate::confidence::{self, DarkFleetRiskInput};
use crate::models::{Assessment, AssessmentLevel, BehaviorKind, Indicator, IndicatorKind};
use crate::sanctions::{SanctionsIndex, ZoneIndex};
use crate::store::TrackStore;

pub async fn assemble(
    store: &TrackStore,
    sanctions: &SanctionsIndex,
    zones: &ZoneIndex,
    mmsi: &str,
    imo: Option<&str>,
    name: Option<&str>,
    dark_fleet_input: &DarkFleetRiskInput,
    window_days: i64,
) -> anyhow::Result<Assessment> {
    let latest = store.last_position(mmsi).await?;
    let since = Utc::now() - Duration::days(window_days);
    let history = store.history(mmsi, since, Utc::now()).await?;

    let mut score = confidence::score_vessel(store, mmsi, window_days).await?;
    let sar_contradicts = score.sar_corroboration_reason.as_deref() == Some("present_unmatched");
    score.deception_likelihood = confidence::deception_likelihood(
        score.ais_consistency,
        score.behavioral_normalcy,
        score.had_position_anomaly,
        sar_contradicts,
    );

    let (risk_score, risk_factors) = confidence::dark_fleet_risk(dark_fleet_input);
    let sanction_match = sanctions.lookup(imo, Some(mmsi), name);

    let mut indicators = Vec::new();
    for factor in &risk_factors {
        indicators.push(Indicator {
            kind: IndicatorKind::Behavioral,
            name: factor.name.clone(),
            weight: factor.weight as f64,
            source: "dark_fleet_risk".to_string(),
        });
    }
    if let Some(record) = &sanction_match {
        indicators.push(Indicator {
            kind: IndicatorKind::Sanction,
            name: format!("sanctioned:{}", record.name),
            weight: 1.0,
            source: "sanctions_index".to_string(),
        });
    }

    let mut zone_matches = Vec::new();
    if let Some(pos) = &latest {
        for zone in zones.zones_for(pos.lat, pos.lon) {
            indicators.push(Indicator {
                kind: IndicatorKind::Geographic,
                name: format!("in_zone:{}", zone.name),
                weight: 1.0,
                source: "zone_index".to_string(),
            });
            zone_matches.push(zone.id.clone());
        }
    }

    for behavior in collect_behavior_kinds(&history) {
        indicators.push(Indicator {
            kind: IndicatorKind::Technical,
            name: format!("{behavior:?}"),
            weight: 1.0,
            source: "behavior_analyzer".to_string(),
        });
    }

    let overall = score.overall();
    let deception = score.deception_likelihood;
    let assessment_level = assessment_level_for(deception, overall);
    let requires_review = overall < 0.5 || sanction_match.is_some();

    let mut provenance = vec!["track_store".to_string(), "confidence_scorer".to_string()];
    if sanction_match.is_some() {
        provenance.push("sanctions_index".to_string());
    }
    if !zone_matches.is_empty() {
        provenance.push("zone_index".to_string());
    }
    let _ = risk_score; // surfaced via indicators; retained for callers that want the raw number

    Ok(Assessment {
        vessel_ref: mmsi.to_string(),
        assessment_level,
        confidence: overall,
        indicators,
        provenance,
        requires_review,
        generated_at: Utc::now(),
    })
}

fn collect_behavior_kinds(history: &[crate::models::Position]) -> Vec<BehaviorKind> {
    let thresholds = Default::default();
    let mut kinds = Vec::new();
    if !crate::behavior::detect_loitering(history, &thresholds).is_empty() {
        kinds.push(BehaviorKind::Loitering);
    }
    if !crate::behavior::detect_ais_gaps(history, &thresholds).is_empty() {
        kinds.push(BehaviorKind::AisGap);
    }
    if !crate::behavior::detect_impossible_speed(history, &thresholds).is_empty() {
        kinds.push(BehaviorKind::ImpossibleSpeed);
    }
    if !crate::behavior::detect_spoofing(history, &thresholds).is_empty() {
        kinds.push(BehaviorKind::Spoofing);
    }
    kinds
}

/// Per the deception/confidence table: higher deception wins over
/// lower confidence when both thresholds are crossed.
fn assessment_level_for(deception: f64, confidence: f64) -> AssessmentLevel {
    if deception >= 0.7 {
        AssessmentLevel::Critical
    } else if deception >= 0.5 && confidence <= 0.5 {
        AssessmentLevel::HighConcern
    } else if deception >= 0.3 {
        AssessmentLevel::Suspicious
    } else if confidence <= 0.8 {
        AssessmentLevel::Routine
    } else {
        AssessmentLevel::Benign
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assessment_level_escalates_with_deception() {
        assert_eq!(assessment_level_for(0.8, 0.9), AssessmentLevel::Critical);
        assert_eq!(assessment_level_for(0.55, 0.4), AssessmentLevel::HighConcern);
        assert_eq!(assessment_level_for(0.35, 0.9), AssessmentLevel::Suspicious);
        assert_eq!(assessment_level_for(0.0, 0.75), AssessmentLevel::Routine);
        assert_eq!(assessment_level_for(0.0, 0.95), AssessmentLevel::Benign);
    }
}
