//! Normalized record types shared across source adapters, the track
//! store, and the analytics layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::geo;
use crate::identifiers;

/// A single normalized AIS position report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub mmsi: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    pub speed_knots: Option<f64>,
    pub course_deg: Option<f64>,
    pub heading_deg: Option<f64>,
    pub nav_status_code: Option<i32>,
    pub source_id: String,
    pub source_received_at: DateTime<Utc>,
}

impl Position {
    pub fn is_valid(&self) -> bool {
        identifiers::validate_mmsi(&self.mmsi)
            && geo::validate_coordinates(self.lat, self.lon)
            && !(self.lat == 0.0 && self.lon == 0.0)
    }
}

/// Static vessel particulars.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VesselInfo {
    pub mmsi: String,
    pub imo: Option<String>,
    pub name: Option<String>,
    pub callsign: Option<String>,
    pub ship_type_code: Option<i32>,
    pub ship_type_text: Option<String>,
    pub length_m: Option<f64>,
    pub width_m: Option<f64>,
    pub draught_m: Option<f64>,
    pub flag_state: Option<String>,
    pub destination: Option<String>,
    pub eta: Option<String>,
    pub source_id: String,
}

/// SAR ship detection, pre- and post-correlation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SarDetection {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub length_m: Option<f64>,
    pub width_m: Option<f64>,
    pub confidence: f64,
    pub source_file: Option<String>,
    pub matched_vessel: Option<String>,
    pub match_distance_km: Option<f64>,
}

impl SarDetection {
    pub fn is_dark_vessel(&self) -> bool {
        self.matched_vessel.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BehaviorKind {
    Loitering,
    AisGap,
    Spoofing,
    ImpossibleSpeed,
    Encounter,
    StsTransfer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BehaviorEvent {
    pub kind: BehaviorKind,
    pub mmsi: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub confidence: f64,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SanctionsAuthority {
    Ofac,
    Eu,
    Uk,
    Ca,
    Au,
    Nz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionedVesselRecord {
    pub imo: String,
    pub mmsi: Option<String>,
    pub name: String,
    pub former_names: HashSet<String>,
    pub flag: Option<String>,
    pub vessel_type: Option<String>,
    pub authorities: HashSet<SanctionsAuthority>,
    pub programs: Vec<String>,
    pub source_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ZoneKind {
    Terminal,
    StsZone,
    CableRoute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ZoneGeometry {
    Point { lat: f64, lon: f64 },
    Polyline { waypoints: Vec<(f64, f64)> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureAsset {
    pub id: String,
    pub name: String,
    pub kind: ZoneKind,
    pub geometry: ZoneGeometry,
    pub radius_nm: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    VeryLow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub mmsi: String,
    pub ais_consistency: f64,
    pub behavioral_normalcy: f64,
    pub sar_corroboration: f64,
    pub deception_likelihood: f64,
    pub ais_consistency_reason: Option<String>,
    pub behavioral_normalcy_reason: Option<String>,
    pub sar_corroboration_reason: Option<String>,
    /// Set when `ais_consistency` found a leg whose observed distance
    /// exceeded what the reported speed could cover — the same
    /// anomaly test `deception_likelihood` reads as its "position
    /// anomaly" input.
    pub had_position_anomaly: bool,
    pub computed_at: DateTime<Utc>,
}

impl ConfidenceScore {
    pub fn overall(&self) -> f64 {
        (0.35 * self.ais_consistency + 0.35 * self.behavioral_normalcy + 0.30 * self.sar_corroboration)
            .clamp(0.0, 1.0)
    }

    pub fn level(&self) -> ConfidenceLevel {
        let overall = self.overall();
        if overall >= 0.8 {
            ConfidenceLevel::High
        } else if overall >= 0.6 {
            ConfidenceLevel::Medium
        } else if overall >= 0.4 {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

pub fn risk_level_for_score(score: u32) -> RiskLevel {
    if score >= 70 {
        RiskLevel::Critical
    } else if score >= 50 {
        RiskLevel::High
    } else if score >= 30 {
        RiskLevel::Medium
    } else if score >= 15 {
        RiskLevel::Low
    } else {
        RiskLevel::Minimal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndicatorKind {
    Technical,
    Behavioral,
    Identity,
    Sanction,
    Geographic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub kind: IndicatorKind,
    pub name: String,
    pub weight: f64,
    pub source: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssessmentLevel {
    Benign,
    Routine,
    Suspicious,
    HighConcern,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub vessel_ref: String,
    pub assessment_level: AssessmentLevel,
    pub confidence: f64,
    pub indicators: Vec<Indicator>,
    pub provenance: Vec<String>,
    pub requires_review: bool,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_position() -> Position {
        Position {
            mmsi: "636012345".to_string(),
            lat: 31.0,
            lon: 121.0,
            timestamp: Utc::now(),
            speed_knots: Some(5.0),
            course_deg: None,
            heading_deg: None,
            nav_status_code: None,
            source_id: "test".to_string(),
            source_received_at: Utc::now(),
        }
    }

    #[test]
    fn position_validity_rejects_null_island() {
        let mut pos = sample_position();
        pos.lat = 0.0;
        pos.lon = 0.0;
        assert!(!pos.is_valid());
    }

    #[test]
    fn position_validity_rejects_bad_mmsi() {
        let mut pos = sample_position();
        pos.mmsi = "123456789".to_string();
        assert!(!pos.is_valid());
    }

    #[test]
    fn position_validity_accepts_well_formed_record() {
        assert!(sample_position().is_valid());
    }

    #[test]
    fn confidence_overall_is_weighted_and_clamped() {
        let score = ConfidenceScore {
            mmsi: "636012345".to_string(),
            ais_consistency: 1.0,
            behavioral_normalcy: 1.0,
            sar_corroboration: 1.0,
            deception_likelihood: 0.0,
            ais_consistency_reason: None,
            behavioral_normalcy_reason: None,
            sar_corroboration_reason: None,
            had_position_anomaly: false,
            computed_at: Utc::now(),
        };
        assert!((score.overall() - 1.0).abs() < 1e-9);
        assert_eq!(score.level(), ConfidenceLevel::High);
    }
}
