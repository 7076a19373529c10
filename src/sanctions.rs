//! Sanctions & Zone Index: exact-then-fuzzy vessel lookup against a
//! sanctions list, and point/polyline geofence containment against a
//! set of named zones.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::geo::haversine_km;
use crate::models::{InfrastructureAsset, SanctionedVesselRecord, ZoneGeometry};

const VESSEL_PREFIXES: &[&str] = &["MV", "M/V", "MT", "M/T", "SS", "HMS", "USNS"];

/// Upper-cases, collapses whitespace, and strips a leading vessel-type
/// prefix. Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize_name(raw: &str) -> String {
    let upper = raw.to_uppercase();
    let collapsed: String = upper.split_whitespace().collect::<Vec<_>>().join(" ");
    for prefix in VESSEL_PREFIXES {
        if let Some(rest) = collapsed.strip_prefix(prefix) {
            let rest = rest.trim_start();
            if !rest.is_empty() {
                return rest.to_string();
            }
        }
    }
    collapsed
}

/// Symmetric character-set overlap: `|A ∩ B| / max(|A|, |B|)` over the
/// set of characters in each normalized name (not substring identity).
fn character_overlap(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let set_a: HashSet<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let set_b: HashSet<char> = b.chars().filter(|c| !c.is_whitespace()).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let denom = set_a.len().max(set_b.len()) as f64;
    intersection / denom
}

pub struct SanctionsIndex {
    by_imo: RwLock<HashMap<String, SanctionedVesselRecord>>,
    by_mmsi: RwLock<HashMap<String, String>>,
    by_name: RwLock<HashMap<String, String>>,
    former_names: RwLock<HashMap<String, String>>,
}

impl SanctionsIndex {
    pub fn new() -> Self {
        Self {
            by_imo: RwLock::new(HashMap::new()),
            by_mmsi: RwLock::new(HashMap::new()),
            by_name: RwLock::new(HashMap::new()),
            former_names: RwLock::new(HashMap::new()),
        }
    }

    pub fn load(records: Vec<SanctionedVesselRecord>) -> Self {
        let index = Self::new();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn insert(&self, record: SanctionedVesselRecord) {
        if let Some(mmsi) = &record.mmsi {
            self.by_mmsi.write().insert(mmsi.clone(), record.imo.clone());
        }
        self.by_name.write().insert(normalize_name(&record.name), record.imo.clone());
        for former in &record.former_names {
            self.former_names.write().insert(normalize_name(former), record.imo.clone());
        }
        self.by_imo.write().insert(record.imo.clone(), record);
    }

    /// IMO exact → MMSI exact → normalized-name exact → fuzzy over
    /// former-names (symmetric character-set overlap ≥ 0.8).
    pub fn lookup(&self, imo: Option<&str>, mmsi: Option<&str>, name: Option<&str>) -> Option<SanctionedVesselRecord> {
        if let Some(imo) = imo {
            if let Some(record) = self.by_imo.read().get(imo) {
                return Some(record.clone());
            }
        }
        if let Some(mmsi) = mmsi {
            if let Some(imo) = self.by_mmsi.read().get(mmsi) {
                return self.by_imo.read().get(imo).cloned();
            }
        }
        if let Some(name) = name {
            let normalized = normalize_name(name);
            if let Some(imo) = self.by_name.read().get(&normalized) {
                return self.by_imo.read().get(imo).cloned();
            }
            let former_names = self.former_names.read();
            let mut best: Option<(&String, f64)> = None;
            for (former, imo) in former_names.iter() {
                let overlap = character_overlap(&normalized, former);
                if overlap >= 0.8 && best.as_ref().map(|(_, b)| overlap > *b).unwrap_or(true) {
                    best = Some((imo, overlap));
                }
            }
            if let Some((imo, _)) = best {
                return self.by_imo.read().get(imo).cloned();
            }
        }
        None
    }
}

impl Default for SanctionsIndex {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ZoneIndex {
    assets: Vec<InfrastructureAsset>,
}

impl ZoneIndex {
    pub fn new(assets: Vec<InfrastructureAsset>) -> Self {
        Self { assets }
    }

    /// Returns every zone whose geometry contains `(lat, lon)`.
    /// Point zones use a radius check; polylines use per-segment
    /// nearest-point distance against the buffer radius.
    pub fn zones_for(&self, lat: f64, lon: f64) -> Vec<&InfrastructureAsset> {
        self.assets
            .iter()
            .filter(|asset| match &asset.geometry {
                ZoneGeometry::Point { lat: zlat, lon: zlon } => {
                    haversine_km(lat, lon, *zlat, *zlon) / 1.852 <= asset.radius_nm
                }
                ZoneGeometry::Polyline { waypoints } => {
                    nearest_segment_distance_km(lat, lon, waypoints) / 1.852 <= asset.radius_nm
                }
            })
            .collect()
    }
}

/// Perpendicular (great-circle-approximated via planar projection at
/// this scale) distance from a point to the nearest segment of a
/// polyline, in kilometers.
fn nearest_segment_distance_km(lat: f64, lon: f64, waypoints: &[(f64, f64)]) -> f64 {
    if waypoints.len() < 2 {
        return waypoints
            .first()
            .map(|(wlat, wlon)| haversine_km(lat, lon, *wlat, *wlon))
            .unwrap_or(f64::INFINITY);
    }
    waypoints
        .windows(2)
        .map(|pair| point_to_segment_km(lat, lon, pair[0], pair[1]))
        .fold(f64::INFINITY, f64::min)
}

fn point_to_segment_km(lat: f64, lon: f64, a: (f64, f64), b: (f64, f64)) -> f64 {
    let (ax, ay) = a;
    let (bx, by) = b;
    let (px, py) = (lat, lon);

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return haversine_km(px, py, ax, ay);
    }
    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);
    let (projected_lat, projected_lon) = (ax + t * dx, ay + t * dy);
    haversine_km(px, py, projected_lat, projected_lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashSet;

    fn sample_record() -> SanctionedVesselRecord {
        SanctionedVesselRecord {
            imo: "9999999".to_string(),
            mmsi: Some("636012345".to_string()),
            name: "SKIPPER".to_string(),
            former_names: HashSet::from(["ADISA".to_string()]),
            flag: Some("Gabon".to_string()),
            vessel_type: Some("tanker".to_string()),
            authorities: HashSet::new(),
            programs: vec![],
            source_id: "test".to_string(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn name_normalization_is_idempotent() {
        let name = "M/V   Skipper  ";
        let once = normalize_name(name);
        let twice = normalize_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn fuzzy_lookup_matches_former_name() {
        let index = SanctionsIndex::load(vec![sample_record()]);
        let found = index.lookup(None, None, Some("ADISA")).expect("should fuzzy match");
        assert_eq!(found.name, "SKIPPER");
    }

    #[test]
    fn imo_exact_lookup_wins_over_name() {
        let index = SanctionsIndex::load(vec![sample_record()]);
        let found = index.lookup(Some("9999999"), None, None).expect("imo lookup");
        assert_eq!(found.imo, "9999999");
    }

    #[test]
    fn zone_point_lookup_respects_radius() {
        let zones = ZoneIndex::new(vec![InfrastructureAsset {
            id: "z1".to_string(),
            name: "Terminal".to_string(),
            kind: crate::models::ZoneKind::Terminal,
            geometry: ZoneGeometry::Point { lat: 10.15, lon: -64.68 },
            radius_nm: 5.0,
        }]);
        assert_eq!(zones.zones_for(10.15, -64.68).len(), 1);
        assert!(zones.zones_for(20.0, 20.0).is_empty());
    }
}
