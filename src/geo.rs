//! Great-circle distance, bounding-box containment, and permissive
//! timestamp parsing/normalization.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Mean Earth radius in kilometers, matching the spherical-Earth
/// approximation used throughout the analytics layer.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    km_to_nm(haversine_km(lat1, lon1, lat2, lon2))
}

pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_km(lat1, lon1, lat2, lon2) * 1000.0
}

pub fn nm_to_km(nm: f64) -> f64 {
    nm * 1.852
}

pub fn km_to_nm(km: f64) -> f64 {
    km / 1.852
}

/// Tolerance-banded origin check, distinct from the exact `(0,0)`
/// check in `Position::is_valid` — used by adapters to filter noisy
/// near-origin readings before they ever reach validation.
pub fn is_null_island(lat: f64, lon: f64, threshold: f64) -> bool {
    lat.abs() < threshold && lon.abs() < threshold
}

pub fn validate_coordinates(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub const GLOBAL: BoundingBox = BoundingBox {
        lat_min: -90.0,
        lon_min: -180.0,
        lat_max: 90.0,
        lon_max: 180.0,
    };

    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        }
    }

    /// Inclusive on all four edges.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }
}

/// Result of a permissive timestamp parse: the normalized UTC instant,
/// plus whether the input was unparseable and the clock had to be
/// substituted.
#[derive(Debug, Clone, Copy)]
pub struct ParsedTimestamp {
    pub when: DateTime<Utc>,
    pub recovered: bool,
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S GMT",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parses ISO-8601 (with or without timezone), `"YYYY-MM-DD HH:MM:SS
/// [GMT]"`, or numeric Unix seconds. Naive values are treated as UTC.
/// Any unparseable string falls back to the current UTC clock with
/// `recovered = true`.
pub fn parse_timestamp(raw: &str) -> ParsedTimestamp {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return ParsedTimestamp {
            when: dt.with_timezone(&Utc),
            recovered: false,
        };
    }

    if let Ok(secs) = raw.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
            return ParsedTimestamp {
                when: dt,
                recovered: false,
            };
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return ParsedTimestamp {
                when: Utc.from_utc_datetime(&naive),
                recovered: false,
            };
        }
    }

    ParsedTimestamp {
        when: Utc::now(),
        recovered: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_is_symmetric_and_zero_at_self() {
        let d1 = haversine_km(31.0, 121.0, 40.0, 130.0);
        let d2 = haversine_km(40.0, 130.0, 31.0, 121.0);
        assert!((d1 - d2).abs() < 1e-9);
        assert!(haversine_km(10.0, 20.0, 10.0, 20.0) < 1e-9);
    }

    #[test]
    fn bounding_box_is_inclusive_on_edges() {
        let bbox = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        assert!(bbox.contains(10.0, 10.0));
        assert!(bbox.contains(20.0, 20.0));
        assert!(!bbox.contains(9.99, 15.0));
    }

    #[test]
    fn unparseable_timestamp_is_recovered() {
        let parsed = parse_timestamp("not-a-timestamp");
        assert!(parsed.recovered);
    }

    #[test]
    fn naive_timestamp_is_treated_as_utc() {
        let parsed = parse_timestamp("2025-01-01 10:30:00");
        assert!(!parsed.recovered);
        assert_eq!(parsed.when.to_rfc3339(), "2025-01-01T10:30:00+00:00");
    }

    #[test]
    fn null_island_tolerance_differs_from_exact_check() {
        assert!(is_null_island(0.05, -0.02, 0.1));
        assert!(!is_null_island(0.5, 0.5, 0.1));
    }
}
