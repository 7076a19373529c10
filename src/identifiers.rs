//! MMSI/IMO syntactic validation, MID→country mapping, and flag
//! classification (flag-of-convenience vs shadow-fleet).

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// Maritime Identification Digits (first three MMSI digits) mapped
    /// to their flag country. Not exhaustive — enough of the real ITU
    /// table to resolve the flags this system cares about.
    static ref MID_TO_COUNTRY: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        // Europe
        m.insert("201", "Albania");
        m.insert("202", "Andorra");
        m.insert("244", "Netherlands");
        m.insert("247", "Italy");
        m.insert("248", "Malta");
        m.insert("255", "Madeira");
        m.insert("256", "Malta");
        m.insert("261", "Poland");
        m.insert("268", "Portugal");
        m.insert("271", "Romania");
        m.insert("273", "Russia");
        m.insert("276", "Ukraine");
        m.insert("278", "San Marino");
        // Middle East / Gulf
        m.insert("422", "Iran");
        m.insert("428", "Oman");
        m.insert("445", "North Korea");
        m.insert("431", "Japan");
        // Africa
        m.insert("612", "Sierra Leone");
        m.insert("626", "Gabon");
        m.insert("636", "Liberia");
        m.insert("645", "Cameroon");
        m.insert("654", "Mozambique");
        // Americas
        m.insert("303", "Alaska");
        m.insert("338", "United States");
        m.insert("345", "Mexico");
        m.insert("353", "Panama");
        m.insert("354", "Panama");
        m.insert("370", "Panama");
        m.insert("371", "Panama");
        m.insert("372", "Panama");
        m.insert("373", "Panama");
        m.insert("374", "Panama");
        m.insert("775", "Marshall Islands");
        m.insert("538", "Marshall Islands");
        m.insert("755", "Venezuela");
        // Asia-Pacific
        m.insert("412", "China");
        m.insert("413", "China");
        m.insert("414", "China");
        m.insert("416", "Taiwan");
        m.insert("440", "South Korea");
        m.insert("441", "South Korea");
        m.insert("477", "Hong Kong");
        m.insert("563", "Singapore");
        m.insert("564", "Singapore");
        m
    };

    /// Well-known placeholder MMSIs rejected outright as "fake".
    static ref INVALID_MMSIS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for mmsi in [
            "000000000", "111111111", "123456789", "999999999",
            "000000001", "888888888", "012345678",
        ] {
            s.insert(mmsi);
        }
        s
    };

    /// Registries chosen for regulatory laxity rather than national
    /// ties. A flag may be FOC, shadow-fleet, both, or neither.
    static ref FLAGS_OF_CONVENIENCE: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for f in [
            "Panama", "Liberia", "Marshall Islands", "Malta", "Cyprus",
            "Bahamas", "Cambodia", "Comoros", "Palau", "Antigua and Barbuda",
        ] {
            s.insert(f);
        }
        s
    };

    /// Flags disproportionately used by sanctions-evading tankers.
    static ref SHADOW_FLEET_FLAGS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        for f in ["Gabon", "Cameroon", "San Marino", "Cook Islands", "Palau"] {
            s.insert(f);
        }
        s
    };
}

/// MMSI prefix kind, beyond the plain-vessel case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmsiKind {
    CoastStation,
    SarAircraft,
    AuxiliaryCraft,
    Vessel,
}

pub fn classify_mmsi_kind(mmsi: &str) -> MmsiKind {
    if mmsi.starts_with("00") {
        MmsiKind::CoastStation
    } else if mmsi.starts_with("111") {
        MmsiKind::SarAircraft
    } else if mmsi.starts_with("98") {
        MmsiKind::AuxiliaryCraft
    } else {
        MmsiKind::Vessel
    }
}

/// Exactly 9 digits and not a known placeholder.
pub fn validate_mmsi(mmsi: &str) -> bool {
    mmsi.len() == 9 && mmsi.chars().all(|c| c.is_ascii_digit()) && !INVALID_MMSIS.contains(mmsi)
}

pub fn get_flag_country(mmsi: &str) -> Option<&'static str> {
    if mmsi.len() < 3 {
        return None;
    }
    MID_TO_COUNTRY.get(&mmsi[0..3]).copied()
}

/// Exactly 7 digits; validates the IMO check digit when the format is
/// otherwise well-formed (digits 1-6 weighted 7,6,5,4,3,2, summed mod
/// 10 equal to digit 7).
pub fn validate_imo(imo: &str) -> bool {
    if imo.len() != 7 || !imo.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<u32> = imo.chars().map(|c| c.to_digit(10).unwrap()).collect();
    let checksum: u32 = digits[0..6]
        .iter()
        .zip([7, 6, 5, 4, 3, 2])
        .map(|(d, w)| d * w)
        .sum();
    checksum % 10 == digits[6]
}

pub fn is_flag_of_convenience(flag: &str) -> bool {
    FLAGS_OF_CONVENIENCE.contains(flag)
}

pub fn is_shadow_fleet_flag(flag: &str) -> bool {
    SHADOW_FLEET_FLAGS.contains(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_placeholder_mmsis() {
        assert!(!validate_mmsi("123456789"));
        assert!(!validate_mmsi("000000000"));
    }

    #[test]
    fn accepts_well_formed_mmsi() {
        assert!(validate_mmsi("636012345"));
    }

    #[test]
    fn resolves_flag_country_from_mid() {
        assert_eq!(get_flag_country("636012345"), Some("Liberia"));
        assert_eq!(get_flag_country("626998877"), Some("Gabon"));
    }

    #[test]
    fn flag_can_be_both_foc_and_shadow_or_neither() {
        assert!(is_shadow_fleet_flag("Gabon") && !is_flag_of_convenience("Gabon"));
        assert!(is_flag_of_convenience("Panama") && !is_shadow_fleet_flag("Panama"));
        assert!(!is_flag_of_convenience("United States") && !is_shadow_fleet_flag("United States"));
    }

    #[test]
    fn imo_check_digit_validates() {
        // 9074729 is a commonly cited valid IMO checksum example.
        assert!(validate_imo("9074729"));
        assert!(!validate_imo("9074720"));
    }
}
