//! Shared utility functions for SLR crates.

/// Great-circle distance helpers
pub mod geodesy {
    /// Mean Earth radius (IUGG) in kilometres.
    pub const EARTH_RADIUS_KM: f64 = 6371.0088;

    /// Haversine distance in kilometres between two lon/lat points in degrees.
    pub fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
        let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
        let dphi = phi2 - phi1;
        let dlambda = (lon2 - lon1).to_radians();
        let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }

    /// True when the pair is a usable lon/lat coordinate.
    pub fn is_valid_lon_lat(lon: f64, lat: f64) -> bool {
        lon.is_finite() && lat.is_finite() && (-90.0..=90.0).contains(&lat)
    }

}

/// CSV header and cell helpers
pub mod text {
    /// Characters that make a spreadsheet treat a cell as a formula.
    pub const FORMULA_PREFIXES: [char; 6] = ['=', '+', '-', '@', '\t', '\r'];

    /// Lowercase a header and strip everything that is not `[a-z0-9]`.
    ///
    /// `"Station_ID"`, `"station id"` and `"STATION-ID"` all become `"stationid"`.
    pub fn normalize_header(s: &str) -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect()
    }

    /// True when the cell starts with a formula-injection character.
    ///
    /// Only leading spaces are skipped; a leading tab or carriage return is
    /// itself a formula prefix.
    pub fn has_formula_prefix(cell: &str) -> bool {
        cell.trim_start_matches(' ')
            .chars()
            .next()
            .map(|c| FORMULA_PREFIXES.contains(&c))
            .unwrap_or(false)
    }

    /// Strip a UTF-8 byte order mark left by spreadsheet exports.
    pub fn strip_bom(s: &str) -> &str {
        s.strip_prefix('\u{feff}').unwrap_or(s)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_normalize_header() {
            assert_eq!(normalize_header("Station_ID"), "stationid");
            assert_eq!(normalize_header(" lon (dd) "), "londd");
            assert_eq!(normalize_header("RL 100 (m)"), "rl100m");
        }

        #[test]
        fn test_formula_prefix() {
            assert!(has_formula_prefix("=CMD()"));
            assert!(has_formula_prefix("  +1"));
            assert!(has_formula_prefix("-0.2"));
            assert!(has_formula_prefix("@SUM(A1)"));
            assert!(has_formula_prefix("\t0.5"));
            assert!(has_formula_prefix("\r0.5"));
            assert!(!has_formula_prefix("0.55"));
            assert!(!has_formula_prefix(""));
        }

        #[test]
        fn test_strip_bom() {
            assert_eq!(strip_bom("\u{feff}process"), "process");
            assert_eq!(strip_bom("process"), "process");
        }
    }
}
