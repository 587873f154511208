//! Great-circle distance and coordinate bucketing.

use crate::types::Location;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometres.
pub fn haversine_km(a: Location, b: Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Round a coordinate to `precision` decimal places. Used for cache bucketing.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let r = (value * factor).round() / factor;
    // avoid "-0.0000" keys
    if r == 0.0 {
        0.0
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_same_point() {
        let p = Location::new(36.6, -121.9);
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn known_distance_paris_london() {
        let paris = Location::new(48.8566, 2.3522);
        let london = Location::new(51.5074, -0.1278);
        let d = haversine_km(paris, london);
        assert!((d - 343.5).abs() < 2.0, "got {d}");
    }

    #[test]
    fn one_degree_latitude_is_about_111_km() {
        let d = haversine_km(Location::new(0.0, 0.0), Location::new(1.0, 0.0));
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn rounding_buckets_nearby_points() {
        assert_eq!(round_to(25.761_681, 4), 25.7617);
        assert_eq!(round_to(25.761_649, 4), 25.7616);
        assert_eq!(round_to(-0.000_01, 4), 0.0);
    }
}
