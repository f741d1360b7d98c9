//! Thin lat/lon/UTM facade.
//!
//! Spherical-earth approximations, good enough for lever-arm offsets,
//! sidescan pixel geometry, and crossing-detector bounding-box/overlap math.
//! A certified geodetic library is explicitly out of scope.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn meters_per_degree_lat() -> f64 {
    EARTH_RADIUS_M * std::f64::consts::PI / 180.0
}

pub fn meters_per_degree_lon(lat_deg: f64) -> f64 {
    meters_per_degree_lat() * lat_deg.to_radians().cos()
}

/// Offset `(lat, lon)` by `north_m` metres north and `east_m` metres east,
/// wrapping longitude across the antimeridian and clamping latitude to the
/// poles.
pub fn offset_latlon(lat_deg: f64, lon_deg: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let dlat = north_m / meters_per_degree_lat();
    let mpd_lon = meters_per_degree_lon(lat_deg);
    let dlon = if mpd_lon.abs() > 1e-9 {
        east_m / mpd_lon
    } else {
        0.0
    };
    let lat = (lat_deg + dlat).clamp(-90.0, 90.0);
    (lat, wrap_longitude(lon_deg + dlon))
}

pub fn wrap_longitude(lon_deg: f64) -> f64 {
    let mut lon = lon_deg;
    while lon > 180.0 {
        lon -= 360.0;
    }
    while lon < -180.0 {
        lon += 360.0;
    }
    lon
}

/// Great-circle distance in metres (haversine).
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// UTM zone number, 1..=60, for a longitude.
pub fn utm_zone(lon_deg: f64) -> u32 {
    ((wrap_longitude(lon_deg) + 180.0) / 6.0).floor() as u32 + 1
}

/// A spherical-earth planar projection in the style of UTM (easting,
/// northing, zone) but not a certified UTM grid — sufficient for local
/// bounding-box and distance math, never for geodetic output.
pub fn project_utm(lat_deg: f64, lon_deg: f64) -> (f64, f64, u32) {
    let zone = utm_zone(lon_deg);
    let central_meridian = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
    let easting =
        (wrap_longitude(lon_deg) - central_meridian) * meters_per_degree_lon(lat_deg) + 500_000.0;
    let northing = if lat_deg >= 0.0 {
        lat_deg * meters_per_degree_lat()
    } else {
        lat_deg * meters_per_degree_lat() + 10_000_000.0
    };
    (easting, northing, zone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_one_degree_of_latitude_is_about_111_km() {
        let (lat, _) = offset_latlon(0.0, 0.0, meters_per_degree_lat(), 0.0);
        assert!((lat - 1.0).abs() < 1e-6);
    }

    #[test]
    fn longitude_wraps_across_the_antimeridian() {
        assert!((wrap_longitude(181.0) - (-179.0)).abs() < 1e-9);
        assert!((wrap_longitude(-181.0) - 179.0).abs() < 1e-9);
    }

    #[test]
    fn utm_zone_is_one_based_and_six_degrees_wide() {
        assert_eq!(utm_zone(-177.0), 1);
        assert_eq!(utm_zone(3.0), 31);
    }

    #[test]
    fn haversine_distance_matches_known_degree_spacing() {
        let d = haversine_distance_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - meters_per_degree_lat()).abs() < 100.0);
    }
}
