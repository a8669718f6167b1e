//! Utility functions for coordinate conversions between the map widget (WGS84)
//! and the analysis spatial reference (Web Mercator)

use geo::{Coord, Point, Rect};

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -20037508.34;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Precomputed constant: EARTH_MERCATOR_MAX / 180.0
const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / PI
const Y_FACTOR: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;

/// Precomputed constant: 180.0 / EARTH_MERCATOR_MAX
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;

/// Precomputed constant: PI / EARTH_MERCATOR_MAX
const Y_TO_LAT_FACTOR: f64 = std::f64::consts::PI / EARTH_MERCATOR_MAX;

/// Convert WGS84 (lat, lon) to Web Mercator (x, y) in meters
///
/// # Arguments
/// * `lat` - Latitude in degrees (-85.05 to 85.05)
/// * `lon` - Longitude in degrees (-180 to 180)
///
/// # Returns
/// A `Point<f64>` with x (easting) and y (northing) in meters
#[inline(always)]
pub fn wgs84_to_mercator(lat: f64, lon: f64) -> Point<f64> {
    // Clamp latitude to valid Web Mercator range
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let x = lon * LON_TO_X_FACTOR;
    let lat_rad = lat.to_radians();
    let y = (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * Y_FACTOR;

    Point::new(x, y)
}

/// Convert Web Mercator (x, y) in meters to WGS84 (lat, lon)
///
/// # Returns
/// A tuple of (latitude, longitude) in degrees
#[inline(always)]
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = x * X_TO_LON_FACTOR;
    let lat =
        (std::f64::consts::PI / 2.0 - 2.0 * ((-y * Y_TO_LAT_FACTOR).exp()).atan()).to_degrees();
    (lat, lon)
}

/// Check if a point is within Web Mercator bounds
#[inline(always)]
pub fn is_valid_mercator(point: &Point<f64>) -> bool {
    let x = point.x();
    let y = point.y();
    x >= EARTH_MERCATOR_MIN
        && x <= EARTH_MERCATOR_MAX
        && y >= EARTH_MERCATOR_MIN
        && y <= EARTH_MERCATOR_MAX
}

/// Web Mercator stretches ground distances by `1 / cos(lat)`.
///
/// Multiply a ground distance in meters by this factor to get the equivalent
/// distance in projected Mercator meters at the given latitude.
#[inline]
pub fn mercator_scale_factor(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    1.0 / lat.to_radians().cos()
}

/// Build a Web Mercator rectangle from two WGS84 corners given in any order
pub fn wgs84_rect_to_mercator(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> Rect<f64> {
    let min = wgs84_to_mercator(lat_a.min(lat_b), lon_a.min(lon_b));
    let max = wgs84_to_mercator(lat_a.max(lat_b), lon_a.max(lon_b));
    Rect::new(
        Coord {
            x: min.x(),
            y: min.y(),
        },
        Coord {
            x: max.x(),
            y: max.y(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wgs84_to_mercator_origin() {
        let point = wgs84_to_mercator(0.0, 0.0);
        assert!((point.x() - 0.0).abs() < 0.01);
        assert!((point.y() - 0.0).abs() < 0.01);
    }

    #[test]
    fn test_wgs84_to_mercator_bounds() {
        let west = wgs84_to_mercator(0.0, -180.0);
        assert!((west.x() - EARTH_MERCATOR_MIN).abs() < 1.0);

        let east = wgs84_to_mercator(0.0, 180.0);
        assert!((east.x() - EARTH_MERCATOR_MAX).abs() < 1.0);
    }

    #[test]
    fn test_mercator_to_wgs84_roundtrip_edinburgh() {
        let lat = 55.942;
        let lon = -3.210;

        let mercator = wgs84_to_mercator(lat, lon);
        let (lat2, lon2) = mercator_to_wgs84(mercator.x(), mercator.y());

        assert!((lat - lat2).abs() < 0.0001);
        assert!((lon - lon2).abs() < 0.0001);
    }

    #[test]
    fn test_is_valid_mercator() {
        assert!(is_valid_mercator(&Point::new(0.0, 0.0)));
        assert!(!is_valid_mercator(&Point::new(
            EARTH_MERCATOR_MAX + 1.0,
            0.0
        )));
    }

    #[test]
    fn test_scale_factor_grows_with_latitude() {
        assert!((mercator_scale_factor(0.0) - 1.0).abs() < 1e-12);
        // Edinburgh: roughly 1.78
        let edinburgh = mercator_scale_factor(55.942);
        assert!(edinburgh > 1.7 && edinburgh < 1.8, "{edinburgh}");
    }

    #[test]
    fn test_rect_corners_any_order() {
        let a = wgs84_rect_to_mercator(55.95, -3.20, 55.94, -3.21);
        let b = wgs84_rect_to_mercator(55.94, -3.21, 55.95, -3.20);
        assert_eq!(a, b);
        assert!(a.width() > 0.0 && a.height() > 0.0);
    }
}
