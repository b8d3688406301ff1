//! Great-circle primitives over EPSG:4326 latitude/longitude, in degrees.

use serde::Deserialize;

use crate::errors::Error;
use crate::math::{vec2f, Vec2f};

pub const EARTH_RADIUS_METERS: f64 = 6.378137e6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> LatLon {
        LatLon { lat, lon }
    }
}

impl From<(f64, f64)> for LatLon {
    fn from(value: (f64, f64)) -> Self {
        LatLon {
            lat: value.0,
            lon: value.1,
        }
    }
}

/// Haversine great-circle distance in meters.
pub fn distance(a: LatLon, b: LatLon) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (lat1 - lat2) / 2.0;
    let dlon = (a.lon.to_radians() - b.lon.to_radians()) / 2.0;
    let h = dlat.sin().powi(2) + lat1.cos() * lat2.cos() * dlon.sin().powi(2);
    EARTH_RADIUS_METERS * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Initial compass bearing from `a` to `b`, degrees in (-180, 180].
pub fn bearing(a: LatLon, b: LatLon) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = b.lon.to_radians() - a.lon.to_radians();
    let x = lat2.cos() * dlon.sin();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    x.atan2(y).to_degrees()
}

/// Destination on the sphere after walking `distance_m` meters along the given
/// compass bearing. The resulting longitude is normalized to (-180, 180].
pub fn move_towards(a: LatLon, bearing_deg: f64, distance_m: f64) -> LatLon {
    let bearing = bearing_deg.to_radians();
    let lat = a.lat.to_radians();
    let lon = a.lon.to_radians();
    let angular = distance_m / EARTH_RADIUS_METERS;

    let target_lat =
        (lat.sin() * angular.cos() + lat.cos() * angular.sin() * bearing.cos()).asin();
    let mut target_lon = lon
        + (bearing.sin() * angular.sin() * lat.cos())
            .atan2(angular.cos() - lat.sin() * target_lat.sin());

    while target_lon <= -std::f64::consts::PI {
        target_lon += 2.0 * std::f64::consts::PI;
    }
    while target_lon > std::f64::consts::PI {
        target_lon -= 2.0 * std::f64::consts::PI;
    }

    LatLon {
        lat: target_lat.to_degrees(),
        lon: target_lon.to_degrees(),
    }
}

/// Local scale of the geographic graticule: meters per degree of latitude and of
/// longitude, observed by moving 1 m north and 1 m east from `p`.
pub fn meters_per_deg(p: LatLon) -> (f64, f64) {
    let distance_m = 1.0;
    let q = move_towards(move_towards(p, 90.0, distance_m), 0.0, distance_m);
    let dlat = (q.lat - p.lat).abs();
    let dlon = (q.lon - p.lon).abs();
    (distance_m / dlat, distance_m / dlon)
}

/// One of the four compass directions a tile axis can point to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompassAxis {
    East,
    West,
    North,
    South,
}

impl CompassAxis {
    /// Unit vector of this axis in the (east, north) CRS frame.
    pub(crate) fn unit(self) -> Vec2f {
        match self {
            CompassAxis::East => vec2f(1.0, 0.0),
            CompassAxis::West => vec2f(-1.0, 0.0),
            CompassAxis::North => vec2f(0.0, 1.0),
            CompassAxis::South => vec2f(0.0, -1.0),
        }
    }

    /// Signed component of `v` (given in the (east, north) frame) along this axis.
    pub(crate) fn component(self, v: Vec2f) -> f64 {
        match self {
            CompassAxis::East => v.x,
            CompassAxis::West => -v.x,
            CompassAxis::North => v.y,
            CompassAxis::South => -v.y,
        }
    }

    fn is_horizontal(self) -> bool {
        matches!(self, CompassAxis::East | CompassAxis::West)
    }
}

/// The directions of a layout's tile axes relative to geographic east/north.
/// The two axes must be perpendicular.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompassAxes {
    pub x: CompassAxis,
    pub y: CompassAxis,
}

impl CompassAxes {
    pub fn new(x: CompassAxis, y: CompassAxis) -> Result<CompassAxes, Error> {
        if x.is_horizontal() == y.is_horizontal() {
            return Err(Error::InvalidArgument(format!(
                "tile axes {:?} and {:?} are not perpendicular",
                x, y
            )));
        }
        Ok(CompassAxes { x, y })
    }
}

#[cfg(test)]
mod tests {
    use testutils::assert_float_eq;

    use super::*;

    #[test]
    fn test_distance_zero() {
        let p = LatLon::new(43.6, 1.44);
        assert_float_eq(distance(p, p), 0.0, 1e-9);
    }

    #[test]
    fn test_distance_antipode() {
        let p = LatLon::new(12.0, 34.0);
        let antipode = LatLon::new(-12.0, 34.0 - 180.0);
        assert_float_eq(
            distance(p, antipode),
            std::f64::consts::PI * EARTH_RADIUS_METERS,
            1.0,
        );
    }

    #[test]
    fn test_distance_one_degree_at_equator() {
        // One degree of longitude at the equator is ~111.3 km for R=6378137
        let d = distance(LatLon::new(0.0, 0.0), LatLon::new(0.0, 1.0));
        assert_float_eq(d, EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0, 1e-3);
    }

    #[test]
    fn test_bearing_cardinal() {
        let p = LatLon::new(10.0, 20.0);
        assert_float_eq(bearing(p, LatLon::new(11.0, 20.0)), 0.0, 1e-9);
        assert_float_eq(bearing(p, LatLon::new(9.0, 20.0)), 180.0, 1e-9);
        // Due east/west are only exact on the equator; at 10 deg north they
        // deviate by the great-circle convergence
        assert_float_eq(bearing(p, LatLon::new(10.0, 20.1)), 90.0, 0.02);
        assert_float_eq(bearing(p, LatLon::new(10.0, 19.9)), -90.0, 0.02);
    }

    #[test]
    fn test_move_towards_roundtrip() {
        let p = LatLon::new(48.1374, 11.5755);
        let q = LatLon::new(47.3769, 8.5417);
        let r = move_towards(p, bearing(p, q), distance(p, q));
        assert_float_eq(distance(r, q), 0.0, 0.1);
    }

    #[test]
    fn test_move_towards_normalizes_longitude() {
        let p = LatLon::new(0.0, 179.9);
        let q = move_towards(p, 90.0, 50_000.0);
        assert!(q.lon <= 180.0 && q.lon > -180.0);
        assert!(q.lon < -179.0);
    }

    #[test]
    fn test_meters_per_deg_at_equator() {
        let (per_lat, per_lon) = meters_per_deg(LatLon::new(0.0, 0.0));
        let expected = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;
        assert_float_eq(per_lat, expected, expected * 1e-5);
        assert_float_eq(per_lon, expected, expected * 1e-5);
    }

    #[test]
    fn test_meters_per_deg_shrinks_with_latitude() {
        let (_, per_lon_equator) = meters_per_deg(LatLon::new(0.0, 0.0));
        let (_, per_lon_60) = meters_per_deg(LatLon::new(60.0, 0.0));
        assert_float_eq(per_lon_60, per_lon_equator * 60f64.to_radians().cos(), 50.0);
    }

    #[test]
    fn test_compass_axes_validation() {
        assert!(CompassAxes::new(CompassAxis::East, CompassAxis::South).is_ok());
        assert!(CompassAxes::new(CompassAxis::East, CompassAxis::West).is_err());
        assert!(CompassAxes::new(CompassAxis::North, CompassAxis::South).is_err());
    }
}
