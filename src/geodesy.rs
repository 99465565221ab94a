//! Spherical-earth geodesy kernel used by the mesh builder and the router.

use thiserror::Error;

use crate::models::Coordinate;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const EARTH_RADIUS_NM: f64 = 3_440.065;
pub const METERS_PER_NM: f64 = 1_852.0;
/// Arc minutes per degree, i.e. nautical miles per degree of latitude.
pub const NM_PER_DEGREE: f64 = 60.0;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GeodesyError {
    #[error("non-finite coordinate or quantity")]
    NonFinite,
}

pub fn nm_to_m(nm: f64) -> f64 {
    nm * METERS_PER_NM
}

pub fn m_to_nm(m: f64) -> f64 {
    m / METERS_PER_NM
}

/// Normalizes a heading to `[0, 360)` degrees.
pub fn normalize_heading(deg: f64) -> f64 {
    let mut value = deg % 360.0;
    if value < 0.0 {
        value += 360.0;
    }
    // -1e-18 % 360 rounds back to 360.0 after the add
    if value >= 360.0 { 0.0 } else { value }
}

/// Normalizes a signed angle to `(-180, 180]` degrees.
pub fn normalize_signed(deg: f64) -> f64 {
    let mut value = deg % 360.0;
    if value > 180.0 {
        value -= 360.0;
    }
    if value <= -180.0 {
        value += 360.0;
    }
    value
}

fn checked(value: f64) -> Result<f64, GeodesyError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(GeodesyError::NonFinite)
    }
}

fn checked_point(p: Coordinate) -> Result<Coordinate, GeodesyError> {
    if p.lat.is_finite() && p.lon.is_finite() {
        Ok(p)
    } else {
        Err(GeodesyError::NonFinite)
    }
}

/// Great-circle (haversine) distance in meters.
pub fn great_circle_distance_m(a: Coordinate, b: Coordinate) -> Result<f64, GeodesyError> {
    checked_point(a)?;
    checked_point(b)?;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();

    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    checked(2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin())
}

/// Forward azimuth from `a` to `b` in `[0, 360)` degrees.
pub fn initial_bearing(a: Coordinate, b: Coordinate) -> Result<f64, GeodesyError> {
    checked_point(a)?;
    checked_point(b)?;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    checked(normalize_heading(y.atan2(x).to_degrees()))
}

/// Point reached from `start` after `distance_m` meters on `bearing_deg`.
pub fn destination(
    start: Coordinate,
    bearing_deg: f64,
    distance_m: f64,
) -> Result<Coordinate, GeodesyError> {
    checked_point(start)?;
    checked(bearing_deg)?;
    checked(distance_m)?;

    let angular = distance_m / EARTH_RADIUS_M;
    let bearing = bearing_deg.to_radians();
    let lat1 = start.lat.to_radians();
    let lon1 = start.lon.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    checked_point(Coordinate {
        lat: lat2.to_degrees(),
        lon: normalize_signed(lon2.to_degrees()),
    })
}

/// Great-circle midpoint between `a` and `b`.
pub fn midpoint(a: Coordinate, b: Coordinate) -> Result<Coordinate, GeodesyError> {
    checked_point(a)?;
    checked_point(b)?;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let lon1 = a.lon.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let bx = lat2.cos() * dlon.cos();
    let by = lat2.cos() * dlon.sin();
    let lat_m = (lat1.sin() + lat2.sin())
        .atan2(((lat1.cos() + bx).powi(2) + by * by).sqrt());
    let lon_m = lon1 + by.atan2(lat1.cos() + bx);

    checked_point(Coordinate {
        lat: lat_m.to_degrees(),
        lon: normalize_signed(lon_m.to_degrees()),
    })
}

/// Loxodrome (constant-bearing) distance in meters. Only used for corridor
/// shaping and auto-preset derivation; edge bearings stay true-azimuth.
pub fn rhumb_distance_m(a: Coordinate, b: Coordinate) -> Result<f64, GeodesyError> {
    checked_point(a)?;
    checked_point(b)?;

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = lat2 - lat1;
    let dlon = normalize_signed(b.lon - a.lon).to_radians();

    let dpsi = ((std::f64::consts::FRAC_PI_4 + lat2 / 2.0).tan()
        / (std::f64::consts::FRAC_PI_4 + lat1 / 2.0).tan())
    .ln();
    let q = if dpsi.abs() > 1e-12 { dlat / dpsi } else { lat1.cos() };

    checked(EARTH_RADIUS_M * (dlat * dlat + q * q * dlon * dlon).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate { lat, lon }
    }

    #[test]
    fn one_degree_of_latitude_is_sixty_nm() {
        let a = coord(54.0, 18.5);
        let b = coord(55.0, 18.5);
        let nm = m_to_nm(great_circle_distance_m(a, b).unwrap());
        assert!((nm - 60.04).abs() < 0.1, "got {nm} NM");
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = coord(54.5, 18.5);
        let north = coord(55.5, 18.5);
        let east = coord(54.5, 19.5);
        assert!((initial_bearing(origin, north).unwrap() - 0.0).abs() < 0.01);
        assert!((initial_bearing(origin, east).unwrap() - 90.0).abs() < 1.0);
    }

    #[test]
    fn midpoint_lies_between() {
        let a = coord(54.0, 18.0);
        let b = coord(55.0, 19.0);
        let m = midpoint(a, b).unwrap();
        assert!(m.lat > 54.0 && m.lat < 55.0);
        assert!(m.lon > 18.0 && m.lon < 19.0);
    }

    #[test]
    fn nan_input_is_a_typed_error() {
        let a = coord(f64::NAN, 18.0);
        let b = coord(55.0, 19.0);
        assert_eq!(great_circle_distance_m(a, b), Err(GeodesyError::NonFinite));
        assert_eq!(initial_bearing(a, b), Err(GeodesyError::NonFinite));
        assert!(midpoint(a, b).is_err());
        assert!(destination(b, f64::INFINITY, 100.0).is_err());
    }

    #[test]
    fn normalize_signed_half_open_range() {
        assert_eq!(normalize_signed(180.0), 180.0);
        assert_eq!(normalize_signed(-180.0), 180.0);
        assert_eq!(normalize_signed(540.0), 180.0);
        assert_eq!(normalize_signed(-90.0), -90.0);
    }

    #[test]
    fn rhumb_close_to_great_circle_on_short_legs() {
        let a = coord(54.3, 18.6);
        let b = coord(54.4, 18.9);
        let gc = great_circle_distance_m(a, b).unwrap();
        let rh = rhumb_distance_m(a, b).unwrap();
        assert!((gc - rh).abs() / gc < 0.005);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn valid_coord() -> impl Strategy<Value = Coordinate> {
            (-80.0..=80.0, -179.0..=179.0).prop_map(|(lat, lon)| Coordinate { lat, lon })
        }

        proptest! {
            #[test]
            fn prop_distance_non_negative(a in valid_coord(), b in valid_coord()) {
                prop_assert!(great_circle_distance_m(a, b).unwrap() >= 0.0);
            }

            #[test]
            fn prop_distance_symmetric(a in valid_coord(), b in valid_coord()) {
                let ab = great_circle_distance_m(a, b).unwrap();
                let ba = great_circle_distance_m(b, a).unwrap();
                prop_assert!((ab - ba).abs() < 1e-6);
            }

            #[test]
            fn prop_distance_same_point_is_zero(p in valid_coord()) {
                prop_assert_eq!(great_circle_distance_m(p, p).unwrap(), 0.0);
            }

            #[test]
            fn prop_triangle_inequality(
                a in valid_coord(),
                b in valid_coord(),
                c in valid_coord()
            ) {
                let ab = great_circle_distance_m(a, b).unwrap();
                let bc = great_circle_distance_m(b, c).unwrap();
                let ac = great_circle_distance_m(a, c).unwrap();
                prop_assert!(ac <= ab + bc + 1e-6);
            }

            #[test]
            fn prop_bearing_in_range(a in valid_coord(), b in valid_coord()) {
                let bearing = initial_bearing(a, b).unwrap();
                prop_assert!((0.0..360.0).contains(&bearing));
            }

            #[test]
            fn prop_destination_round_trip(
                start in valid_coord(),
                bearing in 0.0..360.0f64,
                distance_m in 1.0..500_000.0f64
            ) {
                let end = destination(start, bearing, distance_m).unwrap();
                let measured = great_circle_distance_m(start, end).unwrap();
                // accuracy floor from the contract: 0.1% at <= 500 NM
                prop_assert!((measured - distance_m).abs() <= distance_m * 0.001 + 0.5);
            }

            #[test]
            fn prop_midpoint_equidistant(a in valid_coord(), b in valid_coord()) {
                let m = midpoint(a, b).unwrap();
                let am = great_circle_distance_m(a, m).unwrap();
                let mb = great_circle_distance_m(m, b).unwrap();
                prop_assert!((am - mb).abs() <= 1.0 + (am + mb) * 1e-6);
            }
        }
    }
}
