use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use geo_types::Point;
use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};

use crate::error::RouteError;
use crate::models::{Coordinate, RouteVariant};

/// Encodes one routed variant as a base64 GPX track.
pub fn encode_variant_as_gpx(variant: &RouteVariant) -> Result<String, RouteError> {
    let mut gpx = Gpx {
        version: GpxVersion::Gpx11,
        creator: Some("windward".into()),
        ..Default::default()
    };
    let mut track = Track {
        name: Some(format!("departure {}", variant.departure_time.to_rfc3339())),
        ..Default::default()
    };

    let mut segment = TrackSegment::new();
    if let Some(first) = variant.segments.first() {
        segment.points.push(to_waypoint(first.from_pos));
    }
    for leg in &variant.segments {
        segment.points.push(to_waypoint(leg.to_pos));
    }
    track.segments.push(segment);
    gpx.tracks.push(track);

    let mut buffer = Vec::new();
    gpx::write(&gpx, &mut buffer)?;
    Ok(BASE64.encode(buffer))
}

fn to_waypoint(coord: Coordinate) -> Waypoint {
    Waypoint::new(Point::new(coord.lon, coord.lat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DifficultyLevel, PointOfSail, RouteSegment};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn encodes_a_variant_as_a_track() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap();
        let segment = RouteSegment {
            from_pos: Coordinate::new(54.5, 18.6),
            to_pos: Coordinate::new(54.5, 18.7),
            bearing: 90.0,
            distance_nm: 3.5,
            time_s: 2100.0,
            boat_speed_kt: 6.0,
            wind_speed_kt: 12.0,
            wind_dir_deg_from: 270.0,
            twa: 180.0,
            point_of_sail: PointOfSail::DeadRun,
            wave_height_m: 0.4,
            start_time: t0,
            end_time: t0 + Duration::seconds(2100),
        };
        let variant = RouteVariant {
            departure_time: t0,
            segments: vec![segment],
            total_time_h: 2100.0 / 3600.0,
            total_distance_nm: 3.5,
            avg_speed_kt: 6.0,
            avg_wind_kt: 12.0,
            avg_wave_m: 0.4,
            tacks: 0,
            jibes: 0,
            difficulty_score: 17.0,
            difficulty_level: DifficultyLevel::Easy,
            estimated_arrival: t0 + Duration::seconds(2100),
            is_best: true,
        };

        let encoded = encode_variant_as_gpx(&variant).unwrap();
        assert!(!encoded.is_empty());
        let decoded = BASE64.decode(encoded).unwrap();
        let xml = String::from_utf8(decoded).unwrap();
        assert!(xml.contains("<trk>"));
        assert!(xml.contains("18.7"));
    }
}
