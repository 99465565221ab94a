//! End-to-end scenarios through the public pipeline API.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use windward::error::{CandidateFailureKind, RouteError};
use windward::geometry::{GeometryPort, LandPolygons, OpenSea};
use windward::models::PointOfSail;
use windward::store::{InMemoryMeshStore, MeshStore};
use windward::weather::ConstantWeather;
use windward::{
    CancelToken, ControlPoint, ControlPointKind, Coordinate, MeshParams, MeshSpec, Planner,
    TimeWindow, VesselPolar,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap()
}

fn course(points: &[(f64, f64)]) -> Vec<ControlPoint> {
    let mut cps: Vec<ControlPoint> = points
        .iter()
        .map(|&(lat, lon)| ControlPoint::new(Coordinate::new(lat, lon), ControlPointKind::Waypoint))
        .collect();
    cps.first_mut().unwrap().kind = ControlPointKind::Start;
    cps.last_mut().unwrap().kind = ControlPointKind::Finish;
    cps
}

fn open_water_params() -> MeshParams {
    MeshParams {
        corridor_nm: 2.0,
        ring1_m: 300.0,
        ring2_m: 800.0,
        ring3_m: 1500.0,
        area1: 20_000.0,
        area2: 80_000.0,
        area3: 320_000.0,
        shoreline_avoid_m: 100.0,
        max_weather_points: 10,
        weather_grid_km: 3.0,
    }
}

/// Cruiser polar with a hard no-go cone inside 35 degrees.
fn cruiser_polar(max_wind_kt: f64) -> VesselPolar {
    VesselPolar::new(
        vec![5.0, 10.0, 15.0, 20.0],
        vec![0.0, 35.0, 45.0, 90.0, 135.0, 180.0],
        vec![
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0],
            vec![3.8, 5.2, 5.8, 6.0],
            vec![4.5, 6.5, 7.2, 7.5],
            vec![4.2, 6.2, 7.0, 7.4],
            vec![3.5, 6.0, 6.6, 7.0],
        ],
        max_wind_kt,
        120.0,
        90.0,
    )
    .unwrap()
}

fn steady(wind_speed_kt: f64, wind_dir_deg_from: f64, wave_height_m: f64) -> ConstantWeather {
    ConstantWeather {
        wind_speed_kt,
        wind_dir_deg_from,
        wave_height_m,
    }
}

#[tokio::test]
async fn downwind_hop_produces_a_single_dead_run_variant() {
    // two control points ~5 NM apart due east, steady westerly
    let planner = Planner::new(OpenSea, steady(10.0, 270.0, 0.0), InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let id = planner
        .build_mesh(
            &course(&[(54.50, 18.60), (54.50, 18.7435)]),
            MeshSpec::Manual(open_water_params()),
            &cancel,
        )
        .unwrap();
    planner
        .fetch_weather(id, t0(), t0() + Duration::hours(12), &cancel)
        .await
        .unwrap();

    let window = TimeWindow {
        start_time: t0(),
        end_time: t0(),
        num_checks: 1,
    };
    let result = planner
        .calculate_route(id, &cruiser_polar(30.0), &window, &cancel)
        .unwrap();

    assert_eq!(result.variants.len(), 1);
    let variant = &result.variants[0];
    assert!(variant.is_best);
    assert_eq!((variant.tacks, variant.jibes), (0, 0));
    assert!((variant.total_distance_nm - 5.0).abs() < 0.3);
    assert!((variant.total_time_h - 5.0 / 6.0).abs() < 0.1);
    assert!(variant
        .segments
        .iter()
        .all(|s| s.point_of_sail == PointOfSail::DeadRun));
}

#[tokio::test]
async fn headwind_leg_is_sailed_as_a_beat() {
    // 6 NM due north against a 15 kt northerly
    let planner = Planner::new(OpenSea, steady(15.0, 0.0, 0.0), InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let id = planner
        .build_mesh(
            &course(&[(54.50, 18.60), (54.60, 18.60)]),
            MeshSpec::Manual(open_water_params()),
            &cancel,
        )
        .unwrap();
    planner
        .fetch_weather(id, t0(), t0() + Duration::hours(24), &cancel)
        .await
        .unwrap();

    let window = TimeWindow {
        start_time: t0(),
        end_time: t0(),
        num_checks: 1,
    };
    let result = planner
        .calculate_route(id, &cruiser_polar(30.0), &window, &cancel)
        .unwrap();

    let variant = &result.variants[0];
    assert!(variant.tacks >= 1, "beat must tack at least once");
    assert!(variant.total_distance_nm > 6.0, "beat is longer than the rhumb line");
    assert!(variant
        .segments
        .iter()
        .all(|s| s.twa.abs() > 35.0 - 1e-6), "no segment inside the no-go cone");
}

#[tokio::test]
async fn horizon_shorter_than_any_route_fails_every_candidate() {
    // right-triangle course; only 30 minutes of forecast bound
    let planner = Planner::new(OpenSea, steady(7.0, 270.0, 0.0), InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let id = planner
        .build_mesh(
            &course(&[(54.50, 18.60), (54.55, 18.60), (54.50, 18.70)]),
            MeshSpec::Manual(open_water_params()),
            &cancel,
        )
        .unwrap();
    planner
        .fetch_weather(id, t0(), t0() + Duration::minutes(30), &cancel)
        .await
        .unwrap();

    let window = TimeWindow {
        start_time: t0(),
        end_time: t0(),
        num_checks: 1,
    };
    let err = planner
        .calculate_route(id, &cruiser_polar(30.0), &window, &cancel)
        .unwrap_err();

    let RouteError::AllCandidatesInfeasible(failures) = err else {
        panic!("expected AllCandidatesInfeasible, got {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, CandidateFailureKind::HorizonExceeded);
}

#[tokio::test]
async fn auto_meshed_course_yields_ordered_variants_with_one_best() {
    // four-point coastal course, auto mesh, 6 h window, four checks
    let planner = Planner::new(OpenSea, steady(12.0, 250.0, 0.6), InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let id = planner
        .build_mesh(
            &course(&[
                (54.50, 18.60),
                (54.52, 18.63),
                (54.54, 18.60),
                (54.52, 18.57),
            ]),
            MeshSpec::Auto,
            &cancel,
        )
        .unwrap();
    planner
        .fetch_weather(id, t0(), t0() + Duration::hours(30), &cancel)
        .await
        .unwrap();

    let window = TimeWindow {
        start_time: t0(),
        end_time: t0() + Duration::hours(6),
        num_checks: 4,
    };
    let result = planner
        .calculate_route(id, &cruiser_polar(30.0), &window, &cancel)
        .unwrap();

    assert_eq!(result.variants.len(), 4);
    for pair in result.variants.windows(2) {
        assert!(pair[0].departure_time < pair[1].departure_time);
    }
    assert_eq!(result.variants.iter().filter(|v| v.is_best).count(), 1);
    let best = &result.variants[result.best_variant_index];
    assert!(best.is_best);
    assert!(result
        .variants
        .iter()
        .all(|v| v.total_time_h >= best.total_time_h - 1e-12));
    // difficulty is bounded and bucketed
    for variant in &result.variants {
        assert!((0.0..=100.0).contains(&variant.difficulty_score));
    }
    assert!((0.0..=100.0).contains(&result.overall_difficulty_score));
}

#[tokio::test]
async fn control_point_on_land_fails_before_weather_and_routing() {
    let land = LandPolygons::from_boxes(&[(54.47, 54.53, 18.65, 18.75)]);
    let planner = Planner::new(land, steady(10.0, 270.0, 0.0), InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let err = planner
        .build_mesh(
            &course(&[(54.50, 18.70), (54.60, 18.90)]),
            MeshSpec::Manual(open_water_params()),
            &cancel,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RouteError::ControlPointUnreachable { index: 0, .. }
    ));
}

#[tokio::test]
async fn storm_reef_cutoff_fails_with_no_navigable_path() {
    // same setup as the downwind hop, but the polar reefs at 8 kt under a
    // 10 kt forecast
    let planner = Planner::new(OpenSea, steady(10.0, 270.0, 0.0), InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let id = planner
        .build_mesh(
            &course(&[(54.50, 18.60), (54.50, 18.7435)]),
            MeshSpec::Manual(open_water_params()),
            &cancel,
        )
        .unwrap();
    planner
        .fetch_weather(id, t0(), t0() + Duration::hours(12), &cancel)
        .await
        .unwrap();

    let window = TimeWindow {
        start_time: t0(),
        end_time: t0(),
        num_checks: 1,
    };
    let err = planner
        .calculate_route(id, &cruiser_polar(8.0), &window, &cancel)
        .unwrap_err();

    let RouteError::AllCandidatesInfeasible(failures) = err else {
        panic!("expected AllCandidatesInfeasible, got {err}");
    };
    assert_eq!(failures[0].kind, CandidateFailureKind::NoNavigablePath);
}

#[tokio::test]
async fn routed_segments_keep_clear_of_an_island() {
    let island = (54.49, 54.51, 18.68, 18.72);
    let land = LandPolygons::from_boxes(&[island]);
    let params = open_water_params();
    let planner = Planner::new(
        LandPolygons::from_boxes(&[island]),
        steady(12.0, 200.0, 0.3),
        InMemoryMeshStore::new(),
    );
    let cancel = CancelToken::new();

    let id = planner
        .build_mesh(
            &course(&[(54.50, 18.60), (54.50, 18.80)]),
            MeshSpec::Manual(params),
            &cancel,
        )
        .unwrap();
    planner
        .fetch_weather(id, t0(), t0() + Duration::hours(24), &cancel)
        .await
        .unwrap();

    let window = TimeWindow {
        start_time: t0(),
        end_time: t0(),
        num_checks: 1,
    };
    let result = planner
        .calculate_route(id, &cruiser_polar(30.0), &window, &cancel)
        .unwrap();

    let variant = &result.variants[0];
    for segment in &variant.segments {
        let mid = Coordinate::new(
            (segment.from_pos.lat + segment.to_pos.lat) / 2.0,
            (segment.from_pos.lon + segment.to_pos.lon) / 2.0,
        );
        for p in [segment.from_pos, segment.to_pos, mid] {
            assert!(
                land.distance_to_land_m(p).unwrap() >= params.shoreline_avoid_m,
                "route touches the shoreline buffer at {p:?}"
            );
        }
    }
}

#[tokio::test]
async fn mesh_builds_are_deterministic_through_the_store() {
    let planner = Planner::new(OpenSea, steady(10.0, 270.0, 0.0), InMemoryMeshStore::new());
    let cancel = CancelToken::new();
    let cps = course(&[(54.50, 18.60), (54.50, 18.7435)]);

    let first = planner
        .build_mesh(&cps, MeshSpec::Manual(open_water_params()), &cancel)
        .unwrap();
    let second = planner
        .build_mesh(&cps, MeshSpec::Manual(open_water_params()), &cancel)
        .unwrap();
    assert_ne!(first, second, "each build mints a fresh id");

    let a: Arc<_> = planner.store().get(first).unwrap();
    let b: Arc<_> = planner.store().get(second).unwrap();
    assert_eq!(a.vertices, b.vertices);
    assert_eq!(a.edges, b.edges);
    assert_eq!(a.control_vertices, b.control_vertices);
}

#[tokio::test]
async fn repeated_route_calculations_are_identical() {
    let planner = Planner::new(OpenSea, steady(12.0, 300.0, 0.7), InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let id = planner
        .build_mesh(
            &course(&[(54.50, 18.60), (54.50, 18.7435)]),
            MeshSpec::Manual(open_water_params()),
            &cancel,
        )
        .unwrap();
    planner
        .fetch_weather(id, t0(), t0() + Duration::hours(24), &cancel)
        .await
        .unwrap();

    let polar = cruiser_polar(30.0);
    let window = TimeWindow {
        start_time: t0(),
        end_time: t0() + Duration::hours(4),
        num_checks: 3,
    };
    let first = planner.calculate_route(id, &polar, &window, &cancel).unwrap();
    let second = planner.calculate_route(id, &polar, &window, &cancel).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn routing_without_weather_is_rejected() {
    let planner = Planner::new(OpenSea, steady(12.0, 300.0, 0.7), InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let id = planner
        .build_mesh(
            &course(&[(54.50, 18.60), (54.50, 18.7435)]),
            MeshSpec::Manual(open_water_params()),
            &cancel,
        )
        .unwrap();

    let window = TimeWindow {
        start_time: t0(),
        end_time: t0(),
        num_checks: 1,
    };
    let err = planner
        .calculate_route(id, &cruiser_polar(30.0), &window, &cancel)
        .unwrap_err();
    assert!(matches!(err, RouteError::WeatherNotFound(_)));
}
