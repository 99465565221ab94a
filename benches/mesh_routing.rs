use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use windward::geometry::OpenSea;
use windward::mesh::MeshBuilder;
use windward::router::{Router, RouterConfig};
use windward::weather::{ConstantWeather, WeatherBinder};
use windward::{CancelToken, ControlPoint, ControlPointKind, Coordinate, MeshParams, TimeWindow, VesselPolar};

fn params(area3: f64) -> MeshParams {
    MeshParams {
        corridor_nm: 1.0,
        ring1_m: 300.0,
        ring2_m: 800.0,
        ring3_m: 1500.0,
        area1: area3 / 16.0,
        area2: area3 / 4.0,
        area3,
        shoreline_avoid_m: 100.0,
        max_weather_points: 10,
        weather_grid_km: 3.0,
    }
}

fn course() -> Vec<ControlPoint> {
    vec![
        ControlPoint::new(Coordinate::new(54.50, 18.60), ControlPointKind::Start),
        ControlPoint::new(Coordinate::new(54.50, 18.7435), ControlPointKind::Finish),
    ]
}

fn polar() -> VesselPolar {
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
        30.0,
        120.0,
        90.0,
    )
    .expect("bench polar")
}

fn benchmark_mesh_build(c: &mut Criterion) {
    let geometry = OpenSea;
    let mut group = c.benchmark_group("mesh_build");

    for (name, area3) in [("coarse", 640_000.0), ("medium", 320_000.0)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &area3, |b, &area3| {
            b.iter(|| {
                let builder = MeshBuilder::new(&geometry, params(area3));
                builder
                    .build(black_box(&course()), &CancelToken::new())
                    .expect("bench mesh")
            });
        });
    }
    group.finish();
}

fn benchmark_route_calculation(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("bench runtime");

    let geometry = OpenSea;
    let area = Arc::new(
        MeshBuilder::new(&geometry, params(320_000.0))
            .build(&course(), &CancelToken::new())
            .expect("bench mesh"),
    );
    let port = ConstantWeather {
        wind_speed_kt: 12.0,
        wind_dir_deg_from: 300.0,
        wave_height_m: 0.5,
    };
    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 6, 0, 0).unwrap();
    let mesh = runtime
        .block_on(WeatherBinder::new(&port).bind(
            area,
            t0,
            t0 + Duration::hours(24),
            &CancelToken::new(),
        ))
        .expect("bench weather");
    let polar = polar();

    let mut group = c.benchmark_group("route_calculation");
    for checks in [1u32, 4] {
        let window = TimeWindow {
            start_time: t0,
            end_time: t0 + Duration::hours(6),
            num_checks: checks,
        };
        group.bench_with_input(BenchmarkId::from_parameter(checks), &window, |b, window| {
            let router = Router::new(&mesh, &polar, RouterConfig::default());
            b.iter(|| {
                router
                    .calculate(black_box(window), &CancelToken::new())
                    .expect("bench route")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_mesh_build, benchmark_route_calculation);
criterion_main!(benches);
