use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use windward::error::RouteError;
use windward::geometry::{GeometryPort, LandPolygons, OpenSea};
use windward::gpx_export::encode_variant_as_gpx;
use windward::models::Coordinate;
use windward::store::InMemoryMeshStore;
use windward::weather::ConstantWeather;
use windward::{CancelToken, ControlPoint, MeshSpec, Planner, TimeWindow, VesselPolar};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Plan time-optimal sailing routes between control points"
)]
struct Args {
    /// JSON file with the control point sequence
    #[arg(long)]
    points: PathBuf,

    /// Polar CSV in twa/tws layout (header row = wind speeds in knots)
    #[arg(long)]
    polar: PathBuf,

    /// Optional JSON file with land polygon rings ([[lon, lat], ...])
    #[arg(long)]
    land: Option<PathBuf>,

    /// Storm reef cutoff in knots
    #[arg(long, default_value_t = 35.0)]
    max_wind: f64,

    /// Tack duration in seconds
    #[arg(long, default_value_t = 120.0)]
    tack_s: f64,

    /// Jibe duration in seconds
    #[arg(long, default_value_t = 90.0)]
    jibe_s: f64,

    /// Uniform forecast: wind speed in knots
    #[arg(long, default_value_t = 12.0)]
    wind_speed: f64,

    /// Uniform forecast: wind source direction in degrees
    #[arg(long, default_value_t = 270.0)]
    wind_dir: f64,

    /// Uniform forecast: significant wave height in meters
    #[arg(long, default_value_t = 0.5)]
    wave: f64,

    /// Departure window start (RFC 3339); defaults to now
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Departure window length in hours
    #[arg(long, default_value_t = 6)]
    window_hours: i64,

    /// Candidate departures across the window
    #[arg(long, default_value_t = 4)]
    checks: u32,

    /// Write the best variant as GPX (base64-decoded) to this path
    #[arg(long)]
    gpx: Option<PathBuf>,
}

enum Geometry {
    Open(OpenSea),
    Land(LandPolygons),
}

impl GeometryPort for Geometry {
    fn is_land(&self, p: Coordinate) -> Result<bool, RouteError> {
        match self {
            Geometry::Open(g) => g.is_land(p),
            Geometry::Land(g) => g.is_land(p),
        }
    }

    fn distance_to_land_m(&self, p: Coordinate) -> Result<f64, RouteError> {
        match self {
            Geometry::Open(g) => g.distance_to_land_m(p),
            Geometry::Land(g) => g.distance_to_land_m(p),
        }
    }

    fn segment_crosses_land(
        &self,
        a: Coordinate,
        b: Coordinate,
        within_m: f64,
    ) -> Result<bool, RouteError> {
        match self {
            Geometry::Open(g) => g.segment_crosses_land(a, b, within_m),
            Geometry::Land(g) => g.segment_crosses_land(a, b, within_m),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "windward=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let control_points: Vec<ControlPoint> = serde_json::from_str(&fs::read_to_string(&args.points)?)?;
    let polar = VesselPolar::from_csv(&args.polar, args.max_wind, args.tack_s, args.jibe_s)?;
    let geometry = match &args.land {
        Some(path) => Geometry::Land(LandPolygons::from_json_file(path)?),
        None => Geometry::Open(OpenSea),
    };
    let weather = ConstantWeather {
        wind_speed_kt: args.wind_speed,
        wind_dir_deg_from: args.wind_dir,
        wave_height_m: args.wave,
    };

    let planner = Planner::new(geometry, weather, InMemoryMeshStore::new());
    let cancel = CancelToken::new();

    let start = args.start.unwrap_or_else(Utc::now);
    let end = start + Duration::hours(args.window_hours);
    let window = TimeWindow {
        start_time: start,
        end_time: end,
        num_checks: args.checks,
    };

    let area_id = planner.build_mesh(&control_points, MeshSpec::Auto, &cancel)?;
    tracing::info!("meshed area ready: {area_id}");

    // bind one extra day of forecast so late departures can still arrive
    let version = planner
        .fetch_weather(area_id, start, end + Duration::hours(24), &cancel)
        .await?;
    tracing::info!("weather attached (version {})", version.0);

    let result = planner.calculate_route(area_id, &polar, &window, &cancel)?;

    println!(
        "{} variants, overall difficulty {:.1} ({:?})",
        result.variants.len(),
        result.overall_difficulty_score,
        result.overall_difficulty
    );
    for (idx, variant) in result.variants.iter().enumerate() {
        println!(
            "{} departs {}  {:6.2} NM  {:5.2} h  avg {:4.1} kt  tacks {}  jibes {}  difficulty {:.0} ({:?})",
            if variant.is_best { "*" } else { " " },
            variant.departure_time.format("%Y-%m-%d %H:%M"),
            variant.total_distance_nm,
            variant.total_time_h,
            variant.avg_speed_kt,
            variant.tacks,
            variant.jibes,
            variant.difficulty_score,
            variant.difficulty_level,
        );
        if variant.is_best {
            if let Some(path) = &args.gpx {
                use base64::Engine;
                let encoded = encode_variant_as_gpx(variant)?;
                let xml = base64::engine::general_purpose::STANDARD.decode(encoded)?;
                fs::write(path, xml)?;
                tracing::info!("best variant (index {idx}) written to {}", path.display());
            }
        }
    }

    Ok(())
}
