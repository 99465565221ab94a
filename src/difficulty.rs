//! Bounded difficulty score for a routed variant.

use crate::models::{DifficultyLevel, PointOfSail, RouteSegment};

const WIND_WEIGHT: f64 = 0.35;
const WAVE_WEIGHT: f64 = 0.30;
const MANEUVER_WEIGHT: f64 = 0.20;
const UPWIND_WEIGHT: f64 = 0.15;

/// Wind at which the wind factor saturates.
const WIND_DANGEROUS_KT: f64 = 30.0;
/// Wave height at which the wave factor saturates.
const WAVE_DANGEROUS_M: f64 = 4.0;
/// Maneuvers per nautical mile at which the density factor saturates.
const MANEUVER_DENSITY_SATURATION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyInputs {
    pub avg_wind_kt: f64,
    pub avg_wave_m: f64,
    pub maneuvers: usize,
    pub total_distance_nm: f64,
    /// Fraction of segments sailed close-hauled or in irons.
    pub upwind_fraction: f64,
}

impl DifficultyInputs {
    pub fn from_segments(segments: &[RouteSegment], tacks: usize, jibes: usize) -> Self {
        let total_distance_nm: f64 = segments.iter().map(|s| s.distance_nm).sum();
        let weighted = |f: fn(&RouteSegment) -> f64| -> f64 {
            if total_distance_nm <= 0.0 {
                return 0.0;
            }
            segments
                .iter()
                .map(|s| f(s) * s.distance_nm)
                .sum::<f64>()
                / total_distance_nm
        };
        let upwind = segments
            .iter()
            .filter(|s| {
                matches!(
                    s.point_of_sail,
                    PointOfSail::CloseHauled | PointOfSail::InIrons
                )
            })
            .count();
        Self {
            avg_wind_kt: weighted(|s| s.wind_speed_kt),
            avg_wave_m: weighted(|s| s.wave_height_m),
            maneuvers: tacks + jibes,
            total_distance_nm,
            upwind_fraction: if segments.is_empty() {
                0.0
            } else {
                upwind as f64 / segments.len() as f64
            },
        }
    }
}

/// Combines the fixed-weight factors into `[0, 100]`.
pub fn score(inputs: &DifficultyInputs) -> f64 {
    let wind = (inputs.avg_wind_kt / WIND_DANGEROUS_KT).clamp(0.0, 1.0);
    let wave = (inputs.avg_wave_m / WAVE_DANGEROUS_M).clamp(0.0, 1.0);
    let density = if inputs.total_distance_nm > 0.0 {
        inputs.maneuvers as f64 / inputs.total_distance_nm
    } else {
        0.0
    };
    let maneuver = (density / MANEUVER_DENSITY_SATURATION).clamp(0.0, 1.0);
    let upwind = inputs.upwind_fraction.clamp(0.0, 1.0);

    100.0
        * (WIND_WEIGHT * wind
            + WAVE_WEIGHT * wave
            + MANEUVER_WEIGHT * maneuver
            + UPWIND_WEIGHT * upwind)
}

pub fn level(score: f64) -> DifficultyLevel {
    if score < 20.0 {
        DifficultyLevel::Easy
    } else if score < 40.0 {
        DifficultyLevel::Moderate
    } else if score < 60.0 {
        DifficultyLevel::Challenging
    } else if score < 80.0 {
        DifficultyLevel::Difficult
    } else {
        DifficultyLevel::Extreme
    }
}
