//! Vessel polar diagram: boat speed as a function of (|TWA|, TWS).

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

use crate::geodesy::normalize_signed;
use crate::models::{PointOfSail, VesselSummary};

#[derive(Debug, Error)]
pub enum PolarError {
    #[error("speed table is {rows}x{cols}, axes demand {twa_len}x{tws_len} (twa x tws)")]
    TableShape {
        rows: usize,
        cols: usize,
        twa_len: usize,
        tws_len: usize,
    },
    #[error("{axis} axis must be strictly ascending")]
    NonMonotonicAxis { axis: &'static str },
    #[error("twa axis values must lie in [0, 180]")]
    TwaOutOfRange,
    #[error("boat speeds must be finite and non-negative")]
    InvalidSpeed,
    #[error("head-to-wind row must be all zeros")]
    NonZeroInIrons,
    #[error("{field} must be positive and finite")]
    InvalidParameter { field: &'static str },
    #[error("failed to read polar file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed polar CSV at line {line}: {reason}")]
    Csv { line: usize, reason: String },
}

/// True wind angle from the forecast "blowing from" direction and the boat
/// heading: 0 = bow to wind, 180 = dead run, positive = wind on starboard.
/// The only place this conversion is allowed to live.
pub fn true_wind_angle(wind_from_deg: f64, heading_deg: f64) -> f64 {
    normalize_signed(wind_from_deg - heading_deg)
}

/// Qualitative sailing regime for an absolute true wind angle.
pub fn point_of_sail(twa: f64) -> PointOfSail {
    let a = twa.abs().clamp(0.0, 180.0);
    if a < 30.0 {
        PointOfSail::InIrons
    } else if a < 50.0 {
        PointOfSail::CloseHauled
    } else if a < 70.0 {
        PointOfSail::CloseReach
    } else if a < 110.0 {
        PointOfSail::BeamReach
    } else if a < 150.0 {
        PointOfSail::BroadReach
    } else if a < 170.0 {
        PointOfSail::Running
    } else {
        PointOfSail::DeadRun
    }
}

/// Constructed through [`VesselPolar::new`] or [`VesselPolar::from_csv`] so
/// the table invariants hold for every live value.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselPolar {
    tws_axis: Vec<f64>,
    twa_axis: Vec<f64>,
    /// speed_table[i][j] = boat speed (kt) at twa_axis[i], tws_axis[j].
    speed_table: Vec<Vec<f64>>,
    /// Storm reef cutoff: above this true wind speed the boat does not sail.
    pub max_wind_kt: f64,
    pub tack_duration_s: f64,
    pub jibe_duration_s: f64,
}

fn strictly_ascending(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] < w[1])
}

impl VesselPolar {
    pub fn new(
        tws_axis: Vec<f64>,
        twa_axis: Vec<f64>,
        speed_table: Vec<Vec<f64>>,
        max_wind_kt: f64,
        tack_duration_s: f64,
        jibe_duration_s: f64,
    ) -> Result<Self, PolarError> {
        if tws_axis.is_empty() || !strictly_ascending(&tws_axis) || tws_axis[0] < 0.0 {
            return Err(PolarError::NonMonotonicAxis { axis: "tws" });
        }
        if twa_axis.is_empty() || !strictly_ascending(&twa_axis) {
            return Err(PolarError::NonMonotonicAxis { axis: "twa" });
        }
        if twa_axis[0] < 0.0 || *twa_axis.last().unwrap() > 180.0 {
            return Err(PolarError::TwaOutOfRange);
        }
        if speed_table.len() != twa_axis.len()
            || speed_table.iter().any(|row| row.len() != tws_axis.len())
        {
            return Err(PolarError::TableShape {
                rows: speed_table.len(),
                cols: speed_table.first().map_or(0, Vec::len),
                twa_len: twa_axis.len(),
                tws_len: tws_axis.len(),
            });
        }
        if speed_table
            .iter()
            .flatten()
            .any(|s| !s.is_finite() || *s < 0.0)
        {
            return Err(PolarError::InvalidSpeed);
        }
        if !max_wind_kt.is_finite() || max_wind_kt <= 0.0 {
            return Err(PolarError::InvalidParameter { field: "max_wind_kt" });
        }
        for (field, value) in [
            ("tack_duration_s", tack_duration_s),
            ("jibe_duration_s", jibe_duration_s),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PolarError::InvalidParameter { field });
            }
        }

        let mut polar = Self {
            tws_axis,
            twa_axis,
            speed_table,
            max_wind_kt,
            tack_duration_s,
            jibe_duration_s,
        };
        if polar.twa_axis[0] == 0.0 {
            if polar.speed_table[0].iter().any(|s| *s != 0.0) {
                return Err(PolarError::NonZeroInIrons);
            }
        } else {
            // A missing head-to-wind row is implied as zero speed.
            polar.twa_axis.insert(0, 0.0);
            polar.speed_table.insert(0, vec![0.0; polar.tws_axis.len()]);
        }
        Ok(polar)
    }

    /// Loads a `twa/tws` CSV in the common polar exchange layout: the header
    /// row carries the TWS axis, each following row a TWA and its speeds.
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        max_wind_kt: f64,
        tack_duration_s: f64,
        jibe_duration_s: f64,
    ) -> Result<Self, PolarError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines().enumerate();

        let header = match lines.next() {
            Some((_, line)) => line?,
            None => {
                return Err(PolarError::Csv {
                    line: 1,
                    reason: "empty file".into(),
                });
            }
        };
        let tws_axis = header
            .split(',')
            .skip(1)
            .map(|v| {
                v.trim().parse::<f64>().map_err(|_| PolarError::Csv {
                    line: 1,
                    reason: format!("bad tws value {v:?}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut twa_axis = Vec::new();
        let mut speed_table = Vec::new();
        for (idx, line) in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut cells = line.split(',');
            let twa_cell = cells.next().unwrap_or_default();
            let twa = twa_cell.trim().parse::<f64>().map_err(|_| PolarError::Csv {
                line: idx + 1,
                reason: format!("bad twa value {twa_cell:?}"),
            })?;
            let row = cells
                .map(|v| {
                    v.trim().parse::<f64>().map_err(|_| PolarError::Csv {
                        line: idx + 1,
                        reason: format!("bad speed value {v:?}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            twa_axis.push(twa);
            speed_table.push(row);
        }

        Self::new(
            tws_axis,
            twa_axis,
            speed_table,
            max_wind_kt,
            tack_duration_s,
            jibe_duration_s,
        )
    }

    pub fn summary(&self) -> VesselSummary {
        VesselSummary {
            twa_points: self.twa_axis.len(),
            tws_points: self.tws_axis.len(),
            max_wind_kt: self.max_wind_kt,
            tack_duration_s: self.tack_duration_s,
            jibe_duration_s: self.jibe_duration_s,
        }
    }

    /// Boat speed in knots, bilinear on the (|twa|, tws) grid. Symmetric
    /// over TWA sign; zero above the storm reef cutoff. Never fails.
    pub fn boat_speed(&self, twa: f64, tws_kt: f64) -> f64 {
        if !twa.is_finite() || !tws_kt.is_finite() {
            return 0.0;
        }
        if tws_kt > self.max_wind_kt {
            return 0.0;
        }
        let tws = tws_kt.clamp(self.tws_axis[0], *self.tws_axis.last().unwrap());
        let twa = twa
            .abs()
            .clamp(0.0, 180.0)
            .clamp(self.twa_axis[0], *self.twa_axis.last().unwrap());

        let (i0, i1, ft) = bracket(&self.twa_axis, twa);
        let (j0, j1, fw) = bracket(&self.tws_axis, tws);

        let low = self.speed_table[i0][j0] * (1.0 - fw) + self.speed_table[i0][j1] * fw;
        let high = self.speed_table[i1][j0] * (1.0 - fw) + self.speed_table[i1][j1] * fw;
        low * (1.0 - ft) + high * ft
    }
}

/// Bracketing indices and interpolation fraction for `value` inside an
/// ascending axis; `value` must already be clamped to the axis range.
fn bracket(axis: &[f64], value: f64) -> (usize, usize, f64) {
    for i in 0..axis.len() - 1 {
        if value >= axis[i] && value <= axis[i + 1] {
            let span = axis[i + 1] - axis[i];
            let frac = if span > 0.0 { (value - axis[i]) / span } else { 0.0 };
            return (i, i + 1, frac);
        }
    }
    (axis.len() - 1, axis.len() - 1, 0.0)
}
