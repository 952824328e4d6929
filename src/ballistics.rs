//! Turning a target location into a gun laying.
//!
//! The FDC only needs range and direction; anything more realistic plugs in
//! behind [`FiringSolver`].

use core::f64::consts::PI;
use core::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::fdc_gun::Aim;
use crate::fo_fdc::request_for_fire::MAX_DIRECTION_MILS;
use crate::fo_fdc::TargetLocation;

/// Position in meters within the 100 km grid square.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GridPosition {
    pub easting_m: f64,
    pub northing_m: f64,
}

impl GridPosition {
    pub fn new(easting_m: f64, northing_m: f64) -> Self {
        Self { easting_m, northing_m }
    }
}

pub trait FiringSolver: Debug + Send {
    fn solve(&self, location: &TargetLocation) -> Aim;
}

/// Straight-line solver on a flat grid.
///
/// Grid targets are placed directly; polar targets are offset from the observer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatGridSolver {
    pub gun: GridPosition,
    pub observer: GridPosition,
}

impl FlatGridSolver {
    pub fn new(gun: GridPosition, observer: GridPosition) -> Self {
        Self { gun, observer }
    }

    pub fn target_position(&self, location: &TargetLocation) -> GridPosition {
        match *location {
            TargetLocation::Grid {
                easting,
                northing,
                precision,
            } => {
                let scale = f64::from(precision.meters_per_unit());
                GridPosition::new(f64::from(easting) * scale, f64::from(northing) * scale)
            }
            TargetLocation::Polar {
                direction_mils,
                distance_m,
            } => {
                let bearing = mils_to_radians(direction_mils);
                let distance = f64::from(distance_m);
                GridPosition::new(
                    self.observer.easting_m + distance * bearing.sin(),
                    self.observer.northing_m + distance * bearing.cos(),
                )
            }
        }
    }
}

impl FiringSolver for FlatGridSolver {
    fn solve(&self, location: &TargetLocation) -> Aim {
        let target = self.target_position(location);
        let d_east = target.easting_m - self.gun.easting_m;
        let d_north = target.northing_m - self.gun.northing_m;

        let range = d_east.hypot(d_north).round();
        Aim {
            range_m: range.clamp(0.0, f64::from(u32::MAX)) as u32,
            direction_mils: radians_to_mils(d_east.atan2(d_north)),
        }
    }
}

fn mils_to_radians(mils: u32) -> f64 {
    f64::from(mils) * 2.0 * PI / f64::from(MAX_DIRECTION_MILS)
}

/// Grid bearing in mils, 0 = north, clockwise, always below 6400.
fn radians_to_mils(radians: f64) -> u32 {
    let full = f64::from(MAX_DIRECTION_MILS);
    let mils = (radians * full / (2.0 * PI)).rem_euclid(full).round() as u32;
    mils % MAX_DIRECTION_MILS
}
