//! Request for Fire (RFF), the first message an FO sends.

use serde::{Deserialize, Serialize};

use crate::error::MalformedMessage;
use crate::types::{check_text, Ammunition, Callsign, Validate};

pub const MAX_DIRECTION_MILS: u32 = 6400;
pub const MAX_DISTANCE_M: u32 = 50_000;
pub const MAX_DESCRIPTION_LEN: usize = 64;

/// A complete Request for Fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RequestForFire {
    /// Callsign of the requesting observer
    pub observer: Callsign,
    /// Callsign of the FDC the request is addressed to
    pub fdc: Callsign,
    pub mission_type: MissionType,
    pub target_location: TargetLocation,
    pub target_description: TargetDescription,
    pub danger_close: bool,
    /// Requested ammunition, FDC's choice when absent
    pub ammunition: Option<Ammunition>,
    /// Requested method of fire, FDC's choice when absent
    pub method_of_fire: Option<MethodOfFire>,
}

impl Validate for RequestForFire {
    fn validate(&self) -> Result<(), MalformedMessage> {
        self.target_location.validate()?;
        self.target_description.validate()?;
        if let Some(method) = &self.method_of_fire {
            method.validate()?;
        }
        Ok(())
    }
}

/// Mission types for a Request for Fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionType {
    /// Fires walked onto the target through a series of adjustments.
    AdjustFire,
    /// The observer is confident the first volley will have the intended effect.
    FireForEffect,
}

/// Digits per axis of a grid reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridPrecision {
    /// 100 m resolution, 3 digits per axis
    SixDigit,
    /// 10 m resolution, 4 digits per axis
    EightDigit,
    /// 1 m resolution, 5 digits per axis
    TenDigit,
}

impl GridPrecision {
    pub fn digits(self) -> u32 {
        match self {
            GridPrecision::SixDigit => 3,
            GridPrecision::EightDigit => 4,
            GridPrecision::TenDigit => 5,
        }
    }

    /// Meters represented by one unit of a grid value.
    pub fn meters_per_unit(self) -> u32 {
        10u32.pow(5 - self.digits())
    }
}

/// Target location and the method used to locate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetLocation {
    Grid {
        easting: u32,
        northing: u32,
        precision: GridPrecision,
    },
    /// Direction and distance from the observer
    Polar { direction_mils: u32, distance_m: u32 },
}

impl TargetLocation {
    /// # Errors
    ///
    /// Fails when either value has more digits than the precision allows.
    pub fn grid(easting: u32, northing: u32, precision: GridPrecision) -> Result<Self, MalformedMessage> {
        let location = Self::Grid {
            easting,
            northing,
            precision,
        };
        location.validate()?;
        Ok(location)
    }

    /// # Errors
    ///
    /// Fails on a direction of 6400 mils or more, or a distance outside 1-50000 m.
    pub fn polar(direction_mils: u32, distance_m: u32) -> Result<Self, MalformedMessage> {
        let location = Self::Polar {
            direction_mils,
            distance_m,
        };
        location.validate()?;
        Ok(location)
    }
}

impl Validate for TargetLocation {
    fn validate(&self) -> Result<(), MalformedMessage> {
        match *self {
            TargetLocation::Grid {
                easting,
                northing,
                precision,
            } => {
                let digits = precision.digits();
                let limit = 10u32.pow(digits);
                for value in [easting, northing] {
                    if value >= limit {
                        return Err(MalformedMessage::GridValue { value, digits });
                    }
                }
                Ok(())
            }
            TargetLocation::Polar {
                direction_mils,
                distance_m,
            } => {
                if direction_mils >= MAX_DIRECTION_MILS {
                    return Err(MalformedMessage::Direction(direction_mils));
                }
                if distance_m == 0 || distance_m > MAX_DISTANCE_M {
                    return Err(MalformedMessage::Distance(distance_m));
                }
                Ok(())
            }
        }
    }
}

/// Description of the target for human interpretation.
///
/// Only the target type is mandatory; the other fields may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TargetDescription {
    /// Type of target, e.g. "tanks, infantry"
    pub target_type: String,
    /// Target activity, e.g. "staging area" or "moving down MSR"
    pub activity: String,
    /// Number of targets, e.g. "10 tanks"
    pub numbers: String,
    /// Protection of targets, e.g. "dug in" or "out in open"
    pub protection: String,
}

impl TargetDescription {
    /// # Errors
    ///
    /// Fails on an empty target type.
    pub fn new(target_type: &str) -> Result<Self, MalformedMessage> {
        let description = Self {
            target_type: target_type.to_string(),
            activity: String::new(),
            numbers: String::new(),
            protection: String::new(),
        };
        description.validate()?;
        Ok(description)
    }

    #[must_use]
    pub fn with_activity(mut self, activity: &str) -> Self {
        self.activity = activity.to_string();
        self
    }

    #[must_use]
    pub fn with_numbers(mut self, numbers: &str) -> Self {
        self.numbers = numbers.to_string();
        self
    }

    #[must_use]
    pub fn with_protection(mut self, protection: &str) -> Self {
        self.protection = protection.to_string();
        self
    }
}

impl Validate for TargetDescription {
    fn validate(&self) -> Result<(), MalformedMessage> {
        if self.target_type.trim().is_empty() {
            return Err(MalformedMessage::EmptyTargetType);
        }
        check_text("target_type", &self.target_type, MAX_DESCRIPTION_LEN)?;
        check_text("activity", &self.activity, MAX_DESCRIPTION_LEN)?;
        check_text("numbers", &self.numbers, MAX_DESCRIPTION_LEN)?;
        check_text("protection", &self.protection, MAX_DESCRIPTION_LEN)
    }
}

/// The method of fire requested by the FO or selected by the FDC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodOfFire {
    WhenReady,
    /// The FDC holds fires until the observer commands them.
    AtMyCommand,
    /// Requested impact time in minutes past the hour.
    TimeOnTarget { minute: u32 },
}

impl MethodOfFire {
    /// # Errors
    ///
    /// Fails on a minute of 60 or more.
    pub fn time_on_target(minute: u32) -> Result<Self, MalformedMessage> {
        let method = Self::TimeOnTarget { minute };
        method.validate()?;
        Ok(method)
    }
}

impl Default for MethodOfFire {
    fn default() -> Self {
        Self::WhenReady
    }
}

impl Validate for MethodOfFire {
    fn validate(&self) -> Result<(), MalformedMessage> {
        match *self {
            MethodOfFire::TimeOnTarget { minute } if minute >= 60 => {
                Err(MalformedMessage::TimeOnTarget(minute))
            }
            _ => Ok(()),
        }
    }
}
