//! Simulator configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! complete configuration. Binaries apply command line overrides on top.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ballistics::{FlatGridSolver, GridPosition};
use crate::error::ConfigError;
use crate::fdc_gun::Status;
use crate::fo_fdc::message_to_observer::MAX_VOLLEY_ROUNDS;
use crate::fo_fdc::{
    GridPrecision, MethodOfFire, MissionType, RequestForFire, TargetDescription, TargetLocation,
};
use crate::link::faults::LinkFaultConfig;
use crate::mission::{TargetNumberAllocator, DEFAULT_FIRST_SERIAL, DEFAULT_TARGET_PREFIX};
use crate::types::{Ammunition, Callsign, Validate};

pub const DEFAULT_FDC_CALLSIGN: &str = "FDC-1";
pub const DEFAULT_OBSERVER_CALLSIGN: &str = "FO-1";
pub const DEFAULT_GUN_CALLSIGN: &str = "GUN-1";

pub const DEFAULT_ROUNDS_PER_MISSION: u32 = 4;
pub const DEFAULT_TIME_TO_FIRST_ROUND_S: u32 = 30;

pub const DEFAULT_FIRE_APPROVAL_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_GUN_COMPLIANCE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ROUNDS_COMPLETE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_ASSESSMENT_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_WARN_ORDER_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_FIRE_MESSAGE_TIMEOUT_MS: u64 = 90_000;

pub const DEFAULT_OBSERVATION_MS: u64 = 2_000;
pub const DEFAULT_MISSION_INTERVAL_MS: u64 = 1_000;

pub const DEFAULT_SHOT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_SPLASH_DELAY_MS: u64 = 2_000;
pub const DEFAULT_ROUNDS_COMPLETE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_GUN_INVENTORY: u32 = 40;

pub const DEFAULT_OBSERVER_LISTEN_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_GUN_ADDR: &str = "127.0.0.1:5001";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Zero disables a timeout.
pub(crate) fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub fdc: FdcConfig,
    pub observer: ObserverConfig,
    pub gun: GunConfig,
    pub network: NetworkConfig,
}

impl SimConfig {
    /// Loads `path` if given, defaults otherwise, and validates the result.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or a value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_json(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Fails on malformed JSON or unknown enum values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fdc.validate()?;
        self.observer.validate()?;
        self.gun.validate()?;
        self.network.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdcTimeouts {
    pub fire_approval_ms: u64,
    pub gun_compliance_ms: u64,
    pub rounds_complete_ms: u64,
    pub assessment_ms: u64,
}

impl Default for FdcTimeouts {
    fn default() -> Self {
        Self {
            fire_approval_ms: DEFAULT_FIRE_APPROVAL_TIMEOUT_MS,
            gun_compliance_ms: DEFAULT_GUN_COMPLIANCE_TIMEOUT_MS,
            rounds_complete_ms: DEFAULT_ROUNDS_COMPLETE_TIMEOUT_MS,
            assessment_ms: DEFAULT_ASSESSMENT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdcConfig {
    pub callsign: String,
    /// Two letter block the FDC numbers its targets from
    pub target_prefix: String,
    pub first_serial: u16,
    /// Approve fire as soon as the observer confirms the warn order
    pub auto_approve: bool,
    pub rounds_per_mission: u32,
    pub time_to_first_round_s: u32,
    /// Used when the request names no ammunition
    pub default_ammunition: Ammunition,
    pub gun_position: GridPosition,
    pub observer_position: GridPosition,
    pub timeouts: FdcTimeouts,
}

impl Default for FdcConfig {
    fn default() -> Self {
        Self {
            callsign: DEFAULT_FDC_CALLSIGN.to_string(),
            target_prefix: DEFAULT_TARGET_PREFIX.to_string(),
            first_serial: DEFAULT_FIRST_SERIAL,
            auto_approve: true,
            rounds_per_mission: DEFAULT_ROUNDS_PER_MISSION,
            time_to_first_round_s: DEFAULT_TIME_TO_FIRST_ROUND_S,
            default_ammunition: Ammunition::HighExplosive,
            gun_position: GridPosition::new(10_000.0, 10_000.0),
            observer_position: GridPosition::new(14_000.0, 16_000.0),
            timeouts: FdcTimeouts::default(),
        }
    }
}

impl FdcConfig {
    /// # Errors
    ///
    /// Fails when a callsign, target prefix or volley size is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.callsign()?;
        self.allocator()?;
        if self.rounds_per_mission == 0 || self.rounds_per_mission > MAX_VOLLEY_ROUNDS {
            return Err(ConfigError::Invalid {
                field: "fdc.rounds_per_mission",
                reason: format!("{} is outside 1-{MAX_VOLLEY_ROUNDS}", self.rounds_per_mission),
            });
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on an invalid callsign.
    pub fn callsign(&self) -> Result<Callsign, ConfigError> {
        Ok(Callsign::new(&self.callsign)?)
    }

    /// # Errors
    ///
    /// Fails on an invalid prefix or first serial.
    pub fn allocator(&self) -> Result<TargetNumberAllocator, ConfigError> {
        Ok(TargetNumberAllocator::new(&self.target_prefix, self.first_serial)?)
    }

    pub fn solver(&self) -> FlatGridSolver {
        FlatGridSolver::new(self.gun_position, self.observer_position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoTimeouts {
    pub warn_order_ms: u64,
    pub fire_message_ms: u64,
    pub rounds_complete_ms: u64,
}

impl Default for FoTimeouts {
    fn default() -> Self {
        Self {
            warn_order_ms: DEFAULT_WARN_ORDER_TIMEOUT_MS,
            fire_message_ms: DEFAULT_FIRE_MESSAGE_TIMEOUT_MS,
            rounds_complete_ms: DEFAULT_ROUNDS_COMPLETE_TIMEOUT_MS,
        }
    }
}

/// The request an observer sends when no other is supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTemplate {
    pub mission_type: MissionType,
    pub target_location: TargetLocation,
    pub target_type: String,
    pub activity: String,
    pub numbers: String,
    pub protection: String,
    pub danger_close: bool,
    pub ammunition: Option<Ammunition>,
    pub method_of_fire: Option<MethodOfFire>,
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self {
            mission_type: MissionType::FireForEffect,
            target_location: TargetLocation::Grid {
                easting: 1_800,
                northing: 1_900,
                precision: GridPrecision::EightDigit,
            },
            target_type: "infantry platoon".to_string(),
            activity: "dug in".to_string(),
            numbers: "30 personnel".to_string(),
            protection: "in open".to_string(),
            danger_close: false,
            ammunition: Some(Ammunition::HighExplosive),
            method_of_fire: Some(MethodOfFire::WhenReady),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub callsign: String,
    /// Callsign of the FDC requests are addressed to
    pub fdc_callsign: String,
    /// Missions the FO binary calls before exiting, 0 for no limit
    pub missions: u32,
    /// Report a BDA automatically once rounds are complete
    pub auto_assess: bool,
    pub observation_ms: u64,
    /// Pause between the end of one mission and the next request
    pub mission_interval_ms: u64,
    pub request: RequestTemplate,
    pub timeouts: FoTimeouts,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            callsign: DEFAULT_OBSERVER_CALLSIGN.to_string(),
            fdc_callsign: DEFAULT_FDC_CALLSIGN.to_string(),
            missions: 1,
            auto_assess: true,
            observation_ms: DEFAULT_OBSERVATION_MS,
            mission_interval_ms: DEFAULT_MISSION_INTERVAL_MS,
            request: RequestTemplate::default(),
            timeouts: FoTimeouts::default(),
        }
    }
}

impl ObserverConfig {
    /// # Errors
    ///
    /// Fails when a callsign or the default request is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.callsign()?;
        self.build_request()?;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on an invalid callsign.
    pub fn callsign(&self) -> Result<Callsign, ConfigError> {
        Ok(Callsign::new(&self.callsign)?)
    }

    /// Builds the default Request for Fire from the template.
    ///
    /// # Errors
    ///
    /// Fails when any field of the resulting request is invalid.
    pub fn build_request(&self) -> Result<RequestForFire, ConfigError> {
        let template = &self.request;
        let request = RequestForFire {
            observer: Callsign::new(&self.callsign)?,
            fdc: Callsign::new(&self.fdc_callsign)?,
            mission_type: template.mission_type,
            target_location: template.target_location,
            target_description: TargetDescription::new(&template.target_type)?
                .with_activity(&template.activity)
                .with_numbers(&template.numbers)
                .with_protection(&template.protection),
            danger_close: template.danger_close,
            ammunition: template.ammunition,
            method_of_fire: template.method_of_fire,
        };
        request.validate()?;
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GunConfig {
    pub callsign: String,
    pub status: Status,
    /// Rounds on hand per ammunition type
    pub inventory: BTreeMap<Ammunition, u32>,
    pub shot_delay_ms: u64,
    pub splash_delay_ms: u64,
    pub rounds_complete_delay_ms: u64,
}

impl Default for GunConfig {
    fn default() -> Self {
        let inventory = [
            (Ammunition::HighExplosive, DEFAULT_GUN_INVENTORY),
            (Ammunition::Smoke, DEFAULT_GUN_INVENTORY / 4),
            (Ammunition::Illumination, DEFAULT_GUN_INVENTORY / 4),
        ]
        .into_iter()
        .collect();
        Self {
            callsign: DEFAULT_GUN_CALLSIGN.to_string(),
            status: Status::Operational,
            inventory,
            shot_delay_ms: DEFAULT_SHOT_DELAY_MS,
            splash_delay_ms: DEFAULT_SPLASH_DELAY_MS,
            rounds_complete_delay_ms: DEFAULT_ROUNDS_COMPLETE_DELAY_MS,
        }
    }
}

impl GunConfig {
    /// # Errors
    ///
    /// Fails on an invalid callsign.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Callsign::new(&self.callsign)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Where the FDC listens for its observer
    pub observer_listen_addr: String,
    /// Where the gun listens for its FDC
    pub gun_addr: String,
    pub reconnect_delay_ms: u64,
    pub channel_capacity: usize,
    pub faults: LinkFaultConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            observer_listen_addr: DEFAULT_OBSERVER_LISTEN_ADDR.to_string(),
            gun_addr: DEFAULT_GUN_ADDR.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            faults: LinkFaultConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// # Errors
    ///
    /// Fails on a zero channel capacity or fault rates outside 0-100.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "network.channel_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, rate) in [
            ("network.faults.drop_percent", self.faults.drop_percent),
            ("network.faults.corrupt_percent", self.faults.corrupt_percent),
        ] {
            if !(0.0..=100.0).contains(&rate) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{rate} is outside 0-100"),
                });
            }
        }
        Ok(())
    }
}
