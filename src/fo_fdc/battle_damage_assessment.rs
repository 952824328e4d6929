//! Battle Damage Assessment definitions

use serde::{Deserialize, Serialize};

use crate::error::MalformedMessage;
use crate::types::{check_text, TargetNumber, Validate};

pub const MAX_REMARKS_LEN: usize = 128;

/// The FO's report of the effect of a fire mission. Closes the mission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BattleDamageAssessment {
    pub target_number: TargetNumber,
    pub effect: TargetEffect,
    pub remarks: String,
    /// The observer wants the target engaged again under a new mission
    pub reengage: bool,
}

impl Validate for BattleDamageAssessment {
    fn validate(&self) -> Result<(), MalformedMessage> {
        check_text("remarks", &self.remarks, MAX_REMARKS_LEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetEffect {
    Destroyed,
    Neutralized,
    Suppressed,
    NoEffect,
}
