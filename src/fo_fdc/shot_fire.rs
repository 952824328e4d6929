//! Shot, Splash and Rounds Complete calls.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TargetNumber;

/// Rounds have started going down range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct Shot {
    pub target_number: TargetNumber,
}

/// Sent about 5 seconds before expected impact so the observer is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct Splash {
    pub target_number: TargetNumber,
}

/// The last rounds have impacted; the observer may assess the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct RoundsComplete {
    pub target_number: TargetNumber,
}

/// One step of the shot cycle, in the order it must occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotCall {
    Shot,
    Splash,
    RoundsComplete,
}

impl ShotCall {
    pub fn next(self) -> Option<ShotCall> {
        match self {
            ShotCall::Shot => Some(ShotCall::Splash),
            ShotCall::Splash => Some(ShotCall::RoundsComplete),
            ShotCall::RoundsComplete => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShotCall::Shot => "SHOT",
            ShotCall::Splash => "SPLASH",
            ShotCall::RoundsComplete => "ROUNDS_COMPLETE",
        }
    }
}

impl fmt::Display for ShotCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
