//! Mission Abort, the FDC's notice that a mission ended without fires completing.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TargetNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MissionAbort {
    pub target_number: TargetNumber,
    pub cause: AbortCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortCause {
    /// The gun answered CANTCO
    GunCannotComply,
    /// The gun answered WONTCO
    GunWillNotComply,
    /// The FDC ordered a check fire
    CheckFire,
    /// A mission stage ran past its deadline
    Timeout,
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortCause::GunCannotComply => "gun cannot comply",
            AbortCause::GunWillNotComply => "gun will not comply",
            AbortCause::CheckFire => "check fire",
            AbortCause::Timeout => "timeout",
        };
        f.write_str(text)
    }
}
