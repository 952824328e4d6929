//! Solid Readback definitions

use serde::{Deserialize, Serialize};

use crate::types::TargetNumber;

/// Confirms that a critical message was read back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SolidReadback {
    pub target_number: TargetNumber,
    pub subject: ReadbackSubject,
}

/// The message being confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadbackSubject {
    RequestForFire,
    MessageToObserver,
    Shot,
    Splash,
    RoundsComplete,
    BattleDamageAssessment,
}
