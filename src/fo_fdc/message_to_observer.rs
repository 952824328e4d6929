//! Message to Observer (MTO) definitions

use serde::{Deserialize, Serialize};

use super::request_for_fire::MethodOfFire;
use crate::error::MalformedMessage;
use crate::types::{Ammunition, Callsign, TargetNumber, Validate};

pub const MAX_VOLLEY_ROUNDS: u32 = 99;

/// Sent by the FDC once fire is approved, before the first round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MessageToObserver {
    pub fdc: Callsign,
    pub observer: Callsign,
    pub target_number: TargetNumber,
    pub ammunition: Ammunition,
    pub method_of_fire: MethodOfFire,
    /// Rounds per volley; the total down range depends on the guns firing
    pub rounds: u32,
    /// Expected seconds until the first round is fired
    pub time_to_first_round_s: u32,
}

impl Validate for MessageToObserver {
    fn validate(&self) -> Result<(), MalformedMessage> {
        if self.rounds == 0 || self.rounds > MAX_VOLLEY_ROUNDS {
            return Err(MalformedMessage::Rounds(self.rounds));
        }
        self.method_of_fire.validate()
    }
}
