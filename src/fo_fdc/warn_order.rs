//! Warn Order, the FDC's answer to a Request for Fire.

use serde::{Deserialize, Serialize};

use super::request_for_fire::RequestForFire;
use crate::error::MalformedMessage;
use crate::types::{Callsign, TargetNumber, Validate};

/// Sent by the FDC once a request is accepted and a mission is being prepared.
///
/// Carries the target number assigned to the mission and a verbatim readback
/// of the request, which the FO checks before confirming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WarnOrder {
    pub fdc: Callsign,
    pub observer: Callsign,
    pub target_number: TargetNumber,
    pub request: RequestForFire,
}

impl Validate for WarnOrder {
    fn validate(&self) -> Result<(), MalformedMessage> {
        self.request.validate()
    }
}
