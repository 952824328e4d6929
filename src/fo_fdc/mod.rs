//! Message definitions for the FO - FDC interface.
//!
//! Each message travels as one frame (see [`crate::codec`]); the tag selects
//! the variant and the payload is the JSON form of the variant's struct.

pub mod battle_damage_assessment;
pub mod message_to_observer;
pub mod mission_abort;
pub mod readback;
pub mod request_for_fire;
pub mod shot_fire;
pub mod warn_order;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

pub use battle_damage_assessment::{BattleDamageAssessment, TargetEffect};
pub use message_to_observer::MessageToObserver;
pub use mission_abort::{AbortCause, MissionAbort};
pub use readback::{ReadbackSubject, SolidReadback};
pub use request_for_fire::{
    GridPrecision, MethodOfFire, MissionType, RequestForFire, TargetDescription, TargetLocation,
};
pub use shot_fire::{RoundsComplete, ShotCall, Shot, Splash};
pub use warn_order::WarnOrder;

use crate::codec::{decode_json, encode_json, WireMessage};
use crate::error::{CodecError, MalformedMessage};
use crate::types::{TargetNumber, Validate};

const TAG_REQUEST_FOR_FIRE: u8 = 0x10;
const TAG_WARN_ORDER: u8 = 0x11;
const TAG_MESSAGE_TO_OBSERVER: u8 = 0x12;
const TAG_MESSAGE_TO_OBSERVER_READBACK: u8 = 0x13;
const TAG_SHOT: u8 = 0x14;
const TAG_SPLASH: u8 = 0x15;
const TAG_ROUNDS_COMPLETE: u8 = 0x16;
const TAG_BATTLE_DAMAGE_ASSESSMENT: u8 = 0x17;
const TAG_SOLID_READBACK: u8 = 0x18;
const TAG_MISSION_ABORT: u8 = 0x19;

/// Every message exchanged between an FO and an FDC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoFdcMessage {
    /// FO → FDC: opens a call for fire
    RequestForFire(RequestForFire),
    /// FDC → FO: request accepted, target number assigned
    WarnOrder(WarnOrder),
    /// FDC → FO: fire approved, details of the fires to come
    MessageToObserver(MessageToObserver),
    /// FO → FDC: verbatim readback of the MTO
    MessageToObserverReadback(MessageToObserver),
    Shot(Shot),
    Splash(Splash),
    RoundsComplete(RoundsComplete),
    /// FO → FDC: closes the mission
    BattleDamageAssessment(BattleDamageAssessment),
    SolidReadback(SolidReadback),
    /// FDC → FO: the mission ended without completing fires
    MissionAbort(MissionAbort),
}

impl FoFdcMessage {
    /// Short upper case name used in logs and violations.
    pub fn kind(&self) -> &'static str {
        match self {
            FoFdcMessage::RequestForFire(_) => "REQUEST_FOR_FIRE",
            FoFdcMessage::WarnOrder(_) => "WARN_ORDER",
            FoFdcMessage::MessageToObserver(_) => "MESSAGE_TO_OBSERVER",
            FoFdcMessage::MessageToObserverReadback(_) => "MESSAGE_TO_OBSERVER_READBACK",
            FoFdcMessage::Shot(_) => "SHOT",
            FoFdcMessage::Splash(_) => "SPLASH",
            FoFdcMessage::RoundsComplete(_) => "ROUNDS_COMPLETE",
            FoFdcMessage::BattleDamageAssessment(_) => "BATTLE_DAMAGE_ASSESSMENT",
            FoFdcMessage::SolidReadback(_) => "SOLID_READBACK",
            FoFdcMessage::MissionAbort(_) => "MISSION_ABORT",
        }
    }

    /// The mission this message refers to; a request has none yet.
    pub fn target_number(&self) -> Option<TargetNumber> {
        match self {
            FoFdcMessage::RequestForFire(_) => None,
            FoFdcMessage::WarnOrder(msg) => Some(msg.target_number),
            FoFdcMessage::MessageToObserver(msg) | FoFdcMessage::MessageToObserverReadback(msg) => {
                Some(msg.target_number)
            }
            FoFdcMessage::Shot(msg) => Some(msg.target_number),
            FoFdcMessage::Splash(msg) => Some(msg.target_number),
            FoFdcMessage::RoundsComplete(msg) => Some(msg.target_number),
            FoFdcMessage::BattleDamageAssessment(msg) => Some(msg.target_number),
            FoFdcMessage::SolidReadback(msg) => Some(msg.target_number),
            FoFdcMessage::MissionAbort(msg) => Some(msg.target_number),
        }
    }

    /// The shot-cycle call carried by this message, if any.
    pub fn shot_call(&self) -> Option<ShotCall> {
        match self {
            FoFdcMessage::Shot(_) => Some(ShotCall::Shot),
            FoFdcMessage::Splash(_) => Some(ShotCall::Splash),
            FoFdcMessage::RoundsComplete(_) => Some(ShotCall::RoundsComplete),
            _ => None,
        }
    }

    /// Builds the shot-cycle call message for a mission.
    pub fn for_shot_call(call: ShotCall, target_number: TargetNumber) -> Self {
        match call {
            ShotCall::Shot => FoFdcMessage::Shot(Shot { target_number }),
            ShotCall::Splash => FoFdcMessage::Splash(Splash { target_number }),
            ShotCall::RoundsComplete => FoFdcMessage::RoundsComplete(RoundsComplete { target_number }),
        }
    }
}

impl Validate for FoFdcMessage {
    fn validate(&self) -> Result<(), MalformedMessage> {
        match self {
            FoFdcMessage::RequestForFire(msg) => msg.validate(),
            FoFdcMessage::WarnOrder(msg) => msg.validate(),
            FoFdcMessage::MessageToObserver(msg) | FoFdcMessage::MessageToObserverReadback(msg) => {
                msg.validate()
            }
            FoFdcMessage::BattleDamageAssessment(msg) => msg.validate(),
            FoFdcMessage::Shot(_)
            | FoFdcMessage::Splash(_)
            | FoFdcMessage::RoundsComplete(_)
            | FoFdcMessage::SolidReadback(_)
            | FoFdcMessage::MissionAbort(_) => Ok(()),
        }
    }
}

impl WireMessage for FoFdcMessage {
    const PROTOCOL: &'static str = "fo-fdc";

    fn tag(&self) -> u8 {
        match self {
            FoFdcMessage::RequestForFire(_) => TAG_REQUEST_FOR_FIRE,
            FoFdcMessage::WarnOrder(_) => TAG_WARN_ORDER,
            FoFdcMessage::MessageToObserver(_) => TAG_MESSAGE_TO_OBSERVER,
            FoFdcMessage::MessageToObserverReadback(_) => TAG_MESSAGE_TO_OBSERVER_READBACK,
            FoFdcMessage::Shot(_) => TAG_SHOT,
            FoFdcMessage::Splash(_) => TAG_SPLASH,
            FoFdcMessage::RoundsComplete(_) => TAG_ROUNDS_COMPLETE,
            FoFdcMessage::BattleDamageAssessment(_) => TAG_BATTLE_DAMAGE_ASSESSMENT,
            FoFdcMessage::SolidReadback(_) => TAG_SOLID_READBACK,
            FoFdcMessage::MissionAbort(_) => TAG_MISSION_ABORT,
        }
    }

    fn encode_payload(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.validate()?;
        match self {
            FoFdcMessage::RequestForFire(msg) => encode_json(msg, dst),
            FoFdcMessage::WarnOrder(msg) => encode_json(msg, dst),
            FoFdcMessage::MessageToObserver(msg) | FoFdcMessage::MessageToObserverReadback(msg) => {
                encode_json(msg, dst)
            }
            FoFdcMessage::Shot(msg) => encode_json(msg, dst),
            FoFdcMessage::Splash(msg) => encode_json(msg, dst),
            FoFdcMessage::RoundsComplete(msg) => encode_json(msg, dst),
            FoFdcMessage::BattleDamageAssessment(msg) => encode_json(msg, dst),
            FoFdcMessage::SolidReadback(msg) => encode_json(msg, dst),
            FoFdcMessage::MissionAbort(msg) => encode_json(msg, dst),
        }
    }

    fn decode_payload(tag: u8, payload: &[u8]) -> Result<Self, CodecError> {
        let message = match tag {
            TAG_REQUEST_FOR_FIRE => FoFdcMessage::RequestForFire(decode_json(payload)?),
            TAG_WARN_ORDER => FoFdcMessage::WarnOrder(decode_json(payload)?),
            TAG_MESSAGE_TO_OBSERVER => FoFdcMessage::MessageToObserver(decode_json(payload)?),
            TAG_MESSAGE_TO_OBSERVER_READBACK => {
                FoFdcMessage::MessageToObserverReadback(decode_json(payload)?)
            }
            TAG_SHOT => FoFdcMessage::Shot(decode_json(payload)?),
            TAG_SPLASH => FoFdcMessage::Splash(decode_json(payload)?),
            TAG_ROUNDS_COMPLETE => FoFdcMessage::RoundsComplete(decode_json(payload)?),
            TAG_BATTLE_DAMAGE_ASSESSMENT => FoFdcMessage::BattleDamageAssessment(decode_json(payload)?),
            TAG_SOLID_READBACK => FoFdcMessage::SolidReadback(decode_json(payload)?),
            TAG_MISSION_ABORT => FoFdcMessage::MissionAbort(decode_json(payload)?),
            _ => {
                return Err(CodecError::UnknownTag {
                    protocol: Self::PROTOCOL,
                    tag,
                })
            }
        };
        message.validate()?;
        Ok(message)
    }
}
