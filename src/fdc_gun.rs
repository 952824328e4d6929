//! Message definitions for the FDC - Gun interface.
//!
//! Payloads are fixed binary layouts, all integers big endian:
//!
//! | Message              | Tag  | Payload                                              |
//! |----------------------|------|------------------------------------------------------|
//! | `ComplianceResponse` | 0x00 | compliance `u8`                                      |
//! | `FireReport`         | 0x01 | target number `[u8; 6]`, report `u8`                 |
//! | `StatusRequest`      | 0x02 | empty                                                |
//! | `StatusReply`        | 0x03 | status `u8`, count `u8`, count x (ammo `u8`, `u32`)  |
//! | `FireCommand`        | 0x05 | target number, rounds `u32`, ammo `u8`, range `u32`, direction `u32` |
//! | `CheckFire`          | 0x06 | empty                                                |

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{PayloadReader, WireMessage};
use crate::error::{CodecError, MalformedMessage};
use crate::fo_fdc::message_to_observer::MAX_VOLLEY_ROUNDS;
use crate::fo_fdc::request_for_fire::MAX_DIRECTION_MILS;
use crate::fo_fdc::ShotCall;
use crate::types::{Ammunition, TargetNumber, Validate};

const TAG_COMPLIANCE_RESPONSE: u8 = 0x00;
const TAG_FIRE_REPORT: u8 = 0x01;
const TAG_STATUS_REQUEST: u8 = 0x02;
const TAG_STATUS_REPLY: u8 = 0x03;
const TAG_FIRE_COMMAND: u8 = 0x05;
const TAG_CHECK_FIRE: u8 = 0x06;

/// A gun's answer to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Compliance {
    /// Unable to comply
    CantCo = 0x01,
    /// Will comply
    WillCo = 0x02,
    /// Have complied
    HaveCo = 0x03,
    /// Will not comply
    WontCo = 0x04,
}

impl Compliance {
    /// True for the answers that end a mission.
    pub fn is_refusal(self) -> bool {
        matches!(self, Compliance::CantCo | Compliance::WontCo)
    }
}

impl TryFrom<u8> for Compliance {
    type Error = MalformedMessage;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::CantCo),
            0x02 => Ok(Self::WillCo),
            0x03 => Ok(Self::HaveCo),
            0x04 => Ok(Self::WontCo),
            _ => Err(MalformedMessage::UnknownEnumValue {
                kind: "compliance",
                value,
            }),
        }
    }
}

/// Operational status of a gun section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    NonOperational = 0x00,
    PartialOperational = 0x01,
    Operational = 0x02,
}

impl Status {
    pub fn can_fire(self) -> bool {
        self != Status::NonOperational
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::NonOperational
    }
}

impl TryFrom<u8> for Status {
    type Error = MalformedMessage;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::NonOperational),
            0x01 => Ok(Self::PartialOperational),
            0x02 => Ok(Self::Operational),
            _ => Err(MalformedMessage::UnknownEnumValue { kind: "status", value }),
        }
    }
}

fn report_to_wire(report: ShotCall) -> u8 {
    match report {
        ShotCall::Shot => 0x00,
        ShotCall::Splash => 0x01,
        ShotCall::RoundsComplete => 0x02,
    }
}

fn report_from_wire(value: u8) -> Result<ShotCall, MalformedMessage> {
    match value {
        0x00 => Ok(ShotCall::Shot),
        0x01 => Ok(ShotCall::Splash),
        0x02 => Ok(ShotCall::RoundsComplete),
        _ => Err(MalformedMessage::UnknownEnumValue {
            kind: "fire report",
            value,
        }),
    }
}

/// Range and direction the gun lays on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aim {
    pub range_m: u32,
    pub direction_mils: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireCommand {
    pub target_number: TargetNumber,
    pub rounds: u32,
    pub ammunition: Ammunition,
    pub aim: Aim,
}

impl Validate for FireCommand {
    fn validate(&self) -> Result<(), MalformedMessage> {
        if self.rounds == 0 || self.rounds > MAX_VOLLEY_ROUNDS {
            return Err(MalformedMessage::Rounds(self.rounds));
        }
        if self.aim.direction_mils >= MAX_DIRECTION_MILS {
            return Err(MalformedMessage::Direction(self.aim.direction_mils));
        }
        Ok(())
    }
}

/// Gun status plus rounds on hand per ammunition type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: Status,
    pub rounds: BTreeMap<Ammunition, u32>,
}

/// Every message exchanged between an FDC and a gun.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FdcGunMessage {
    /// Gun → FDC
    ComplianceResponse { compliance: Compliance },
    /// Gun → FDC
    FireReport {
        target_number: TargetNumber,
        report: ShotCall,
    },
    /// FDC → Gun
    StatusRequest,
    /// Gun → FDC
    StatusReply(StatusReply),
    /// FDC → Gun
    FireCommand(FireCommand),
    /// FDC → Gun: stop firing immediately
    CheckFire,
}

impl FdcGunMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            FdcGunMessage::ComplianceResponse { .. } => "COMPLIANCE_RESPONSE",
            FdcGunMessage::FireReport { .. } => "FIRE_REPORT",
            FdcGunMessage::StatusRequest => "STATUS_REQUEST",
            FdcGunMessage::StatusReply(_) => "STATUS_REPLY",
            FdcGunMessage::FireCommand(_) => "FIRE_COMMAND",
            FdcGunMessage::CheckFire => "CHECK_FIRE",
        }
    }
}

impl Validate for FdcGunMessage {
    fn validate(&self) -> Result<(), MalformedMessage> {
        match self {
            FdcGunMessage::FireCommand(command) => command.validate(),
            _ => Ok(()),
        }
    }
}

impl WireMessage for FdcGunMessage {
    const PROTOCOL: &'static str = "fdc-gun";

    fn tag(&self) -> u8 {
        match self {
            FdcGunMessage::ComplianceResponse { .. } => TAG_COMPLIANCE_RESPONSE,
            FdcGunMessage::FireReport { .. } => TAG_FIRE_REPORT,
            FdcGunMessage::StatusRequest => TAG_STATUS_REQUEST,
            FdcGunMessage::StatusReply(_) => TAG_STATUS_REPLY,
            FdcGunMessage::FireCommand(_) => TAG_FIRE_COMMAND,
            FdcGunMessage::CheckFire => TAG_CHECK_FIRE,
        }
    }

    fn encode_payload(&self, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.validate()?;
        match self {
            FdcGunMessage::ComplianceResponse { compliance } => dst.put_u8(*compliance as u8),
            FdcGunMessage::FireReport {
                target_number,
                report,
            } => {
                dst.put_slice(&target_number.to_wire());
                dst.put_u8(report_to_wire(*report));
            }
            FdcGunMessage::StatusRequest | FdcGunMessage::CheckFire => {}
            FdcGunMessage::StatusReply(reply) => {
                dst.put_u8(reply.status as u8);
                // Keys are Ammunition variants, so the count always fits
                dst.put_u8(reply.rounds.len() as u8);
                for (ammunition, count) in &reply.rounds {
                    dst.put_u8(u8::from(*ammunition));
                    dst.put_u32(*count);
                }
            }
            FdcGunMessage::FireCommand(command) => {
                dst.put_slice(&command.target_number.to_wire());
                dst.put_u32(command.rounds);
                dst.put_u8(u8::from(command.ammunition));
                dst.put_u32(command.aim.range_m);
                dst.put_u32(command.aim.direction_mils);
            }
        }
        Ok(())
    }

    fn decode_payload(tag: u8, payload: &[u8]) -> Result<Self, CodecError> {
        let mut reader = PayloadReader::new(payload);
        let message = match tag {
            TAG_COMPLIANCE_RESPONSE => FdcGunMessage::ComplianceResponse {
                compliance: Compliance::try_from(reader.u8("compliance")?)?,
            },
            TAG_FIRE_REPORT => FdcGunMessage::FireReport {
                target_number: TargetNumber::from_wire(reader.array("target_number")?)?,
                report: report_from_wire(reader.u8("report")?)?,
            },
            TAG_STATUS_REQUEST => FdcGunMessage::StatusRequest,
            TAG_STATUS_REPLY => {
                let status = Status::try_from(reader.u8("status")?)?;
                let count = reader.u8("rounds_count")?;
                let mut rounds = BTreeMap::new();
                for _ in 0..count {
                    let ammunition = Ammunition::try_from(reader.u8("ammunition")?)?;
                    let on_hand = reader.u32("rounds")?;
                    if rounds.insert(ammunition, on_hand).is_some() {
                        return Err(CodecError::InvalidPayload(format!(
                            "duplicate {ammunition:?} entry in status reply"
                        )));
                    }
                }
                FdcGunMessage::StatusReply(StatusReply { status, rounds })
            }
            TAG_FIRE_COMMAND => FdcGunMessage::FireCommand(FireCommand {
                target_number: TargetNumber::from_wire(reader.array("target_number")?)?,
                rounds: reader.u32("rounds")?,
                ammunition: Ammunition::try_from(reader.u8("ammunition")?)?,
                aim: Aim {
                    range_m: reader.u32("range_m")?,
                    direction_mils: reader.u32("direction_mils")?,
                },
            }),
            TAG_CHECK_FIRE => FdcGunMessage::CheckFire,
            _ => {
                return Err(CodecError::UnknownTag {
                    protocol: Self::PROTOCOL,
                    tag,
                })
            }
        };
        reader.finish()?;
        message.validate()?;
        Ok(message)
    }
}
