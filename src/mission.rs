//! Mission bookkeeping shared by the FDC and FO sides: target number
//! allocation, the closed-mission log and the events both sides emit.

use core::fmt;

use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::MalformedMessage;
use crate::fdc_gun::StatusReply;
use crate::fo_fdc::{AbortCause, ReadbackSubject, ShotCall, TargetEffect};
use crate::types::TargetNumber;

pub const MAX_MISSION_HISTORY: usize = 64;
pub const DEFAULT_TARGET_PREFIX: &str = "AN";
pub const DEFAULT_FIRST_SERIAL: u16 = 2001;
const MAX_SERIAL: u16 = 9999;

/// Hands out target numbers `<prefix><serial>`, never the same one twice in a row.
///
/// The serial runs to 9999 and wraps to 0001.
#[derive(Debug, Clone)]
pub struct TargetNumberAllocator {
    prefix: ArrayString<2>,
    next_serial: u16,
}

impl TargetNumberAllocator {
    /// # Errors
    ///
    /// Fails unless `prefix` is two uppercase letters and `first_serial` is 1-9999.
    pub fn new(prefix: &str, first_serial: u16) -> Result<Self, MalformedMessage> {
        // Validates both parts in one go
        let first = TargetNumber::from_parts(prefix, first_serial)?;
        if first_serial == 0 {
            return Err(MalformedMessage::TargetNumber(first.to_string()));
        }
        let prefix = ArrayString::from(prefix)
            .map_err(|_| MalformedMessage::TargetNumber(prefix.to_string()))?;
        Ok(Self {
            prefix,
            next_serial: first_serial,
        })
    }

    /// Peeks at the number the next call to [`allocate`](Self::allocate) returns.
    pub fn peek(&self) -> Option<TargetNumber> {
        TargetNumber::from_parts(&self.prefix, self.next_serial).ok()
    }

    pub fn allocate(&mut self) -> TargetNumber {
        let serial = self.next_serial;
        self.next_serial = if serial >= MAX_SERIAL { 1 } else { serial + 1 };
        TargetNumber::compose(&self.prefix, serial)
    }
}

impl Default for TargetNumberAllocator {
    fn default() -> Self {
        Self {
            prefix: ArrayString::from(DEFAULT_TARGET_PREFIX).unwrap_or_default(),
            next_serial: DEFAULT_FIRST_SERIAL,
        }
    }
}

/// Stage a mission was waiting in when its deadline ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStage {
    WarnOrder,
    FireApproval,
    FireMessage,
    GunCompliance,
    RoundsComplete,
    Assessment,
}

impl fmt::Display for MissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MissionStage::WarnOrder => "warn order",
            MissionStage::FireApproval => "fire approval",
            MissionStage::FireMessage => "fire message",
            MissionStage::GunCompliance => "gun compliance",
            MissionStage::RoundsComplete => "rounds complete",
            MissionStage::Assessment => "assessment",
        };
        f.write_str(text)
    }
}

/// How a mission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionOutcome {
    Assessed { effect: TargetEffect, reengage: bool },
    Aborted(AbortCause),
    TimedOut(MissionStage),
    /// Dropped because the link went down
    Discarded,
}

impl MissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MissionOutcome::Assessed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub id: u32,
    pub target_number: TargetNumber,
    pub outcome: MissionOutcome,
}

/// Bounded history of closed missions, oldest evicted first.
#[derive(Debug, Clone)]
pub struct MissionLog {
    history: Vec<MissionRecord, MAX_MISSION_HISTORY>,
    next_id: u32,
}

impl MissionLog {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            next_id: 1,
        }
    }

    pub fn record(&mut self, target_number: TargetNumber, outcome: MissionOutcome) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(MissionRecord {
            id,
            target_number,
            outcome,
        });
        id
    }

    /// Most recent outcome recorded for `target_number`.
    pub fn outcome_of(&self, target_number: TargetNumber) -> Option<MissionOutcome> {
        self.history
            .iter()
            .rev()
            .find(|record| record.target_number == target_number)
            .map(|record| record.outcome)
    }

    pub fn is_closed(&self, target_number: TargetNumber) -> bool {
        self.outcome_of(target_number).is_some()
    }

    pub fn last(&self) -> Option<&MissionRecord> {
        self.history.last()
    }

    pub fn history(&self) -> &[MissionRecord] {
        &self.history
    }

    pub fn successes(&self) -> usize {
        self.history.iter().filter(|r| r.outcome.is_success()).count()
    }
}

impl Default for MissionLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Which side of a link an actor talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    Observer,
    Fdc,
    Gun,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Peer::Observer => "observer",
            Peer::Fdc => "fdc",
            Peer::Gun => "gun",
        };
        f.write_str(text)
    }
}

/// Something a monitor of a simulator would want to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MissionEvent {
    LinkUp { peer: Peer },
    LinkLost { peer: Peer },
    Opened { target_number: TargetNumber },
    FireApproved { target_number: TargetNumber },
    ReadbackConfirmed {
        target_number: TargetNumber,
        subject: ReadbackSubject,
    },
    /// A shot-cycle call was relayed (FDC) or observed (FO)
    ShotCall {
        target_number: TargetNumber,
        call: ShotCall,
    },
    Assessed {
        target_number: TargetNumber,
        effect: TargetEffect,
        reengage: bool,
    },
    Aborted {
        target_number: TargetNumber,
        cause: AbortCause,
    },
    /// No target number yet when a request goes unanswered
    TimedOut {
        target_number: Option<TargetNumber>,
        stage: MissionStage,
    },
    Discarded { target_number: TargetNumber },
    GunStatus(StatusReply),
}

impl MissionEvent {
    /// The outcome this event closes a mission with, if it closes one.
    pub fn outcome(&self) -> Option<(TargetNumber, MissionOutcome)> {
        match *self {
            MissionEvent::Assessed {
                target_number,
                effect,
                reengage,
            } => Some((target_number, MissionOutcome::Assessed { effect, reengage })),
            MissionEvent::Aborted { target_number, cause } => {
                Some((target_number, MissionOutcome::Aborted(cause)))
            }
            MissionEvent::TimedOut {
                target_number: Some(target_number),
                stage,
            } => Some((target_number, MissionOutcome::TimedOut(stage))),
            MissionEvent::Discarded { target_number } => Some((target_number, MissionOutcome::Discarded)),
            _ => None,
        }
    }
}
