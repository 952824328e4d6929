//! Observer connectivity and the observer's view of a mission.

use core::fmt;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{millis, FoTimeouts, ObserverConfig};
use crate::error::{ConfigError, ProtocolViolation, ViolationReason};
use crate::fo_fdc::{
    BattleDamageAssessment, FoFdcMessage, MessageToObserver, MissionAbort, ReadbackSubject,
    RequestForFire, ShotCall, SolidReadback, TargetEffect, WarnOrder,
};
use crate::mission::{MissionEvent, MissionLog, MissionOutcome, MissionStage, Peer};
use crate::types::{Callsign, TargetNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FoState {
    Disconnected,
    Connected(FoMission),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FoMission {
    Idle,
    AwaitingWarnOrder,
    AwaitingFireMessage,
    TrackingShotCycle,
    /// Rounds are complete and the observer owes an assessment
    AwaitingAssessmentAck,
}

impl fmt::Display for FoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FoState::Disconnected => f.write_str("DISCONNECTED"),
            FoState::Connected(mission) => write!(f, "CONNECTED/{mission}"),
        }
    }
}

impl fmt::Display for FoMission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FoMission::Idle => "IDLE",
            FoMission::AwaitingWarnOrder => "AWAITING_WARN_ORDER",
            FoMission::AwaitingFireMessage => "AWAITING_FIRE_MESSAGE",
            FoMission::TrackingShotCycle => "TRACKING_SHOT_CYCLE",
            FoMission::AwaitingAssessmentAck => "AWAITING_ASSESSMENT_ACK",
        };
        f.write_str(text)
    }
}

/// The observer's judgement of a completed mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub effect: TargetEffect,
    pub remarks: String,
    pub reengage: bool,
}

impl Default for Assessment {
    fn default() -> Self {
        Self {
            effect: TargetEffect::Destroyed,
            remarks: String::new(),
            reengage: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FoInput {
    LinkUp,
    LinkLost,
    FromFdc(FoFdcMessage),
    /// The observer calls for fire
    RequestFire(RequestForFire),
    /// The observer reports the effect of the completed mission
    ReportAssessment(Assessment),
}

impl FoInput {
    pub fn kind(&self) -> &'static str {
        match self {
            FoInput::LinkUp => "LINK_UP",
            FoInput::LinkLost => "LINK_LOST",
            FoInput::FromFdc(message) => message.kind(),
            FoInput::RequestFire(_) => "REQUEST_FIRE",
            FoInput::ReportAssessment(_) => "REPORT_ASSESSMENT",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoOutput {
    pub to_fdc: Vec<FoFdcMessage>,
    pub events: Vec<MissionEvent>,
}

impl FoOutput {
    pub fn is_empty(&self) -> bool {
        self.to_fdc.is_empty() && self.events.is_empty()
    }

    pub fn merge(&mut self, other: FoOutput) {
        self.to_fdc.extend(other.to_fdc);
        self.events.extend(other.events);
    }
}

#[derive(Debug, Clone)]
struct PendingMission {
    request: RequestForFire,
    /// Assigned by the warn order
    target_number: Option<TargetNumber>,
    message_to_observer: Option<MessageToObserver>,
    fire_message_confirmed: bool,
    last_call: Option<ShotCall>,
    deadline: Option<(MissionStage, Instant)>,
}

fn deadline(stage: MissionStage, ms: u64, now: Instant) -> Option<(MissionStage, Instant)> {
    millis(ms).map(|timeout| (stage, now + timeout))
}

#[derive(Debug)]
pub struct FoStateMachine {
    callsign: Callsign,
    timeouts: FoTimeouts,
    state: FoState,
    mission: Option<PendingMission>,
    log: MissionLog,
}

impl FoStateMachine {
    /// # Errors
    ///
    /// Fails when the configuration does not validate.
    pub fn new(config: &ObserverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            callsign: config.callsign()?,
            timeouts: config.timeouts,
            state: FoState::Disconnected,
            mission: None,
            log: MissionLog::new(),
        })
    }

    pub fn state(&self) -> FoState {
        self.state
    }

    pub fn callsign(&self) -> Callsign {
        self.callsign
    }

    pub fn active_target(&self) -> Option<TargetNumber> {
        self.mission.as_ref().and_then(|mission| mission.target_number)
    }

    /// The message to observer of the active mission, once received.
    pub fn message_to_observer(&self) -> Option<&MessageToObserver> {
        self.mission
            .as_ref()
            .and_then(|mission| mission.message_to_observer.as_ref())
    }

    /// True once the FDC has confirmed the observer's readback of the MTO.
    pub fn fire_message_confirmed(&self) -> bool {
        self.mission
            .as_ref()
            .is_some_and(|mission| mission.fire_message_confirmed)
    }

    pub fn mission_log(&self) -> &MissionLog {
        &self.log
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.mission
            .as_ref()
            .and_then(|mission| mission.deadline)
            .map(|(_, at)| at)
    }

    /// Applies one input.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] when the input is not legal in the
    /// current state; nothing changes in that case.
    pub fn handle(&mut self, input: FoInput, now: Instant) -> Result<FoOutput, ProtocolViolation> {
        match input {
            FoInput::LinkUp => self.on_link_up(),
            FoInput::LinkLost => Ok(self.on_link_lost()),
            FoInput::FromFdc(message) => self.on_fdc_message(message, now),
            FoInput::RequestFire(request) => self.request_fire(request, now),
            FoInput::ReportAssessment(assessment) => self.report_assessment(assessment),
        }
    }

    /// Drops the active mission if its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> FoOutput {
        let mut out = FoOutput::default();
        let Some((stage, at)) = self.mission.as_ref().and_then(|mission| mission.deadline) else {
            return out;
        };
        if now < at {
            return out;
        }

        let target_number = self.active_target();
        warn!(?target_number, %stage, "mission timed out");
        match target_number {
            Some(target_number) => self.close_mission(target_number, MissionOutcome::TimedOut(stage), &mut out),
            None => {
                // Nothing was assigned, so there is nothing to log
                self.mission = None;
                out.events.push(MissionEvent::TimedOut {
                    target_number: None,
                    stage,
                });
                self.transition(FoState::Connected(FoMission::Idle));
            }
        }
        out
    }

    fn violation(&self, message: &'static str, reason: ViolationReason) -> ProtocolViolation {
        ProtocolViolation::new(message, self.state, reason)
    }

    fn transition(&mut self, next: FoState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "fo state change");
            self.state = next;
        }
    }

    fn mission_state(&self) -> Option<FoMission> {
        match self.state {
            FoState::Connected(mission) => Some(mission),
            FoState::Disconnected => None,
        }
    }

    /// The active mission if it carries `target_number`.
    fn active_mission(
        &mut self,
        message: &'static str,
        target_number: TargetNumber,
    ) -> Result<&mut PendingMission, ProtocolViolation> {
        let state = self.state;
        let active = self.active_target();
        let reason = match active {
            Some(active) if active == target_number => None,
            _ if self.log.is_closed(target_number) => {
                Some(ViolationReason::MissionClosed(target_number.to_string()))
            }
            Some(active) => Some(ViolationReason::TargetNumberMismatch {
                expected: active.to_string(),
                found: target_number.to_string(),
            }),
            None => Some(ViolationReason::UnexpectedMessage),
        };
        match (reason, self.mission.as_mut()) {
            (None, Some(mission)) => Ok(mission),
            (reason, _) => Err(ProtocolViolation::new(
                message,
                state,
                reason.unwrap_or(ViolationReason::UnexpectedMessage),
            )),
        }
    }

    fn close_mission(&mut self, target_number: TargetNumber, outcome: MissionOutcome, out: &mut FoOutput) {
        self.mission = None;
        self.log.record(target_number, outcome);
        out.events.push(match outcome {
            MissionOutcome::Assessed { effect, reengage } => MissionEvent::Assessed {
                target_number,
                effect,
                reengage,
            },
            MissionOutcome::Aborted(cause) => MissionEvent::Aborted { target_number, cause },
            MissionOutcome::TimedOut(stage) => MissionEvent::TimedOut {
                target_number: Some(target_number),
                stage,
            },
            MissionOutcome::Discarded => MissionEvent::Discarded { target_number },
        });
        info!(%target_number, ?outcome, "mission closed");
        if let FoState::Connected(_) = self.state {
            self.transition(FoState::Connected(FoMission::Idle));
        }
    }

    fn on_link_up(&mut self) -> Result<FoOutput, ProtocolViolation> {
        if self.state != FoState::Disconnected {
            return Err(self.violation("LINK_UP", ViolationReason::UnexpectedMessage));
        }
        self.transition(FoState::Connected(FoMission::Idle));
        Ok(FoOutput {
            to_fdc: Vec::new(),
            events: vec![MissionEvent::LinkUp { peer: Peer::Fdc }],
        })
    }

    fn on_link_lost(&mut self) -> FoOutput {
        let mut out = FoOutput::default();
        if self.state == FoState::Disconnected {
            return out;
        }
        match self.active_target() {
            Some(target_number) => self.close_mission(target_number, MissionOutcome::Discarded, &mut out),
            None => self.mission = None,
        }
        self.transition(FoState::Disconnected);
        out.events.push(MissionEvent::LinkLost { peer: Peer::Fdc });
        out
    }

    fn request_fire(&mut self, request: RequestForFire, now: Instant) -> Result<FoOutput, ProtocolViolation> {
        const KIND: &str = "REQUEST_FIRE";
        match self.mission_state() {
            Some(FoMission::Idle) => {}
            Some(_) => return Err(self.violation(KIND, ViolationReason::UnexpectedMessage)),
            None => return Err(self.violation(KIND, ViolationReason::NotConnected)),
        }

        info!(fdc = %request.fdc, location = ?request.target_location, "calling for fire");
        self.mission = Some(PendingMission {
            request: request.clone(),
            target_number: None,
            message_to_observer: None,
            fire_message_confirmed: false,
            last_call: None,
            deadline: deadline(MissionStage::WarnOrder, self.timeouts.warn_order_ms, now),
        });
        self.transition(FoState::Connected(FoMission::AwaitingWarnOrder));
        Ok(FoOutput {
            to_fdc: vec![FoFdcMessage::RequestForFire(request)],
            events: Vec::new(),
        })
    }

    fn report_assessment(&mut self, assessment: Assessment) -> Result<FoOutput, ProtocolViolation> {
        const KIND: &str = "BATTLE_DAMAGE_ASSESSMENT";
        match self.mission_state() {
            Some(FoMission::AwaitingAssessmentAck) => {}
            Some(_) => return Err(self.violation(KIND, ViolationReason::UnexpectedMessage)),
            None => return Err(self.violation(KIND, ViolationReason::NotConnected)),
        }
        let Some(target_number) = self.active_target() else {
            return Err(self.violation(KIND, ViolationReason::UnexpectedMessage));
        };

        let report = BattleDamageAssessment {
            target_number,
            effect: assessment.effect,
            remarks: assessment.remarks,
            reengage: assessment.reengage,
        };
        let mut out = FoOutput::default();
        out.to_fdc.push(FoFdcMessage::BattleDamageAssessment(report));
        self.close_mission(
            target_number,
            MissionOutcome::Assessed {
                effect: assessment.effect,
                reengage: assessment.reengage,
            },
            &mut out,
        );
        Ok(out)
    }

    fn on_fdc_message(&mut self, message: FoFdcMessage, now: Instant) -> Result<FoOutput, ProtocolViolation> {
        let kind = message.kind();
        if self.state == FoState::Disconnected {
            return Err(self.violation(kind, ViolationReason::NotConnected));
        }
        debug!(?message, "from fdc");

        match message {
            FoFdcMessage::WarnOrder(warn_order) => self.on_warn_order(warn_order, now),
            FoFdcMessage::MessageToObserver(message_to_observer) => {
                self.on_message_to_observer(message_to_observer, now)
            }
            FoFdcMessage::SolidReadback(readback) => self.on_readback(readback),
            FoFdcMessage::Shot(_) | FoFdcMessage::Splash(_) | FoFdcMessage::RoundsComplete(_) => {
                let call = message.shot_call();
                let target_number = message.target_number();
                match (call, target_number) {
                    (Some(call), Some(target_number)) => self.on_shot_call(call, target_number),
                    _ => Err(self.violation(kind, ViolationReason::UnexpectedMessage)),
                }
            }
            FoFdcMessage::MissionAbort(abort) => self.on_abort(abort),
            FoFdcMessage::RequestForFire(_)
            | FoFdcMessage::MessageToObserverReadback(_)
            | FoFdcMessage::BattleDamageAssessment(_) => Err(self.violation(kind, ViolationReason::OutboundOnly)),
        }
    }

    fn on_warn_order(&mut self, warn_order: WarnOrder, now: Instant) -> Result<FoOutput, ProtocolViolation> {
        const KIND: &str = "WARN_ORDER";
        let state = self.state;
        let fire_message_ms = self.timeouts.fire_message_ms;
        let mission = match (self.mission_state(), self.mission.as_mut()) {
            (Some(FoMission::AwaitingWarnOrder), Some(mission)) => mission,
            _ => return Err(ProtocolViolation::new(KIND, state, ViolationReason::UnexpectedMessage)),
        };
        if warn_order.request != mission.request {
            return Err(ProtocolViolation::new(KIND, state, ViolationReason::ReadbackMismatch));
        }

        let target_number = warn_order.target_number;
        mission.target_number = Some(target_number);
        mission.deadline = deadline(MissionStage::FireMessage, fire_message_ms, now);
        info!(%target_number, fdc = %warn_order.fdc, "warn order received");
        self.transition(FoState::Connected(FoMission::AwaitingFireMessage));

        Ok(FoOutput {
            to_fdc: vec![FoFdcMessage::SolidReadback(SolidReadback {
                target_number,
                subject: ReadbackSubject::RequestForFire,
            })],
            events: vec![MissionEvent::Opened { target_number }],
        })
    }

    fn on_message_to_observer(
        &mut self,
        message_to_observer: MessageToObserver,
        now: Instant,
    ) -> Result<FoOutput, ProtocolViolation> {
        const KIND: &str = "MESSAGE_TO_OBSERVER";
        let phase = self.mission_state();
        let rounds_complete_ms = self.timeouts.rounds_complete_ms;
        let target_number = message_to_observer.target_number;
        if phase != Some(FoMission::AwaitingFireMessage) {
            return Err(self.violation(KIND, ViolationReason::UnexpectedMessage));
        }
        let mission = self.active_mission(KIND, target_number)?;
        mission.message_to_observer = Some(message_to_observer.clone());
        mission.deadline = deadline(MissionStage::RoundsComplete, rounds_complete_ms, now);
        info!(
            %target_number,
            rounds = message_to_observer.rounds,
            ammunition = ?message_to_observer.ammunition,
            "message to observer received"
        );
        self.transition(FoState::Connected(FoMission::TrackingShotCycle));

        Ok(FoOutput {
            to_fdc: vec![FoFdcMessage::MessageToObserverReadback(message_to_observer)],
            events: vec![MissionEvent::FireApproved { target_number }],
        })
    }

    fn on_readback(&mut self, readback: SolidReadback) -> Result<FoOutput, ProtocolViolation> {
        const KIND: &str = "SOLID_READBACK";
        let SolidReadback {
            target_number,
            subject,
        } = readback;

        match subject {
            ReadbackSubject::MessageToObserver => {
                let phase = self.mission_state();
                let state = self.state;
                let mission = self.active_mission(KIND, target_number)?;
                if !matches!(
                    phase,
                    Some(FoMission::TrackingShotCycle | FoMission::AwaitingAssessmentAck)
                ) {
                    return Err(ProtocolViolation::new(KIND, state, ViolationReason::UnexpectedMessage));
                }
                mission.fire_message_confirmed = true;
            }
            ReadbackSubject::BattleDamageAssessment => {
                // Arrives after the observer has already closed the mission
                let assessed = self
                    .log
                    .outcome_of(target_number)
                    .is_some_and(|outcome| outcome.is_success());
                if !assessed {
                    return Err(self.violation(KIND, ViolationReason::UnexpectedMessage));
                }
            }
            ReadbackSubject::RequestForFire
            | ReadbackSubject::Shot
            | ReadbackSubject::Splash
            | ReadbackSubject::RoundsComplete => {
                return Err(self.violation(KIND, ViolationReason::OutboundOnly));
            }
        }

        debug!(%target_number, ?subject, "readback confirmed");
        Ok(FoOutput {
            to_fdc: Vec::new(),
            events: vec![MissionEvent::ReadbackConfirmed {
                target_number,
                subject,
            }],
        })
    }

    fn on_shot_call(&mut self, call: ShotCall, target_number: TargetNumber) -> Result<FoOutput, ProtocolViolation> {
        let kind = call.name();
        let phase = self.mission_state();
        let state = self.state;
        let mission = self.active_mission(kind, target_number)?;
        if phase != Some(FoMission::TrackingShotCycle) {
            return Err(ProtocolViolation::new(kind, state, ViolationReason::UnexpectedMessage));
        }
        let expected = match mission.last_call {
            None => Some(ShotCall::Shot),
            Some(last) => last.next(),
        };
        if expected != Some(call) {
            let reason = match expected {
                Some(expected) => ViolationReason::OutOfOrder {
                    expected: expected.name(),
                },
                None => ViolationReason::UnexpectedMessage,
            };
            return Err(ProtocolViolation::new(kind, state, reason));
        }
        if !mission.fire_message_confirmed {
            debug!(%target_number, %call, "shot cycle started before the fire message readback was confirmed");
        }

        mission.last_call = Some(call);
        if call == ShotCall::RoundsComplete {
            // The observer takes as long as it needs to assess
            mission.deadline = None;
        }
        info!(%target_number, %call, "observed");
        if call == ShotCall::RoundsComplete {
            self.transition(FoState::Connected(FoMission::AwaitingAssessmentAck));
        }

        let subject = match call {
            ShotCall::Shot => ReadbackSubject::Shot,
            ShotCall::Splash => ReadbackSubject::Splash,
            ShotCall::RoundsComplete => ReadbackSubject::RoundsComplete,
        };
        Ok(FoOutput {
            to_fdc: vec![FoFdcMessage::SolidReadback(SolidReadback {
                target_number,
                subject,
            })],
            events: vec![MissionEvent::ShotCall {
                target_number,
                call,
            }],
        })
    }

    fn on_abort(&mut self, abort: MissionAbort) -> Result<FoOutput, ProtocolViolation> {
        const KIND: &str = "MISSION_ABORT";
        let MissionAbort { target_number, cause } = abort;
        self.active_mission(KIND, target_number)?;

        warn!(%target_number, %cause, "fdc aborted mission");
        let mut out = FoOutput::default();
        self.close_mission(target_number, MissionOutcome::Aborted(cause), &mut out);
        Ok(out)
    }
}
