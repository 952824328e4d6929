//! FDC readiness and mission progression.
//!
//! The machine is pure: it consumes one [`FdcInput`] at a time with the
//! current instant and returns the messages to send and events to publish.
//! A rejected input leaves every field untouched.

use core::fmt;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ballistics::FiringSolver;
use crate::config::{millis, FdcConfig, FdcTimeouts};
use crate::error::{ConfigError, ProtocolViolation, ViolationReason};
use crate::fdc_gun::{Compliance, FdcGunMessage, FireCommand, StatusReply};
use crate::fo_fdc::{
    AbortCause, BattleDamageAssessment, FoFdcMessage, MessageToObserver, MissionAbort,
    ReadbackSubject, RequestForFire, ShotCall, SolidReadback, WarnOrder,
};
use crate::mission::{
    MissionEvent, MissionLog, MissionOutcome, MissionStage, Peer, TargetNumberAllocator,
};
use crate::types::{Ammunition, Callsign, TargetNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FdcState {
    Offline,
    Online(FdcMission),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FdcMission {
    Idle,
    AwaitingFireApproval,
    MissionInProgress(FirePhase),
    AwaitingAssessment,
}

/// Progress of the gun through a fire command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FirePhase {
    AwaitingCompliance,
    AwaitingShot,
    AwaitingSplash,
    AwaitingRoundsComplete,
}

impl FirePhase {
    fn awaiting(call: ShotCall) -> Self {
        match call {
            ShotCall::Shot => FirePhase::AwaitingShot,
            ShotCall::Splash => FirePhase::AwaitingSplash,
            ShotCall::RoundsComplete => FirePhase::AwaitingRoundsComplete,
        }
    }

    /// The fire report this phase waits for.
    pub fn expected_call(self) -> Option<ShotCall> {
        match self {
            FirePhase::AwaitingCompliance => None,
            FirePhase::AwaitingShot => Some(ShotCall::Shot),
            FirePhase::AwaitingSplash => Some(ShotCall::Splash),
            FirePhase::AwaitingRoundsComplete => Some(ShotCall::RoundsComplete),
        }
    }
}

impl fmt::Display for FdcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdcState::Offline => f.write_str("OFFLINE"),
            FdcState::Online(mission) => write!(f, "ONLINE/{mission}"),
        }
    }
}

impl fmt::Display for FdcMission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdcMission::Idle => f.write_str("IDLE"),
            FdcMission::AwaitingFireApproval => f.write_str("AWAITING_FIRE_APPROVAL"),
            FdcMission::MissionInProgress(phase) => write!(f, "MISSION_IN_PROGRESS/{phase}"),
            FdcMission::AwaitingAssessment => f.write_str("AWAITING_ASSESSMENT"),
        }
    }
}

impl fmt::Display for FirePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FirePhase::AwaitingCompliance => "AWAITING_COMPLIANCE",
            FirePhase::AwaitingShot => "AWAITING_SHOT",
            FirePhase::AwaitingSplash => "AWAITING_SPLASH",
            FirePhase::AwaitingRoundsComplete => "AWAITING_ROUNDS_COMPLETE",
        };
        f.write_str(text)
    }
}

/// Everything that can drive the FDC.
#[derive(Debug, Clone, PartialEq)]
pub enum FdcInput {
    LinkUp(Peer),
    LinkLost(Peer),
    FromObserver(FoFdcMessage),
    FromGun(FdcGunMessage),
    /// Operator approves fire for the mission awaiting approval
    ApproveFire,
    /// Operator stops the gun on the mission in progress
    CheckFire,
    RequestGunStatus,
}

impl FdcInput {
    pub fn kind(&self) -> &'static str {
        match self {
            FdcInput::LinkUp(_) => "LINK_UP",
            FdcInput::LinkLost(_) => "LINK_LOST",
            FdcInput::FromObserver(message) => message.kind(),
            FdcInput::FromGun(message) => message.kind(),
            FdcInput::ApproveFire => "APPROVE_FIRE",
            FdcInput::CheckFire => "CHECK_FIRE",
            FdcInput::RequestGunStatus => "REQUEST_GUN_STATUS",
        }
    }
}

/// What one transition produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FdcOutput {
    pub to_observer: Vec<FoFdcMessage>,
    pub to_gun: Vec<FdcGunMessage>,
    pub events: Vec<MissionEvent>,
}

impl FdcOutput {
    pub fn is_empty(&self) -> bool {
        self.to_observer.is_empty() && self.to_gun.is_empty() && self.events.is_empty()
    }

    pub fn merge(&mut self, other: FdcOutput) {
        self.to_observer.extend(other.to_observer);
        self.to_gun.extend(other.to_gun);
        self.events.extend(other.events);
    }
}

/// The request the gun has not answered yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GunRequest {
    FireCommand(TargetNumber),
    /// `superseded` names a fire command sent before this check fire that the
    /// gun has not answered; its compliance arrives ahead of the HAVE CO.
    CheckFire { superseded: Option<TargetNumber> },
    StatusRequest,
}

impl GunRequest {
    fn name(self) -> &'static str {
        match self {
            GunRequest::FireCommand(_) => "FIRE_COMMAND",
            GunRequest::CheckFire { .. } => "CHECK_FIRE",
            GunRequest::StatusRequest => "STATUS_REQUEST",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingGunRequest {
    request: GunRequest,
    /// Past this the gun is taken not to have received the request
    deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
struct ActiveMission {
    target_number: TargetNumber,
    request: RequestForFire,
    request_confirmed: bool,
    message_to_observer: Option<MessageToObserver>,
    relayed: Option<ShotCall>,
    deadline: Option<(MissionStage, Instant)>,
}

fn deadline(stage: MissionStage, ms: u64, now: Instant) -> Option<(MissionStage, Instant)> {
    millis(ms).map(|timeout| (stage, now + timeout))
}

#[derive(Debug)]
pub struct FdcStateMachine {
    callsign: Callsign,
    allocator: TargetNumberAllocator,
    solver: Box<dyn FiringSolver>,
    rounds_per_mission: u32,
    time_to_first_round_s: u32,
    default_ammunition: Ammunition,
    timeouts: FdcTimeouts,

    state: FdcState,
    mission: Option<ActiveMission>,
    log: MissionLog,

    gun_connected: bool,
    gun_request: Option<PendingGunRequest>,
    /// Mission the gun is currently firing for
    gun_engaged: Option<TargetNumber>,
    gun_status: Option<StatusReply>,
}

impl FdcStateMachine {
    /// # Errors
    ///
    /// Fails when the configuration does not validate.
    pub fn new(config: &FdcConfig) -> Result<Self, ConfigError> {
        Self::with_solver(config, Box::new(config.solver()))
    }

    /// # Errors
    ///
    /// Fails when the configuration does not validate.
    pub fn with_solver(config: &FdcConfig, solver: Box<dyn FiringSolver>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            callsign: config.callsign()?,
            allocator: config.allocator()?,
            solver,
            rounds_per_mission: config.rounds_per_mission,
            time_to_first_round_s: config.time_to_first_round_s,
            default_ammunition: config.default_ammunition,
            timeouts: config.timeouts,
            state: FdcState::Offline,
            mission: None,
            log: MissionLog::new(),
            gun_connected: false,
            gun_request: None,
            gun_engaged: None,
            gun_status: None,
        })
    }

    pub fn state(&self) -> FdcState {
        self.state
    }

    pub fn callsign(&self) -> Callsign {
        self.callsign
    }

    pub fn active_target(&self) -> Option<TargetNumber> {
        self.mission.as_ref().map(|mission| mission.target_number)
    }

    /// True once the observer has read back the warn order for the active mission.
    pub fn request_confirmed(&self) -> bool {
        self.mission.as_ref().is_some_and(|mission| mission.request_confirmed)
    }

    pub fn mission_log(&self) -> &MissionLog {
        &self.log
    }

    pub fn is_gun_connected(&self) -> bool {
        self.gun_connected
    }

    /// True while a request to the gun is waiting for its answer.
    pub fn is_gun_busy(&self) -> bool {
        self.gun_request.is_some()
    }

    pub fn gun_status(&self) -> Option<&StatusReply> {
        self.gun_status.as_ref()
    }

    /// When the active mission or the outstanding gun request times out if
    /// nothing else happens.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mission = self
            .mission
            .as_ref()
            .and_then(|mission| mission.deadline)
            .map(|(_, at)| at);
        let gun = self.gun_request.and_then(|pending| pending.deadline);
        match (mission, gun) {
            (Some(mission), Some(gun)) => Some(mission.min(gun)),
            (mission, gun) => mission.or(gun),
        }
    }

    /// Applies one input.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] when the input is not legal in the
    /// current state; nothing changes in that case.
    pub fn handle(&mut self, input: FdcInput, now: Instant) -> Result<FdcOutput, ProtocolViolation> {
        match input {
            FdcInput::LinkUp(peer) => self.on_link_up(peer),
            FdcInput::LinkLost(peer) => Ok(self.on_link_lost(peer, now)),
            FdcInput::FromObserver(message) => self.on_observer_message(message, now),
            FdcInput::FromGun(message) => self.on_gun_message(message, now),
            FdcInput::ApproveFire => self.approve_fire(now),
            FdcInput::CheckFire => self.check_fire(now),
            FdcInput::RequestGunStatus => self.request_gun_status(now),
        }
    }

    /// Drops the active mission if its deadline has passed, then forgets a
    /// gun request that went unanswered for too long.
    pub fn expire(&mut self, now: Instant) -> FdcOutput {
        let mut out = FdcOutput::default();
        let timed_out = self.mission.as_ref().and_then(|mission| match mission.deadline {
            Some((stage, at)) if at <= now => Some((mission.target_number, stage)),
            _ => None,
        });
        if let Some((target_number, stage)) = timed_out {
            warn!(%target_number, %stage, "mission timed out");
            out.to_observer.push(FoFdcMessage::MissionAbort(MissionAbort {
                target_number,
                cause: AbortCause::Timeout,
            }));
            self.stand_down_gun(now, &mut out);
            self.close_mission(MissionOutcome::TimedOut(stage), &mut out);
        }

        if let Some(pending) = self.gun_request {
            if pending.deadline.is_some_and(|at| at <= now) {
                warn!(request = pending.request.name(), "gun never answered");
                self.gun_request = None;
            }
        }
        out
    }

    fn gun_deadline(&self, now: Instant) -> Option<Instant> {
        millis(self.timeouts.gun_compliance_ms).map(|timeout| now + timeout)
    }

    fn await_gun(&mut self, request: GunRequest, now: Instant) {
        self.gun_request = Some(PendingGunRequest {
            request,
            deadline: self.gun_deadline(now),
        });
    }

    /// The request still holding the gun as of `now`. One past its deadline
    /// no longer blocks a new request.
    fn outstanding_gun_request(&self, now: Instant) -> Option<GunRequest> {
        self.gun_request
            .filter(|pending| pending.deadline.map_or(true, |at| now < at))
            .map(|pending| pending.request)
    }

    fn violation(&self, message: &'static str, reason: ViolationReason) -> ProtocolViolation {
        ProtocolViolation::new(message, self.state, reason)
    }

    fn transition(&mut self, next: FdcState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "fdc state change");
            self.state = next;
        }
    }

    /// The active mission if it carries `target_number`.
    fn active_mission(
        &mut self,
        message: &'static str,
        target_number: TargetNumber,
    ) -> Result<&mut ActiveMission, ProtocolViolation> {
        let state = self.state;
        let reason = match &self.mission {
            Some(mission) if mission.target_number == target_number => None,
            _ if self.log.is_closed(target_number) => {
                Some(ViolationReason::MissionClosed(target_number.to_string()))
            }
            Some(mission) => Some(ViolationReason::TargetNumberMismatch {
                expected: mission.target_number.to_string(),
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

    /// Logs the active mission as closed and returns to idle.
    fn close_mission(&mut self, outcome: MissionOutcome, out: &mut FdcOutput) {
        if let Some(mission) = self.mission.take() {
            let target_number = mission.target_number;
            self.log.record(target_number, outcome);
            if self.gun_engaged == Some(target_number) {
                self.gun_engaged = None;
            }
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
        }
        if let FdcState::Online(_) = self.state {
            self.transition(FdcState::Online(FdcMission::Idle));
        }
    }

    fn abort_mission(&mut self, cause: AbortCause, out: &mut FdcOutput) {
        if let Some(target_number) = self.active_target() {
            warn!(%target_number, %cause, "aborting mission");
            out.to_observer
                .push(FoFdcMessage::MissionAbort(MissionAbort { target_number, cause }));
        }
        self.close_mission(MissionOutcome::Aborted(cause), out);
    }

    /// Sends a check fire if the gun is firing, or may be firing on a fire
    /// command it never answered. The check fire replaces any outstanding request.
    fn stand_down_gun(&mut self, now: Instant, out: &mut FdcOutput) {
        let unanswered = match self.gun_request.map(|pending| pending.request) {
            Some(GunRequest::FireCommand(target_number)) => Some(target_number),
            _ => None,
        };
        let Some(target_number) = self.gun_engaged.take().or(unanswered) else {
            return;
        };
        if !self.gun_connected {
            self.gun_request = None;
            return;
        }
        debug!(%target_number, "standing the gun down");
        out.to_gun.push(FdcGunMessage::CheckFire);
        self.await_gun(GunRequest::CheckFire { superseded: unanswered }, now);
    }

    fn on_link_up(&mut self, peer: Peer) -> Result<FdcOutput, ProtocolViolation> {
        let mut out = FdcOutput::default();
        match peer {
            Peer::Observer if self.state == FdcState::Offline => {
                self.transition(FdcState::Online(FdcMission::Idle));
            }
            Peer::Gun if !self.gun_connected => {
                info!("gun link up");
                self.gun_connected = true;
            }
            _ => return Err(self.violation("LINK_UP", ViolationReason::UnexpectedMessage)),
        }
        out.events.push(MissionEvent::LinkUp { peer });
        Ok(out)
    }

    fn on_link_lost(&mut self, peer: Peer, now: Instant) -> FdcOutput {
        let mut out = FdcOutput::default();
        match peer {
            Peer::Observer if self.state != FdcState::Offline => {
                self.stand_down_gun(now, &mut out);
                self.close_mission(MissionOutcome::Discarded, &mut out);
                self.transition(FdcState::Offline);
            }
            Peer::Gun if self.gun_connected => {
                warn!("gun link lost");
                self.gun_connected = false;
                self.gun_request = None;
                self.gun_engaged = None;
                if let FdcState::Online(FdcMission::MissionInProgress(_)) = self.state {
                    self.abort_mission(AbortCause::GunCannotComply, &mut out);
                }
            }
            _ => return out,
        }
        out.events.push(MissionEvent::LinkLost { peer });
        out
    }

    fn on_observer_message(
        &mut self,
        message: FoFdcMessage,
        now: Instant,
    ) -> Result<FdcOutput, ProtocolViolation> {
        let kind = message.kind();
        if self.state == FdcState::Offline {
            return Err(self.violation(kind, ViolationReason::NotConnected));
        }
        debug!(?message, "from observer");

        match message {
            FoFdcMessage::RequestForFire(request) => self.open_mission(request, now),
            FoFdcMessage::SolidReadback(readback) => self.on_readback(readback),
            FoFdcMessage::MessageToObserverReadback(readback) => self.on_mto_readback(readback),
            FoFdcMessage::BattleDamageAssessment(assessment) => self.on_assessment(assessment),
            FoFdcMessage::WarnOrder(_)
            | FoFdcMessage::MessageToObserver(_)
            | FoFdcMessage::Shot(_)
            | FoFdcMessage::Splash(_)
            | FoFdcMessage::RoundsComplete(_)
            | FoFdcMessage::MissionAbort(_) => Err(self.violation(kind, ViolationReason::OutboundOnly)),
        }
    }

    fn open_mission(&mut self, request: RequestForFire, now: Instant) -> Result<FdcOutput, ProtocolViolation> {
        if self.state != FdcState::Online(FdcMission::Idle) {
            return Err(self.violation("REQUEST_FOR_FIRE", ViolationReason::UnexpectedMessage));
        }
        if request.fdc != self.callsign {
            debug!(addressed_to = %request.fdc, "request addressed to another callsign");
        }

        let target_number = self.allocator.allocate();
        info!(%target_number, observer = %request.observer, "request for fire accepted");

        let warn_order = WarnOrder {
            fdc: self.callsign,
            observer: request.observer,
            target_number,
            request: request.clone(),
        };
        self.mission = Some(ActiveMission {
            target_number,
            request,
            request_confirmed: false,
            message_to_observer: None,
            relayed: None,
            deadline: deadline(MissionStage::FireApproval, self.timeouts.fire_approval_ms, now),
        });
        self.transition(FdcState::Online(FdcMission::AwaitingFireApproval));

        Ok(FdcOutput {
            to_observer: vec![FoFdcMessage::WarnOrder(warn_order)],
            to_gun: Vec::new(),
            events: vec![MissionEvent::Opened { target_number }],
        })
    }

    fn on_readback(&mut self, readback: SolidReadback) -> Result<FdcOutput, ProtocolViolation> {
        const KIND: &str = "SOLID_READBACK";
        let SolidReadback {
            target_number,
            subject,
        } = readback;
        let state = self.state;

        match subject {
            ReadbackSubject::MessageToObserver | ReadbackSubject::BattleDamageAssessment => {
                return Err(self.violation(KIND, ViolationReason::OutboundOnly));
            }
            ReadbackSubject::RequestForFire => {
                let mission = self.active_mission(KIND, target_number)?;
                if state != FdcState::Online(FdcMission::AwaitingFireApproval) {
                    return Err(ProtocolViolation::new(KIND, state, ViolationReason::UnexpectedMessage));
                }
                mission.request_confirmed = true;
            }
            ReadbackSubject::Shot | ReadbackSubject::Splash | ReadbackSubject::RoundsComplete => {
                let call = match subject {
                    ReadbackSubject::Shot => ShotCall::Shot,
                    ReadbackSubject::Splash => ShotCall::Splash,
                    _ => ShotCall::RoundsComplete,
                };
                let mission = self.active_mission(KIND, target_number)?;
                if mission.relayed.map_or(true, |relayed| relayed < call) {
                    return Err(ProtocolViolation::new(KIND, state, ViolationReason::UnexpectedMessage));
                }
            }
        }

        debug!(%target_number, ?subject, "readback confirmed");
        Ok(FdcOutput {
            events: vec![MissionEvent::ReadbackConfirmed {
                target_number,
                subject,
            }],
            ..FdcOutput::default()
        })
    }

    fn on_mto_readback(&mut self, readback: MessageToObserver) -> Result<FdcOutput, ProtocolViolation> {
        const KIND: &str = "MESSAGE_TO_OBSERVER_READBACK";
        let state = self.state;
        let target_number = readback.target_number;
        let mission = self.active_mission(KIND, target_number)?;
        let issued = match (state, &mission.message_to_observer) {
            (
                FdcState::Online(FdcMission::MissionInProgress(_) | FdcMission::AwaitingAssessment),
                Some(issued),
            ) => issued,
            _ => return Err(ProtocolViolation::new(KIND, state, ViolationReason::UnexpectedMessage)),
        };
        if *issued != readback {
            return Err(ProtocolViolation::new(KIND, state, ViolationReason::ReadbackMismatch));
        }

        Ok(FdcOutput {
            to_observer: vec![FoFdcMessage::SolidReadback(SolidReadback {
                target_number,
                subject: ReadbackSubject::MessageToObserver,
            })],
            to_gun: Vec::new(),
            events: vec![MissionEvent::ReadbackConfirmed {
                target_number,
                subject: ReadbackSubject::MessageToObserver,
            }],
        })
    }

    fn on_assessment(&mut self, assessment: BattleDamageAssessment) -> Result<FdcOutput, ProtocolViolation> {
        const KIND: &str = "BATTLE_DAMAGE_ASSESSMENT";
        let state = self.state;
        let target_number = assessment.target_number;
        self.active_mission(KIND, target_number)?;
        match state {
            FdcState::Online(FdcMission::AwaitingAssessment) => {}
            FdcState::Online(FdcMission::MissionInProgress(_)) => {
                return Err(self.violation(
                    KIND,
                    ViolationReason::OutOfOrder {
                        expected: ShotCall::RoundsComplete.name(),
                    },
                ));
            }
            _ => return Err(self.violation(KIND, ViolationReason::UnexpectedMessage)),
        }

        info!(%target_number, effect = ?assessment.effect, remarks = %assessment.remarks, "assessment received");
        let mut out = FdcOutput::default();
        out.to_observer.push(FoFdcMessage::SolidReadback(SolidReadback {
            target_number,
            subject: ReadbackSubject::BattleDamageAssessment,
        }));
        self.close_mission(
            MissionOutcome::Assessed {
                effect: assessment.effect,
                reengage: assessment.reengage,
            },
            &mut out,
        );
        Ok(out)
    }

    fn approve_fire(&mut self, now: Instant) -> Result<FdcOutput, ProtocolViolation> {
        const KIND: &str = "APPROVE_FIRE";
        match self.state {
            FdcState::Online(FdcMission::AwaitingFireApproval) => {}
            FdcState::Offline => return Err(self.violation(KIND, ViolationReason::NotConnected)),
            FdcState::Online(_) => return Err(self.violation(KIND, ViolationReason::UnexpectedMessage)),
        }
        if !self.gun_connected {
            return Err(self.violation(KIND, ViolationReason::NotConnected));
        }
        if let Some(request) = self.outstanding_gun_request(now) {
            return Err(self.violation(KIND, ViolationReason::GunBusy(request.name())));
        }
        let gun_deadline = self.gun_deadline(now);
        let state = self.state;
        let Some(mission) = self.mission.as_mut() else {
            return Err(ProtocolViolation::new(KIND, state, ViolationReason::UnexpectedMessage));
        };

        let target_number = mission.target_number;
        let ammunition = mission.request.ammunition.unwrap_or(self.default_ammunition);
        let message_to_observer = MessageToObserver {
            fdc: self.callsign,
            observer: mission.request.observer,
            target_number,
            ammunition,
            method_of_fire: mission.request.method_of_fire.unwrap_or_default(),
            rounds: self.rounds_per_mission,
            time_to_first_round_s: self.time_to_first_round_s,
        };
        let command = FireCommand {
            target_number,
            rounds: self.rounds_per_mission,
            ammunition,
            aim: self.solver.solve(&mission.request.target_location),
        };
        info!(
            %target_number,
            range_m = command.aim.range_m,
            direction_mils = command.aim.direction_mils,
            rounds = command.rounds,
            "fire approved"
        );

        mission.message_to_observer = Some(message_to_observer.clone());
        mission.deadline = deadline(MissionStage::GunCompliance, self.timeouts.gun_compliance_ms, now);
        self.gun_request = Some(PendingGunRequest {
            request: GunRequest::FireCommand(target_number),
            deadline: gun_deadline,
        });
        self.transition(FdcState::Online(FdcMission::MissionInProgress(
            FirePhase::AwaitingCompliance,
        )));

        Ok(FdcOutput {
            to_observer: vec![FoFdcMessage::MessageToObserver(message_to_observer)],
            to_gun: vec![FdcGunMessage::FireCommand(command)],
            events: vec![MissionEvent::FireApproved { target_number }],
        })
    }

    /// Stops the gun on the mission in progress, overriding a fire command the
    /// gun has not answered yet.
    fn check_fire(&mut self, now: Instant) -> Result<FdcOutput, ProtocolViolation> {
        const KIND: &str = "CHECK_FIRE";
        match self.state {
            FdcState::Online(FdcMission::MissionInProgress(_)) => {}
            FdcState::Offline => return Err(self.violation(KIND, ViolationReason::NotConnected)),
            FdcState::Online(_) => return Err(self.violation(KIND, ViolationReason::UnexpectedMessage)),
        }
        if !self.gun_connected {
            return Err(self.violation(KIND, ViolationReason::NotConnected));
        }
        let superseded = match self.outstanding_gun_request(now) {
            None => None,
            Some(GunRequest::FireCommand(target_number)) => Some(target_number),
            Some(request) => return Err(self.violation(KIND, ViolationReason::GunBusy(request.name()))),
        };

        let mut out = FdcOutput::default();
        out.to_gun.push(FdcGunMessage::CheckFire);
        self.await_gun(GunRequest::CheckFire { superseded }, now);
        self.gun_engaged = None;
        self.abort_mission(AbortCause::CheckFire, &mut out);
        Ok(out)
    }

    fn request_gun_status(&mut self, now: Instant) -> Result<FdcOutput, ProtocolViolation> {
        const KIND: &str = "REQUEST_GUN_STATUS";
        if !self.gun_connected {
            return Err(self.violation(KIND, ViolationReason::NotConnected));
        }
        if let Some(request) = self.outstanding_gun_request(now) {
            return Err(self.violation(KIND, ViolationReason::GunBusy(request.name())));
        }
        self.await_gun(GunRequest::StatusRequest, now);
        Ok(FdcOutput {
            to_gun: vec![FdcGunMessage::StatusRequest],
            ..FdcOutput::default()
        })
    }

    fn on_gun_message(&mut self, message: FdcGunMessage, now: Instant) -> Result<FdcOutput, ProtocolViolation> {
        let kind = message.kind();
        if !self.gun_connected {
            return Err(self.violation(kind, ViolationReason::NotConnected));
        }
        debug!(?message, "from gun");

        match message {
            FdcGunMessage::ComplianceResponse { compliance } => {
                let Some(request) = self.gun_request.map(|pending| pending.request) else {
                    return Err(self.violation(kind, ViolationReason::NoOutstandingRequest));
                };
                match request {
                    GunRequest::StatusRequest => Err(self.violation(kind, ViolationReason::UnexpectedMessage)),
                    GunRequest::CheckFire {
                        superseded: Some(target_number),
                    } if compliance != Compliance::HaveCo => {
                        debug!(%target_number, ?compliance, "gun answered a fire command already checked");
                        if let Some(pending) = self.gun_request.as_mut() {
                            pending.request = GunRequest::CheckFire { superseded: None };
                        }
                        Ok(FdcOutput::default())
                    }
                    GunRequest::CheckFire { .. } => {
                        self.gun_request = None;
                        if compliance.is_refusal() {
                            warn!(?compliance, "gun did not accept check fire");
                        } else {
                            info!(?compliance, "gun checked fire");
                        }
                        Ok(FdcOutput::default())
                    }
                    GunRequest::FireCommand(target_number) => {
                        self.gun_request = None;
                        Ok(self.on_fire_compliance(target_number, compliance, now))
                    }
                }
            }
            FdcGunMessage::StatusReply(reply) => {
                if self.gun_request.map(|pending| pending.request) != Some(GunRequest::StatusRequest) {
                    return Err(self.violation(kind, ViolationReason::NoOutstandingRequest));
                }
                self.gun_request = None;
                info!(status = ?reply.status, rounds = ?reply.rounds, "gun status");
                self.gun_status = Some(reply.clone());
                Ok(FdcOutput {
                    events: vec![MissionEvent::GunStatus(reply)],
                    ..FdcOutput::default()
                })
            }
            FdcGunMessage::FireReport {
                target_number,
                report,
            } => self.on_fire_report(target_number, report, now),
            FdcGunMessage::StatusRequest | FdcGunMessage::FireCommand(_) | FdcGunMessage::CheckFire => {
                Err(self.violation(kind, ViolationReason::OutboundOnly))
            }
        }
    }

    fn on_fire_compliance(
        &mut self,
        target_number: TargetNumber,
        compliance: Compliance,
        now: Instant,
    ) -> FdcOutput {
        let mut out = FdcOutput::default();
        let awaiting = self.state == FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingCompliance))
            && self.active_target() == Some(target_number);

        if !awaiting {
            // The mission closed while the command was outstanding
            if !compliance.is_refusal() && self.gun_connected {
                warn!(%target_number, "gun accepted a fire command for a closed mission");
                out.to_gun.push(FdcGunMessage::CheckFire);
                self.await_gun(GunRequest::CheckFire { superseded: None }, now);
            }
            return out;
        }

        match compliance {
            Compliance::CantCo => self.abort_mission(AbortCause::GunCannotComply, &mut out),
            Compliance::WontCo => self.abort_mission(AbortCause::GunWillNotComply, &mut out),
            Compliance::WillCo | Compliance::HaveCo => {
                info!(%target_number, ?compliance, "gun complies");
                self.gun_engaged = Some(target_number);
                if let Some(mission) = self.mission.as_mut() {
                    mission.deadline =
                        deadline(MissionStage::RoundsComplete, self.timeouts.rounds_complete_ms, now);
                }
                self.transition(FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingShot)));
            }
        }
        out
    }

    fn on_fire_report(
        &mut self,
        target_number: TargetNumber,
        report: ShotCall,
        now: Instant,
    ) -> Result<FdcOutput, ProtocolViolation> {
        const KIND: &str = "FIRE_REPORT";
        if self.gun_engaged != Some(target_number) {
            let reason = if self.log.is_closed(target_number) {
                ViolationReason::MissionClosed(target_number.to_string())
            } else if let Some(engaged) = self.gun_engaged {
                ViolationReason::TargetNumberMismatch {
                    expected: engaged.to_string(),
                    found: target_number.to_string(),
                }
            } else {
                ViolationReason::UnexpectedMessage
            };
            return Err(self.violation(KIND, reason));
        }
        let expected = match self.state {
            FdcState::Online(FdcMission::MissionInProgress(phase)) => phase.expected_call(),
            _ => None,
        };
        match expected {
            Some(expected) if expected == report => {}
            Some(expected) => {
                return Err(self.violation(
                    KIND,
                    ViolationReason::OutOfOrder {
                        expected: expected.name(),
                    },
                ))
            }
            None => return Err(self.violation(KIND, ViolationReason::UnexpectedMessage)),
        }

        let state = self.state;
        let assessment_ms = self.timeouts.assessment_ms;
        let mission = self.active_mission(KIND, target_number)?;
        mission.relayed = Some(report);
        let next = match report.next() {
            Some(next) => FdcState::Online(FdcMission::MissionInProgress(FirePhase::awaiting(next))),
            None => {
                mission.deadline = deadline(MissionStage::Assessment, assessment_ms, now);
                FdcState::Online(FdcMission::AwaitingAssessment)
            }
        };
        if report == ShotCall::RoundsComplete {
            self.gun_engaged = None;
        }
        info!(%target_number, %report, from = %state, "relaying fire report");
        self.transition(next);

        Ok(FdcOutput {
            to_observer: vec![FoFdcMessage::for_shot_call(report, target_number)],
            to_gun: Vec::new(),
            events: vec![MissionEvent::ShotCall {
                target_number,
                call: report,
            }],
        })
    }
}
