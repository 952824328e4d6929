use std::time::Duration;

use fire_support_sim::config::FdcConfig;
use fire_support_sim::error::ViolationReason;
use fire_support_sim::fdc_gun::{Compliance, FdcGunMessage, Status, StatusReply};
use fire_support_sim::fo_fdc::*;
use fire_support_sim::mission::{MissionEvent, MissionOutcome, MissionStage, Peer};
use fire_support_sim::sim::fdc::{FdcInput, FdcMission, FdcOutput, FdcState, FdcStateMachine, FirePhase};
use fire_support_sim::types::{Ammunition, Callsign, TargetNumber};
use tokio::time::Instant;

fn request() -> RequestForFire {
    RequestForFire {
        observer: Callsign::new("FO-1").unwrap(),
        fdc: Callsign::new("FDC-1").unwrap(),
        mission_type: MissionType::FireForEffect,
        target_location: TargetLocation::grid(1800, 1900, GridPrecision::EightDigit).unwrap(),
        target_description: TargetDescription::new("infantry platoon").unwrap(),
        danger_close: false,
        ammunition: Some(Ammunition::HighExplosive),
        method_of_fire: None,
    }
}

fn online(now: Instant) -> FdcStateMachine {
    let mut fdc = FdcStateMachine::new(&FdcConfig::default()).unwrap();
    fdc.handle(FdcInput::LinkUp(Peer::Observer), now).unwrap();
    fdc.handle(FdcInput::LinkUp(Peer::Gun), now).unwrap();
    fdc
}

fn from_observer(fdc: &mut FdcStateMachine, message: FoFdcMessage, now: Instant) -> FdcOutput {
    fdc.handle(FdcInput::FromObserver(message), now).unwrap()
}

fn from_gun(fdc: &mut FdcStateMachine, message: FdcGunMessage, now: Instant) -> FdcOutput {
    fdc.handle(FdcInput::FromGun(message), now).unwrap()
}

/// Opens a mission and returns its target number.
fn open(fdc: &mut FdcStateMachine, now: Instant) -> TargetNumber {
    let out = from_observer(fdc, FoFdcMessage::RequestForFire(request()), now);
    match &out.to_observer[..] {
        [FoFdcMessage::WarnOrder(warn_order)] => warn_order.target_number,
        other => panic!("expected one warn order, got {other:?}"),
    }
}

fn readback(target_number: TargetNumber, subject: ReadbackSubject) -> FoFdcMessage {
    FoFdcMessage::SolidReadback(SolidReadback {
        target_number,
        subject,
    })
}

/// Opens, confirms and approves a mission, then has the gun accept it.
fn engaged(fdc: &mut FdcStateMachine, now: Instant) -> TargetNumber {
    let target_number = open(fdc, now);
    from_observer(fdc, readback(target_number, ReadbackSubject::RequestForFire), now);
    fdc.handle(FdcInput::ApproveFire, now).unwrap();
    from_gun(
        fdc,
        FdcGunMessage::ComplianceResponse {
            compliance: Compliance::WillCo,
        },
        now,
    );
    target_number
}

fn report(target_number: TargetNumber, report: ShotCall) -> FdcGunMessage {
    FdcGunMessage::FireReport {
        target_number,
        report,
    }
}

fn abort_cause(out: &FdcOutput) -> Option<AbortCause> {
    out.to_observer.iter().find_map(|message| match message {
        FoFdcMessage::MissionAbort(abort) => Some(abort.cause),
        _ => None,
    })
}

#[test]
fn test_starts_offline_and_comes_online_with_observer() {
    let now = Instant::now();
    let mut fdc = FdcStateMachine::new(&FdcConfig::default()).unwrap();
    assert_eq!(fdc.state(), FdcState::Offline);

    let out = fdc.handle(FdcInput::LinkUp(Peer::Observer), now).unwrap();
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
    assert_eq!(out.events, vec![MissionEvent::LinkUp { peer: Peer::Observer }]);

    // A second link up for the same peer makes no sense
    let err = fdc.handle(FdcInput::LinkUp(Peer::Observer), now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
}

#[test]
fn test_request_opens_mission_with_one_warn_order() {
    let now = Instant::now();
    let mut fdc = online(now);

    let out = from_observer(&mut fdc, FoFdcMessage::RequestForFire(request()), now);
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::AwaitingFireApproval));
    assert_eq!(out.to_observer.len(), 1);
    assert!(out.to_gun.is_empty());

    let FoFdcMessage::WarnOrder(warn_order) = &out.to_observer[0] else {
        panic!("expected a warn order, got {:?}", out.to_observer[0]);
    };
    assert_eq!(warn_order.target_number.as_str(), "AN2001");
    assert_eq!(warn_order.request, request());
    assert_eq!(warn_order.fdc.as_str(), "FDC-1");
    assert_eq!(
        out.events,
        vec![MissionEvent::Opened {
            target_number: warn_order.target_number
        }]
    );
    assert_eq!(fdc.active_target(), Some(warn_order.target_number));
}

#[test]
fn test_second_request_during_mission_is_rejected() {
    let now = Instant::now();
    let mut fdc = online(now);
    open(&mut fdc, now);

    let err = fdc
        .handle(FdcInput::FromObserver(FoFdcMessage::RequestForFire(request())), now)
        .unwrap_err();
    assert_eq!(err.message, "REQUEST_FOR_FIRE");
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::AwaitingFireApproval));
}

#[test]
fn test_approval_requires_a_pending_mission() {
    let now = Instant::now();
    let mut offline = FdcStateMachine::new(&FdcConfig::default()).unwrap();
    let err = offline.handle(FdcInput::ApproveFire, now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::NotConnected);

    let mut fdc = online(now);
    let err = fdc.handle(FdcInput::ApproveFire, now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
    assert_eq!(err.state, "ONLINE/IDLE");
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
}

#[test]
fn test_approval_requires_the_gun() {
    let now = Instant::now();
    let mut fdc = FdcStateMachine::new(&FdcConfig::default()).unwrap();
    fdc.handle(FdcInput::LinkUp(Peer::Observer), now).unwrap();
    open(&mut fdc, now);

    let err = fdc.handle(FdcInput::ApproveFire, now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::NotConnected);
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::AwaitingFireApproval));
}

#[test]
fn test_full_mission_cycle() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = open(&mut fdc, now);

    let out = from_observer(&mut fdc, readback(target_number, ReadbackSubject::RequestForFire), now);
    assert!(fdc.request_confirmed());
    assert!(out.to_observer.is_empty());

    // Approval sends the MTO and the fire command together
    let out = fdc.handle(FdcInput::ApproveFire, now).unwrap();
    assert_eq!(
        fdc.state(),
        FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingCompliance))
    );
    let FoFdcMessage::MessageToObserver(mto) = &out.to_observer[0] else {
        panic!("expected a message to observer");
    };
    assert_eq!(mto.target_number, target_number);
    assert_eq!(mto.rounds, 4);
    assert_eq!(mto.ammunition, Ammunition::HighExplosive);
    assert_eq!(mto.method_of_fire, MethodOfFire::WhenReady);
    let FdcGunMessage::FireCommand(command) = &out.to_gun[0] else {
        panic!("expected a fire command");
    };
    assert_eq!(command.target_number, target_number);
    assert_eq!(command.rounds, 4);
    assert_eq!(command.aim.range_m, 12_042);
    assert_eq!(command.aim.direction_mils, 740);

    // The observer reads the MTO back
    let out = from_observer(&mut fdc, FoFdcMessage::MessageToObserverReadback(mto.clone()), now);
    assert_eq!(
        out.to_observer,
        vec![readback(target_number, ReadbackSubject::MessageToObserver)]
    );

    from_gun(
        &mut fdc,
        FdcGunMessage::ComplianceResponse {
            compliance: Compliance::WillCo,
        },
        now,
    );
    assert_eq!(
        fdc.state(),
        FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingShot))
    );

    for (call, next) in [
        (
            ShotCall::Shot,
            FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingSplash)),
        ),
        (
            ShotCall::Splash,
            FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingRoundsComplete)),
        ),
        (ShotCall::RoundsComplete, FdcState::Online(FdcMission::AwaitingAssessment)),
    ] {
        let out = from_gun(&mut fdc, report(target_number, call), now);
        assert_eq!(out.to_observer, vec![FoFdcMessage::for_shot_call(call, target_number)]);
        assert_eq!(fdc.state(), next);
    }

    let subject_of = |call: ShotCall| match call {
        ShotCall::Shot => ReadbackSubject::Shot,
        ShotCall::Splash => ReadbackSubject::Splash,
        ShotCall::RoundsComplete => ReadbackSubject::RoundsComplete,
    };
    for call in [ShotCall::Shot, ShotCall::Splash, ShotCall::RoundsComplete] {
        from_observer(&mut fdc, readback(target_number, subject_of(call)), now);
    }

    let assessment = BattleDamageAssessment {
        target_number,
        effect: TargetEffect::Destroyed,
        remarks: "target destroyed".to_string(),
        reengage: false,
    };
    let out = from_observer(
        &mut fdc,
        FoFdcMessage::BattleDamageAssessment(assessment.clone()),
        now,
    );
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
    assert_eq!(
        out.to_observer,
        vec![readback(target_number, ReadbackSubject::BattleDamageAssessment)]
    );
    assert_eq!(
        fdc.mission_log().outcome_of(target_number),
        Some(MissionOutcome::Assessed {
            effect: TargetEffect::Destroyed,
            reengage: false
        })
    );
    assert_eq!(fdc.active_target(), None);

    // Nothing more is accepted for an assessed mission
    let err = fdc
        .handle(FdcInput::FromGun(report(target_number, ShotCall::Shot)), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::MissionClosed("AN2001".to_string()));
    let err = fdc
        .handle(
            FdcInput::FromObserver(FoFdcMessage::BattleDamageAssessment(assessment)),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::MissionClosed("AN2001".to_string()));
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
    assert_eq!(fdc.mission_log().history().len(), 1);
}

#[test]
fn test_fire_reports_out_of_order_are_rejected() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = engaged(&mut fdc, now);

    let err = fdc
        .handle(FdcInput::FromGun(report(target_number, ShotCall::Splash)), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::OutOfOrder { expected: "SHOT" });
    assert_eq!(
        fdc.state(),
        FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingShot))
    );

    from_gun(&mut fdc, report(target_number, ShotCall::Shot), now);
    let err = fdc
        .handle(FdcInput::FromGun(report(target_number, ShotCall::Shot)), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::OutOfOrder { expected: "SPLASH" });
}

#[test]
fn test_assessment_before_rounds_complete_is_rejected() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = engaged(&mut fdc, now);

    let err = fdc
        .handle(
            FdcInput::FromObserver(FoFdcMessage::BattleDamageAssessment(BattleDamageAssessment {
                target_number,
                effect: TargetEffect::Suppressed,
                remarks: String::new(),
                reengage: false,
            })),
            now,
        )
        .unwrap_err();
    assert_eq!(
        err.reason,
        ViolationReason::OutOfOrder {
            expected: "ROUNDS_COMPLETE"
        }
    );
}

#[test]
fn test_readback_of_shot_not_yet_relayed_is_rejected() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = engaged(&mut fdc, now);

    let err = fdc
        .handle(
            FdcInput::FromObserver(readback(target_number, ReadbackSubject::Shot)),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
}

#[test]
fn test_wrong_target_number_is_rejected() {
    let now = Instant::now();
    let mut fdc = online(now);
    open(&mut fdc, now);

    let err = fdc
        .handle(
            FdcInput::FromObserver(readback(
                TargetNumber::new("ZZ9999").unwrap(),
                ReadbackSubject::RequestForFire,
            )),
            now,
        )
        .unwrap_err();
    assert_eq!(
        err.reason,
        ViolationReason::TargetNumberMismatch {
            expected: "AN2001".to_string(),
            found: "ZZ9999".to_string()
        }
    );
    assert!(!fdc.request_confirmed());
}

#[test]
fn test_mto_readback_must_match() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = open(&mut fdc, now);
    from_observer(&mut fdc, readback(target_number, ReadbackSubject::RequestForFire), now);
    let out = fdc.handle(FdcInput::ApproveFire, now).unwrap();
    let FoFdcMessage::MessageToObserver(mto) = &out.to_observer[0] else {
        panic!("expected a message to observer");
    };

    let mut garbled = mto.clone();
    garbled.rounds = 6;
    let err = fdc
        .handle(
            FdcInput::FromObserver(FoFdcMessage::MessageToObserverReadback(garbled)),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::ReadbackMismatch);
}

#[test]
fn test_messages_only_the_fdc_sends_are_rejected() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = open(&mut fdc, now);

    let err = fdc
        .handle(
            FdcInput::FromObserver(FoFdcMessage::Shot(Shot { target_number })),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::OutboundOnly);

    let err = fdc
        .handle(FdcInput::FromGun(FdcGunMessage::CheckFire), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::OutboundOnly);
}

#[test]
fn test_gun_cantco_aborts_mission() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = open(&mut fdc, now);
    from_observer(&mut fdc, readback(target_number, ReadbackSubject::RequestForFire), now);
    fdc.handle(FdcInput::ApproveFire, now).unwrap();

    let out = from_gun(
        &mut fdc,
        FdcGunMessage::ComplianceResponse {
            compliance: Compliance::CantCo,
        },
        now,
    );
    assert_eq!(abort_cause(&out), Some(AbortCause::GunCannotComply));
    assert!(out.events.contains(&MissionEvent::Aborted {
        target_number,
        cause: AbortCause::GunCannotComply
    }));
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
    assert!(!fdc.is_gun_busy());

    // A late fire report for the aborted mission is refused
    let err = fdc
        .handle(FdcInput::FromGun(report(target_number, ShotCall::Shot)), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::MissionClosed("AN2001".to_string()));
}

#[test]
fn test_gun_wontco_aborts_mission() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = open(&mut fdc, now);
    from_observer(&mut fdc, readback(target_number, ReadbackSubject::RequestForFire), now);
    fdc.handle(FdcInput::ApproveFire, now).unwrap();

    let out = from_gun(
        &mut fdc,
        FdcGunMessage::ComplianceResponse {
            compliance: Compliance::WontCo,
        },
        now,
    );
    assert_eq!(abort_cause(&out), Some(AbortCause::GunWillNotComply));
}

#[test]
fn test_check_fire_stops_gun_and_aborts_mission() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = engaged(&mut fdc, now);

    let out = fdc.handle(FdcInput::CheckFire, now).unwrap();
    assert_eq!(out.to_gun, vec![FdcGunMessage::CheckFire]);
    assert_eq!(abort_cause(&out), Some(AbortCause::CheckFire));
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
    assert!(fdc.is_gun_busy());

    from_gun(
        &mut fdc,
        FdcGunMessage::ComplianceResponse {
            compliance: Compliance::HaveCo,
        },
        now,
    );
    assert!(!fdc.is_gun_busy());
    assert_eq!(
        fdc.mission_log().outcome_of(target_number),
        Some(MissionOutcome::Aborted(AbortCause::CheckFire))
    );
}

#[test]
fn test_check_fire_outside_mission_is_rejected() {
    let now = Instant::now();
    let mut fdc = online(now);
    let err = fdc.handle(FdcInput::CheckFire, now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
}

#[test]
fn test_gun_status_request_is_paired_with_its_reply() {
    let now = Instant::now();
    let mut fdc = online(now);

    let out = fdc.handle(FdcInput::RequestGunStatus, now).unwrap();
    assert_eq!(out.to_gun, vec![FdcGunMessage::StatusRequest]);

    let err = fdc.handle(FdcInput::RequestGunStatus, now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::GunBusy("STATUS_REQUEST"));

    // A compliance answer does not answer a status request
    let err = fdc
        .handle(
            FdcInput::FromGun(FdcGunMessage::ComplianceResponse {
                compliance: Compliance::WillCo,
            }),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);

    let reply = StatusReply {
        status: Status::Operational,
        rounds: [(Ammunition::HighExplosive, 40)].into_iter().collect(),
    };
    let out = from_gun(&mut fdc, FdcGunMessage::StatusReply(reply.clone()), now);
    assert_eq!(out.events, vec![MissionEvent::GunStatus(reply.clone())]);
    assert_eq!(fdc.gun_status(), Some(&reply));

    let err = fdc
        .handle(FdcInput::FromGun(FdcGunMessage::StatusReply(reply)), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::NoOutstandingRequest);
}

#[test]
fn test_approval_waits_for_gun_to_answer_status() {
    let now = Instant::now();
    let mut fdc = online(now);
    open(&mut fdc, now);
    fdc.handle(FdcInput::RequestGunStatus, now).unwrap();

    let err = fdc.handle(FdcInput::ApproveFire, now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::GunBusy("STATUS_REQUEST"));
}

#[test]
fn test_observer_link_loss_discards_mission() {
    let now = Instant::now();
    let mut fdc = online(now);
    let first = engaged(&mut fdc, now);

    let out = fdc.handle(FdcInput::LinkLost(Peer::Observer), now).unwrap();
    assert_eq!(fdc.state(), FdcState::Offline);
    assert_eq!(out.to_gun, vec![FdcGunMessage::CheckFire]);
    assert!(out.events.contains(&MissionEvent::Discarded { target_number: first }));
    assert_eq!(fdc.mission_log().outcome_of(first), Some(MissionOutcome::Discarded));

    // After reconnecting the next mission gets a fresh number
    fdc.handle(FdcInput::LinkUp(Peer::Observer), now).unwrap();
    from_gun(
        &mut fdc,
        FdcGunMessage::ComplianceResponse {
            compliance: Compliance::HaveCo,
        },
        now,
    );
    let second = open(&mut fdc, now);
    assert_ne!(first, second);
    assert_eq!(second.as_str(), "AN2002");
}

#[test]
fn test_link_loss_from_every_state_goes_offline() {
    let now = Instant::now();
    let setups: [fn(&mut FdcStateMachine, Instant); 4] = [
        |_, _| {},
        |fdc, now| {
            open(fdc, now);
        },
        |fdc, now| {
            engaged(fdc, now);
        },
        |fdc, now| {
            let target_number = engaged(fdc, now);
            for call in [ShotCall::Shot, ShotCall::Splash, ShotCall::RoundsComplete] {
                from_gun(fdc, report(target_number, call), now);
            }
        },
    ];
    for setup in setups {
        let mut fdc = online(now);
        setup(&mut fdc, now);
        fdc.handle(FdcInput::LinkLost(Peer::Observer), now).unwrap();
        assert_eq!(fdc.state(), FdcState::Offline);
        assert_eq!(fdc.active_target(), None);
    }
}

#[test]
fn test_gun_link_loss_aborts_mission_in_progress() {
    let now = Instant::now();
    let mut fdc = online(now);
    engaged(&mut fdc, now);

    let out = fdc.handle(FdcInput::LinkLost(Peer::Gun), now).unwrap();
    assert_eq!(abort_cause(&out), Some(AbortCause::GunCannotComply));
    assert!(out.events.contains(&MissionEvent::LinkLost { peer: Peer::Gun }));
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
    assert!(!fdc.is_gun_connected());
}

#[test]
fn test_fire_approval_timeout() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = open(&mut fdc, now);
    let deadline = fdc.next_deadline().unwrap();
    assert_eq!(deadline, now + Duration::from_millis(60_000));

    assert!(fdc.expire(now + Duration::from_secs(59)).is_empty());

    let out = fdc.expire(deadline);
    assert_eq!(abort_cause(&out), Some(AbortCause::Timeout));
    assert!(out.events.contains(&MissionEvent::TimedOut {
        target_number: Some(target_number),
        stage: MissionStage::FireApproval
    }));
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
    assert_eq!(fdc.next_deadline(), None);
}

#[test]
fn test_rounds_complete_timeout_stands_gun_down() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = engaged(&mut fdc, now);

    let out = fdc.expire(now + Duration::from_secs(600));
    assert_eq!(out.to_gun, vec![FdcGunMessage::CheckFire]);
    assert_eq!(
        fdc.mission_log().outcome_of(target_number),
        Some(MissionOutcome::TimedOut(MissionStage::RoundsComplete))
    );
}

#[test]
fn test_zero_timeout_disables_deadline() {
    let now = Instant::now();
    let mut config = FdcConfig::default();
    config.timeouts.fire_approval_ms = 0;
    let mut fdc = FdcStateMachine::new(&config).unwrap();
    fdc.handle(FdcInput::LinkUp(Peer::Observer), now).unwrap();
    open(&mut fdc, now);

    assert_eq!(fdc.next_deadline(), None);
    assert!(fdc.expire(now + Duration::from_secs(86_400)).is_empty());
}

fn approved(fdc: &mut FdcStateMachine, now: Instant) -> TargetNumber {
    let target_number = open(fdc, now);
    from_observer(fdc, readback(target_number, ReadbackSubject::RequestForFire), now);
    fdc.handle(FdcInput::ApproveFire, now).unwrap();
    target_number
}

fn compliance(compliance: Compliance) -> FdcGunMessage {
    FdcGunMessage::ComplianceResponse { compliance }
}

#[test]
fn test_compliance_timeout_checks_fire_and_absorbs_late_willco() {
    let now = Instant::now();
    let mut fdc = online(now);
    approved(&mut fdc, now);

    // Compliance deadline passes before the gun answers
    let later = now + Duration::from_secs(30);
    let out = fdc.expire(later);
    assert_eq!(abort_cause(&out), Some(AbortCause::Timeout));
    assert_eq!(out.to_gun, vec![FdcGunMessage::CheckFire]);
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));

    // The fire command's answer comes first, then the check fire's
    let out = from_gun(&mut fdc, compliance(Compliance::WillCo), later);
    assert!(out.is_empty());
    assert!(fdc.is_gun_busy());
    from_gun(&mut fdc, compliance(Compliance::HaveCo), later);
    assert!(!fdc.is_gun_busy());

    approved(&mut fdc, later);
    assert_eq!(
        fdc.state(),
        FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingCompliance))
    );
}

#[test]
fn test_lost_compliance_does_not_block_next_mission() {
    let now = Instant::now();
    let mut fdc = online(now);
    let first = approved(&mut fdc, now);

    // Neither the compliance nor the HAVE CO for the check fire ever arrive
    let out = fdc.expire(now + Duration::from_secs(30));
    assert_eq!(abort_cause(&out), Some(AbortCause::Timeout));
    assert_eq!(
        fdc.mission_log().outcome_of(first),
        Some(MissionOutcome::TimedOut(MissionStage::GunCompliance))
    );

    let later = now + Duration::from_secs(3_600);
    let second = open(&mut fdc, later);
    from_observer(&mut fdc, readback(second, ReadbackSubject::RequestForFire), later);
    let out = fdc.handle(FdcInput::ApproveFire, later).unwrap();
    assert!(matches!(&out.to_gun[..], [FdcGunMessage::FireCommand(command)] if command.target_number == second));
}

#[test]
fn test_unanswered_check_fire_expires() {
    let now = Instant::now();
    let mut fdc = online(now);
    approved(&mut fdc, now);

    let timed_out_at = now + Duration::from_secs(10);
    fdc.expire(timed_out_at);
    assert!(fdc.is_gun_busy());
    assert_eq!(fdc.next_deadline(), Some(timed_out_at + Duration::from_secs(10)));

    fdc.expire(timed_out_at + Duration::from_secs(10));
    assert!(!fdc.is_gun_busy());
    assert_eq!(fdc.next_deadline(), None);
}

#[test]
fn test_unanswered_status_request_expires() {
    let now = Instant::now();
    let mut fdc = online(now);
    fdc.handle(FdcInput::RequestGunStatus, now).unwrap();
    assert_eq!(fdc.next_deadline(), Some(now + Duration::from_secs(10)));

    assert!(fdc.expire(now + Duration::from_secs(9)).is_empty());
    assert!(fdc.is_gun_busy());

    fdc.expire(now + Duration::from_secs(10));
    assert!(!fdc.is_gun_busy());
    assert_eq!(fdc.next_deadline(), None);

    let out = fdc
        .handle(FdcInput::RequestGunStatus, now + Duration::from_secs(11))
        .unwrap();
    assert_eq!(out.to_gun, vec![FdcGunMessage::StatusRequest]);
}

#[test]
fn test_stale_status_request_does_not_block_approval() {
    let now = Instant::now();
    let mut fdc = online(now);
    fdc.handle(FdcInput::RequestGunStatus, now).unwrap();

    // Approval an hour on succeeds even before the deadline is processed
    let later = now + Duration::from_secs(3_600);
    let target_number = approved(&mut fdc, later);
    assert_eq!(
        fdc.state(),
        FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingCompliance))
    );
    assert_eq!(fdc.active_target(), Some(target_number));
}

#[test]
fn test_check_fire_while_awaiting_compliance() {
    let now = Instant::now();
    let mut fdc = online(now);
    let target_number = approved(&mut fdc, now);

    let out = fdc.handle(FdcInput::CheckFire, now).unwrap();
    assert_eq!(out.to_gun, vec![FdcGunMessage::CheckFire]);
    assert_eq!(abort_cause(&out), Some(AbortCause::CheckFire));
    assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));

    // The refusal answers the overtaken fire command, not the check fire
    let out = from_gun(&mut fdc, compliance(Compliance::CantCo), now);
    assert!(out.is_empty());
    assert!(fdc.is_gun_busy());
    from_gun(&mut fdc, compliance(Compliance::HaveCo), now);
    assert!(!fdc.is_gun_busy());
    assert_eq!(
        fdc.mission_log().outcome_of(target_number),
        Some(MissionOutcome::Aborted(AbortCause::CheckFire))
    );
}

#[test]
fn test_check_fire_waits_for_status_reply() {
    let now = Instant::now();
    let mut fdc = online(now);
    engaged(&mut fdc, now);
    fdc.handle(FdcInput::RequestGunStatus, now).unwrap();

    let err = fdc.handle(FdcInput::CheckFire, now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::GunBusy("STATUS_REQUEST"));
    assert_eq!(
        fdc.state(),
        FdcState::Online(FdcMission::MissionInProgress(FirePhase::AwaitingShot))
    );
}
