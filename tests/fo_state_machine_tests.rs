use std::time::Duration;

use fire_support_sim::config::ObserverConfig;
use fire_support_sim::error::ViolationReason;
use fire_support_sim::fo_fdc::*;
use fire_support_sim::mission::{MissionEvent, MissionOutcome, MissionStage, Peer};
use fire_support_sim::sim::fo::{Assessment, FoInput, FoMission, FoOutput, FoState, FoStateMachine};
use fire_support_sim::types::{Ammunition, Callsign, TargetNumber};
use tokio::time::Instant;

fn target() -> TargetNumber {
    TargetNumber::new("AN2001").unwrap()
}

fn connected(now: Instant) -> (FoStateMachine, RequestForFire) {
    let config = ObserverConfig::default();
    let request = config.build_request().unwrap();
    let mut fo = FoStateMachine::new(&config).unwrap();
    fo.handle(FoInput::LinkUp, now).unwrap();
    (fo, request)
}

fn from_fdc(fo: &mut FoStateMachine, message: FoFdcMessage, now: Instant) -> FoOutput {
    fo.handle(FoInput::FromFdc(message), now).unwrap()
}

fn warn_order(request: &RequestForFire) -> FoFdcMessage {
    FoFdcMessage::WarnOrder(WarnOrder {
        fdc: request.fdc,
        observer: request.observer,
        target_number: target(),
        request: request.clone(),
    })
}

fn message_to_observer(request: &RequestForFire) -> MessageToObserver {
    MessageToObserver {
        fdc: request.fdc,
        observer: request.observer,
        target_number: target(),
        ammunition: Ammunition::HighExplosive,
        method_of_fire: MethodOfFire::WhenReady,
        rounds: 4,
        time_to_first_round_s: 30,
    }
}

/// Calls for fire and takes the warn order.
fn opened(now: Instant) -> (FoStateMachine, RequestForFire) {
    let (mut fo, request) = connected(now);
    fo.handle(FoInput::RequestFire(request.clone()), now).unwrap();
    from_fdc(&mut fo, warn_order(&request), now);
    (fo, request)
}

/// Opens a mission and receives the message to observer.
fn tracking(now: Instant) -> (FoStateMachine, RequestForFire) {
    let (mut fo, request) = opened(now);
    from_fdc(
        &mut fo,
        FoFdcMessage::MessageToObserver(message_to_observer(&request)),
        now,
    );
    (fo, request)
}

#[test]
fn test_request_fire_requires_connection() {
    let now = Instant::now();
    let config = ObserverConfig::default();
    let mut fo = FoStateMachine::new(&config).unwrap();
    assert_eq!(fo.state(), FoState::Disconnected);

    let err = fo
        .handle(FoInput::RequestFire(config.build_request().unwrap()), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::NotConnected);
    assert_eq!(err.state, "DISCONNECTED");
}

#[test]
fn test_request_fire_sends_request() {
    let now = Instant::now();
    let (mut fo, request) = connected(now);

    let out = fo.handle(FoInput::RequestFire(request.clone()), now).unwrap();
    assert_eq!(out.to_fdc, vec![FoFdcMessage::RequestForFire(request.clone())]);
    assert_eq!(fo.state(), FoState::Connected(FoMission::AwaitingWarnOrder));
    assert_eq!(fo.active_target(), None);

    let err = fo.handle(FoInput::RequestFire(request), now).unwrap_err();
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
}

#[test]
fn test_warn_order_must_echo_request() {
    let now = Instant::now();
    let (mut fo, request) = connected(now);
    fo.handle(FoInput::RequestFire(request.clone()), now).unwrap();

    let mut other = request.clone();
    other.danger_close = true;
    let err = fo
        .handle(FoInput::FromFdc(warn_order(&other)), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::ReadbackMismatch);
    assert_eq!(fo.state(), FoState::Connected(FoMission::AwaitingWarnOrder));

    let out = from_fdc(&mut fo, warn_order(&request), now);
    assert_eq!(
        out.to_fdc,
        vec![FoFdcMessage::SolidReadback(SolidReadback {
            target_number: target(),
            subject: ReadbackSubject::RequestForFire,
        })]
    );
    assert_eq!(out.events, vec![MissionEvent::Opened { target_number: target() }]);
    assert_eq!(fo.state(), FoState::Connected(FoMission::AwaitingFireMessage));
    assert_eq!(fo.active_target(), Some(target()));
}

#[test]
fn test_message_to_observer_while_idle_is_rejected() {
    let now = Instant::now();
    let (mut fo, request) = connected(now);

    let err = fo
        .handle(
            FoInput::FromFdc(FoFdcMessage::MessageToObserver(message_to_observer(&request))),
            now,
        )
        .unwrap_err();
    assert_eq!(err.message, "MESSAGE_TO_OBSERVER");
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
    assert_eq!(fo.state(), FoState::Connected(FoMission::Idle));
}

#[test]
fn test_message_to_observer_is_read_back() {
    let now = Instant::now();
    let (mut fo, request) = opened(now);
    let mto = message_to_observer(&request);

    let out = from_fdc(&mut fo, FoFdcMessage::MessageToObserver(mto.clone()), now);
    assert_eq!(out.to_fdc, vec![FoFdcMessage::MessageToObserverReadback(mto.clone())]);
    assert_eq!(fo.state(), FoState::Connected(FoMission::TrackingShotCycle));
    assert_eq!(fo.message_to_observer(), Some(&mto));
    assert!(!fo.fire_message_confirmed());

    from_fdc(
        &mut fo,
        FoFdcMessage::SolidReadback(SolidReadback {
            target_number: target(),
            subject: ReadbackSubject::MessageToObserver,
        }),
        now,
    );
    assert!(fo.fire_message_confirmed());
}

#[test]
fn test_full_mission_cycle() {
    let now = Instant::now();
    let (mut fo, _) = tracking(now);

    for (message, subject) in [
        (FoFdcMessage::Shot(Shot { target_number: target() }), ReadbackSubject::Shot),
        (FoFdcMessage::Splash(Splash { target_number: target() }), ReadbackSubject::Splash),
        (
            FoFdcMessage::RoundsComplete(RoundsComplete { target_number: target() }),
            ReadbackSubject::RoundsComplete,
        ),
    ] {
        let out = from_fdc(&mut fo, message, now);
        assert_eq!(
            out.to_fdc,
            vec![FoFdcMessage::SolidReadback(SolidReadback {
                target_number: target(),
                subject,
            })]
        );
    }
    assert_eq!(fo.state(), FoState::Connected(FoMission::AwaitingAssessmentAck));
    assert_eq!(fo.next_deadline(), None);

    let out = fo
        .handle(
            FoInput::ReportAssessment(Assessment {
                effect: TargetEffect::Neutralized,
                remarks: "vehicles burning".to_string(),
                reengage: true,
            }),
            now,
        )
        .unwrap();
    assert_eq!(
        out.to_fdc,
        vec![FoFdcMessage::BattleDamageAssessment(BattleDamageAssessment {
            target_number: target(),
            effect: TargetEffect::Neutralized,
            remarks: "vehicles burning".to_string(),
            reengage: true,
        })]
    );
    assert_eq!(fo.state(), FoState::Connected(FoMission::Idle));
    assert_eq!(
        fo.mission_log().outcome_of(target()),
        Some(MissionOutcome::Assessed {
            effect: TargetEffect::Neutralized,
            reengage: true
        })
    );

    // The FDC's acknowledgement arrives after the mission closed
    let out = from_fdc(
        &mut fo,
        FoFdcMessage::SolidReadback(SolidReadback {
            target_number: target(),
            subject: ReadbackSubject::BattleDamageAssessment,
        }),
        now,
    );
    assert_eq!(
        out.events,
        vec![MissionEvent::ReadbackConfirmed {
            target_number: target(),
            subject: ReadbackSubject::BattleDamageAssessment
        }]
    );

    // The assessment closed the mission for good
    for message in [
        FoFdcMessage::Shot(Shot { target_number: target() }),
        FoFdcMessage::RoundsComplete(RoundsComplete { target_number: target() }),
    ] {
        let err = fo.handle(FoInput::FromFdc(message), now).unwrap_err();
        assert_eq!(err.reason, ViolationReason::MissionClosed("AN2001".to_string()));
        assert_eq!(fo.state(), FoState::Connected(FoMission::Idle));
    }
    assert_eq!(fo.active_target(), None);
}

#[test]
fn test_shot_calls_out_of_order_are_rejected() {
    let now = Instant::now();
    let (mut fo, _) = tracking(now);

    let err = fo
        .handle(
            FoInput::FromFdc(FoFdcMessage::Splash(Splash { target_number: target() })),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::OutOfOrder { expected: "SHOT" });
    assert_eq!(err.message, "SPLASH");
}

#[test]
fn test_assessment_only_after_rounds_complete() {
    let now = Instant::now();
    let (mut fo, _) = tracking(now);

    let err = fo
        .handle(FoInput::ReportAssessment(Assessment::default()), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
    assert_eq!(fo.state(), FoState::Connected(FoMission::TrackingShotCycle));
}

#[test]
fn test_unconfirmed_assessment_ack_is_rejected() {
    let now = Instant::now();
    let (mut fo, _) = connected(now);

    let err = fo
        .handle(
            FoInput::FromFdc(FoFdcMessage::SolidReadback(SolidReadback {
                target_number: target(),
                subject: ReadbackSubject::BattleDamageAssessment,
            })),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::UnexpectedMessage);
}

#[test]
fn test_abort_closes_mission() {
    let now = Instant::now();
    let (mut fo, _) = tracking(now);

    let out = from_fdc(
        &mut fo,
        FoFdcMessage::MissionAbort(MissionAbort {
            target_number: target(),
            cause: AbortCause::GunCannotComply,
        }),
        now,
    );
    assert_eq!(
        out.events,
        vec![MissionEvent::Aborted {
            target_number: target(),
            cause: AbortCause::GunCannotComply
        }]
    );
    assert_eq!(fo.state(), FoState::Connected(FoMission::Idle));
    assert_eq!(
        fo.mission_log().outcome_of(target()),
        Some(MissionOutcome::Aborted(AbortCause::GunCannotComply))
    );

    // Anything else for that target is stale
    let err = fo
        .handle(
            FoInput::FromFdc(FoFdcMessage::Shot(Shot { target_number: target() })),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::MissionClosed("AN2001".to_string()));
}

#[test]
fn test_messages_for_another_target_are_rejected() {
    let now = Instant::now();
    let (mut fo, _) = tracking(now);

    let err = fo
        .handle(
            FoInput::FromFdc(FoFdcMessage::Shot(Shot {
                target_number: TargetNumber::new("AN2002").unwrap(),
            })),
            now,
        )
        .unwrap_err();
    assert_eq!(
        err.reason,
        ViolationReason::TargetNumberMismatch {
            expected: "AN2001".to_string(),
            found: "AN2002".to_string()
        }
    );
}

#[test]
fn test_messages_only_the_observer_sends_are_rejected() {
    let now = Instant::now();
    let (mut fo, request) = connected(now);

    let err = fo
        .handle(FoInput::FromFdc(FoFdcMessage::RequestForFire(request)), now)
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::OutboundOnly);
}

#[test]
fn test_warn_order_timeout_without_target_number() {
    let now = Instant::now();
    let (mut fo, request) = connected(now);
    fo.handle(FoInput::RequestFire(request), now).unwrap();
    assert_eq!(fo.next_deadline(), Some(now + Duration::from_millis(10_000)));

    assert!(fo.expire(now + Duration::from_millis(9_999)).is_empty());
    let out = fo.expire(now + Duration::from_millis(10_000));
    assert_eq!(
        out.events,
        vec![MissionEvent::TimedOut {
            target_number: None,
            stage: MissionStage::WarnOrder
        }]
    );
    assert_eq!(fo.state(), FoState::Connected(FoMission::Idle));
    assert!(fo.mission_log().history().is_empty());
}

#[test]
fn test_fire_message_timeout_is_logged() {
    let now = Instant::now();
    let (mut fo, _) = opened(now);

    let out = fo.expire(now + Duration::from_secs(90));
    assert!(out.events.contains(&MissionEvent::TimedOut {
        target_number: Some(target()),
        stage: MissionStage::FireMessage
    }));
    assert_eq!(
        fo.mission_log().outcome_of(target()),
        Some(MissionOutcome::TimedOut(MissionStage::FireMessage))
    );
}

#[test]
fn test_link_loss_discards_mission() {
    let now = Instant::now();
    let (mut fo, _) = tracking(now);

    let out = fo.handle(FoInput::LinkLost, now).unwrap();
    assert_eq!(fo.state(), FoState::Disconnected);
    assert_eq!(
        out.events,
        vec![
            MissionEvent::Discarded { target_number: target() },
            MissionEvent::LinkLost { peer: Peer::Fdc },
        ]
    );
    assert_eq!(fo.active_target(), None);

    let err = fo
        .handle(
            FoInput::FromFdc(FoFdcMessage::Shot(Shot { target_number: target() })),
            now,
        )
        .unwrap_err();
    assert_eq!(err.reason, ViolationReason::NotConnected);
}

#[test]
fn test_link_loss_before_warn_order_logs_nothing() {
    let now = Instant::now();
    let (mut fo, request) = connected(now);
    fo.handle(FoInput::RequestFire(request), now).unwrap();

    let out = fo.handle(FoInput::LinkLost, now).unwrap();
    assert_eq!(out.events, vec![MissionEvent::LinkLost { peer: Peer::Fdc }]);
    assert!(fo.mission_log().history().is_empty());

    // Losing a link that is already down changes nothing
    assert!(fo.handle(FoInput::LinkLost, now).unwrap().is_empty());
}

#[test]
fn test_state_names() {
    assert_eq!(
        FoState::Connected(FoMission::TrackingShotCycle).to_string(),
        "CONNECTED/TRACKING_SHOT_CYCLE"
    );
    assert_eq!(FoState::Disconnected.to_string(), "DISCONNECTED");
    assert_eq!(Callsign::new("FO-1").unwrap().as_str(), "FO-1");
}
