//! The gun actor: answers the FDC and plays out each volley on a schedule.

pub mod scheduler;

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::GunConfig;
use crate::error::{ConfigError, ProtocolViolation, SimError, ViolationReason};
use crate::fdc_gun::{Compliance, FdcGunMessage, FireCommand, Status, StatusReply};
use crate::fo_fdc::ShotCall;
use crate::link::LinkEvent;
use crate::sim::{dispatch, sleep_until_deadline};
use crate::types::{Ammunition, Callsign, TargetNumber};
use scheduler::{ReportScheduler, ScheduledReport};

/// Channels the gun actor reads from and writes to.
#[derive(Debug)]
pub struct GunConduits {
    pub fdc_rx: mpsc::Receiver<LinkEvent<FdcGunMessage>>,
    pub fdc_tx: mpsc::Sender<FdcGunMessage>,
}

#[derive(Debug)]
pub struct GunSimulator {
    callsign: Callsign,
    status: Status,
    inventory: BTreeMap<Ammunition, u32>,
    shot_delay: Duration,
    splash_delay: Duration,
    rounds_complete_delay: Duration,
    scheduler: ReportScheduler,
    /// Mission the current volley belongs to
    firing: Option<TargetNumber>,
    connected: bool,
}

impl GunSimulator {
    /// # Errors
    ///
    /// Fails when the configuration does not validate.
    pub fn new(config: &GunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            callsign: Callsign::new(&config.callsign)?,
            status: config.status,
            inventory: config.inventory.clone(),
            shot_delay: Duration::from_millis(config.shot_delay_ms),
            splash_delay: Duration::from_millis(config.splash_delay_ms),
            rounds_complete_delay: Duration::from_millis(config.rounds_complete_delay_ms),
            scheduler: ReportScheduler::new(),
            firing: None,
            connected: false,
        })
    }

    pub fn callsign(&self) -> Callsign {
        self.callsign
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        info!(from = ?self.status, to = ?status, "gun status change");
        self.status = status;
    }

    pub fn rounds_on_hand(&self, ammunition: Ammunition) -> u32 {
        self.inventory.get(&ammunition).copied().unwrap_or(0)
    }

    pub fn firing(&self) -> Option<TargetNumber> {
        self.firing
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.scheduler.next_due()
    }

    pub fn scheduler(&self) -> &ReportScheduler {
        &self.scheduler
    }

    fn state_name(&self) -> &'static str {
        match (self.connected, self.firing) {
            (false, _) => "OFFLINE",
            (true, None) => "READY",
            (true, Some(_)) => "FIRING",
        }
    }

    pub fn link_up(&mut self) {
        info!(callsign = %self.callsign, "🔗 fdc connected");
        self.connected = true;
    }

    /// Ceases fire; a volley nobody is watching is not worth finishing.
    pub fn link_lost(&mut self) {
        let cancelled = self.scheduler.cancel_all();
        if let Some(target_number) = self.firing.take() {
            warn!(%target_number, cancelled, "fdc link lost mid volley");
        }
        self.connected = false;
    }

    /// Answers one message from the FDC.
    ///
    /// # Errors
    ///
    /// Rejects messages only a gun sends, and anything while disconnected.
    pub fn handle(&mut self, message: FdcGunMessage, now: Instant) -> Result<Vec<FdcGunMessage>, ProtocolViolation> {
        let kind = message.kind();
        let span = info_span!("gun", input = kind);
        let _enter = span.enter();

        if !self.connected {
            return Err(ProtocolViolation::new(kind, self.state_name(), ViolationReason::NotConnected));
        }
        debug!(?message, "from fdc");

        let reply = match message {
            FdcGunMessage::FireCommand(command) => self.fire(command, now),
            FdcGunMessage::CheckFire => {
                let cancelled = self.scheduler.cancel_all();
                if let Some(target_number) = self.firing.take() {
                    info!(%target_number, cancelled, "check fire");
                }
                FdcGunMessage::ComplianceResponse {
                    compliance: Compliance::HaveCo,
                }
            }
            FdcGunMessage::StatusRequest => FdcGunMessage::StatusReply(StatusReply {
                status: self.status,
                rounds: self.inventory.clone(),
            }),
            FdcGunMessage::ComplianceResponse { .. }
            | FdcGunMessage::FireReport { .. }
            | FdcGunMessage::StatusReply(_) => {
                return Err(ProtocolViolation::new(kind, self.state_name(), ViolationReason::OutboundOnly));
            }
        };
        Ok(vec![reply])
    }

    fn fire(&mut self, command: FireCommand, now: Instant) -> FdcGunMessage {
        let FireCommand {
            target_number,
            rounds,
            ammunition,
            aim,
        } = command;
        let compliance = if let Some(engaged) = self.firing {
            warn!(%target_number, %engaged, "already firing");
            Compliance::WontCo
        } else if !self.status.can_fire() {
            warn!(%target_number, status = ?self.status, "gun cannot fire");
            Compliance::CantCo
        } else if self.rounds_on_hand(ammunition) < rounds {
            warn!(
                %target_number,
                ?ammunition,
                requested = rounds,
                on_hand = self.rounds_on_hand(ammunition),
                "not enough rounds"
            );
            Compliance::CantCo
        } else {
            self.schedule_volley(target_number, now);
            if let Some(on_hand) = self.inventory.get_mut(&ammunition) {
                *on_hand -= rounds;
            }
            self.firing = Some(target_number);
            info!(
                %target_number,
                rounds,
                ?ammunition,
                range_m = aim.range_m,
                direction_mils = aim.direction_mils,
                "💥 firing"
            );
            Compliance::WillCo
        };
        FdcGunMessage::ComplianceResponse { compliance }
    }

    fn schedule_volley(&mut self, target_number: TargetNumber, now: Instant) {
        let shot = now + self.shot_delay;
        let splash = shot + self.splash_delay;
        let rounds_complete = splash + self.rounds_complete_delay;
        for (report, due) in [
            (ShotCall::Shot, shot),
            (ShotCall::Splash, splash),
            (ShotCall::RoundsComplete, rounds_complete),
        ] {
            if let Err(err) = self.scheduler.schedule(ScheduledReport {
                target_number,
                report,
                due,
            }) {
                warn!(%target_number, %report, err, "report not scheduled");
            }
        }
    }

    /// Fire reports whose time has come.
    pub fn due_reports(&mut self, now: Instant) -> Vec<FdcGunMessage> {
        let mut reports = Vec::new();
        for scheduled in self.scheduler.due_reports(now) {
            info!(target_number = %scheduled.target_number, report = %scheduled.report, "reporting");
            if scheduled.report == ShotCall::RoundsComplete && self.firing == Some(scheduled.target_number) {
                self.firing = None;
            }
            reports.push(FdcGunMessage::FireReport {
                target_number: scheduled.target_number,
                report: scheduled.report,
            });
        }
        reports
    }

    /// Runs the actor until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Fails when the link's outbound queue has been dropped.
    pub async fn run(mut self, conduits: GunConduits, cancel: CancellationToken) -> Result<(), SimError> {
        let GunConduits { mut fdc_rx, fdc_tx } = conduits;
        info!(callsign = %self.callsign, status = ?self.status, inventory = ?self.inventory, "🎯 gun running");

        loop {
            let due = self.next_due();
            let outbound = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = fdc_rx.recv() => match event {
                    LinkEvent::Up => {
                        self.link_up();
                        continue;
                    }
                    LinkEvent::Down => {
                        self.link_lost();
                        continue;
                    }
                    LinkEvent::Message(message) => match self.handle(message, Instant::now()) {
                        Ok(replies) => replies,
                        Err(violation) => {
                            warn!(%violation, "gun rejected message");
                            continue;
                        }
                    },
                },
                _ = sleep_until_deadline(due) => self.due_reports(Instant::now()),
            };
            dispatch("fdc", &fdc_tx, outbound)?;
        }

        info!(callsign = %self.callsign, "gun stopped");
        Ok(())
    }
}
