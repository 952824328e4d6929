//! The FDC actor: one state machine multiplexing observer, gun and operator.

mod state_machine;

pub use state_machine::{FdcInput, FdcMission, FdcOutput, FdcState, FdcStateMachine, FirePhase};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::FdcConfig;
use crate::error::{ConfigError, ProtocolViolation, SimError};
use crate::fdc_gun::FdcGunMessage;
use crate::fo_fdc::FoFdcMessage;
use crate::link::LinkEvent;
use crate::mission::{MissionEvent, Peer};
use crate::sim::{dispatch, publish_events, sleep_until_deadline, EVENT_BROADCAST_CAPACITY};

/// Operator actions on the FDC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcCommand {
    ApproveFire,
    CheckFire,
    RequestGunStatus,
}

impl From<FdcCommand> for FdcInput {
    fn from(command: FdcCommand) -> Self {
        match command {
            FdcCommand::ApproveFire => FdcInput::ApproveFire,
            FdcCommand::CheckFire => FdcInput::CheckFire,
            FdcCommand::RequestGunStatus => FdcInput::RequestGunStatus,
        }
    }
}

/// Channels the FDC actor reads from and writes to.
#[derive(Debug)]
pub struct FdcConduits {
    pub observer_rx: mpsc::Receiver<LinkEvent<FoFdcMessage>>,
    pub observer_tx: mpsc::Sender<FoFdcMessage>,
    pub gun_rx: mpsc::Receiver<LinkEvent<FdcGunMessage>>,
    pub gun_tx: mpsc::Sender<FdcGunMessage>,
    pub control_rx: mpsc::Receiver<FdcCommand>,
}

/// Maps a link event onto the machine's input alphabet.
fn link_input<M>(peer: Peer, event: LinkEvent<M>, wrap: fn(M) -> FdcInput) -> FdcInput {
    match event {
        LinkEvent::Up => FdcInput::LinkUp(peer),
        LinkEvent::Message(message) => wrap(message),
        LinkEvent::Down => FdcInput::LinkLost(peer),
    }
}

enum Wake {
    Input(FdcInput),
    Deadline,
}

#[derive(Debug)]
pub struct FdcSimulator {
    machine: FdcStateMachine,
    auto_approve: bool,
    state_tx: watch::Sender<FdcState>,
    events_tx: broadcast::Sender<MissionEvent>,
}

impl FdcSimulator {
    /// # Errors
    ///
    /// Fails when the configuration does not validate.
    pub fn new(config: &FdcConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_machine(FdcStateMachine::new(config)?, config.auto_approve))
    }

    pub fn with_machine(machine: FdcStateMachine, auto_approve: bool) -> Self {
        let (state_tx, _) = watch::channel(machine.state());
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Self {
            machine,
            auto_approve,
            state_tx,
            events_tx,
        }
    }

    pub fn state(&self) -> FdcState {
        self.machine.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FdcState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MissionEvent> {
        self.events_tx.subscribe()
    }

    pub fn machine(&self) -> &FdcStateMachine {
        &self.machine
    }

    /// Applies one input now.
    ///
    /// # Errors
    ///
    /// Returns the violation when the machine rejects `input`.
    pub fn submit(&mut self, input: FdcInput) -> Result<FdcOutput, ProtocolViolation> {
        self.submit_at(input, Instant::now())
    }

    /// Applies one input as of `now`, approving fire on the way if configured to.
    ///
    /// # Errors
    ///
    /// Returns the violation when the machine rejects `input`.
    pub fn submit_at(&mut self, input: FdcInput, now: Instant) -> Result<FdcOutput, ProtocolViolation> {
        let span = info_span!("fdc", input = input.kind());
        let _enter = span.enter();

        let mut output = self.machine.handle(input, now)?;
        if let Some(approval) = self.auto_approval(now) {
            output.merge(approval);
        }
        self.publish(&output);
        Ok(output)
    }

    /// Times out the active mission or gun request whose deadline has passed.
    /// A gun freed this way may take a mission still waiting for approval.
    pub fn expire(&mut self, now: Instant) -> FdcOutput {
        let mut output = self.machine.expire(now);
        if let Some(approval) = self.auto_approval(now) {
            output.merge(approval);
        }
        self.publish(&output);
        output
    }

    /// Approves fire once the observer has confirmed the warn order and the
    /// gun can take the command.
    fn auto_approval(&mut self, now: Instant) -> Option<FdcOutput> {
        let ready = self.auto_approve
            && self.machine.state() == FdcState::Online(FdcMission::AwaitingFireApproval)
            && self.machine.request_confirmed()
            && self.machine.is_gun_connected()
            && !self.machine.is_gun_busy();
        if !ready {
            return None;
        }
        match self.machine.handle(FdcInput::ApproveFire, now) {
            Ok(output) => {
                debug!("fire approved automatically");
                Some(output)
            }
            Err(violation) => {
                warn!(%violation, "automatic approval rejected");
                None
            }
        }
    }

    fn publish(&self, output: &FdcOutput) {
        self.state_tx.send_replace(self.machine.state());
        publish_events(&self.events_tx, output.events.clone());
    }

    /// Runs the actor until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Fails when a link's outbound queue has been dropped.
    pub async fn run(mut self, conduits: FdcConduits, cancel: CancellationToken) -> Result<(), SimError> {
        let FdcConduits {
            mut observer_rx,
            observer_tx,
            mut gun_rx,
            gun_tx,
            mut control_rx,
        } = conduits;
        info!(callsign = %self.machine.callsign(), "🎯 fdc running");

        loop {
            let deadline = self.machine.next_deadline();
            let wake = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = observer_rx.recv() => {
                    Wake::Input(link_input(Peer::Observer, event, FdcInput::FromObserver))
                }
                Some(event) = gun_rx.recv() => Wake::Input(link_input(Peer::Gun, event, FdcInput::FromGun)),
                Some(command) = control_rx.recv() => Wake::Input(command.into()),
                _ = sleep_until_deadline(deadline) => Wake::Deadline,
            };

            let output = match wake {
                Wake::Input(input) => match self.submit(input) {
                    Ok(output) => output,
                    Err(violation) => {
                        warn!(%violation, "fdc rejected input");
                        continue;
                    }
                },
                Wake::Deadline => self.expire(Instant::now()),
            };
            dispatch("observer", &observer_tx, output.to_observer)?;
            dispatch("gun", &gun_tx, output.to_gun)?;
        }

        info!(missions = self.machine.mission_log().history().len(), "fdc stopped");
        Ok(())
    }
}
