//! The FO actor: calls for fire, tracks the shot cycle, reports the effect.

mod state_machine;

pub use state_machine::{Assessment, FoInput, FoMission, FoOutput, FoState, FoStateMachine};

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::{millis, ObserverConfig};
use crate::error::{ConfigError, ProtocolViolation, SimError};
use crate::fo_fdc::{FoFdcMessage, RequestForFire};
use crate::link::LinkEvent;
use crate::mission::MissionEvent;
use crate::sim::{dispatch, publish_events, sleep_until_deadline, EVENT_BROADCAST_CAPACITY};

/// Operator actions on the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum FoCommand {
    /// Call for fire; `None` sends the configured default request
    RequestFire(Option<RequestForFire>),
    ReportAssessment(Assessment),
}

/// Channels the FO actor reads from and writes to.
#[derive(Debug)]
pub struct FoConduits {
    pub fdc_rx: mpsc::Receiver<LinkEvent<FoFdcMessage>>,
    pub fdc_tx: mpsc::Sender<FoFdcMessage>,
    pub control_rx: mpsc::Receiver<FoCommand>,
}

enum Wake {
    Input(FoInput),
    Command(FoCommand),
    Timer,
}

#[derive(Debug)]
pub struct FoSimulator {
    machine: FoStateMachine,
    default_request: RequestForFire,
    /// Delay before an automatic assessment, `None` when the operator reports
    auto_assess: Option<Duration>,
    assessment_due: Option<Instant>,
    state_tx: watch::Sender<FoState>,
    events_tx: broadcast::Sender<MissionEvent>,
}

impl FoSimulator {
    /// # Errors
    ///
    /// Fails when the configuration does not validate.
    pub fn new(config: &ObserverConfig) -> Result<Self, ConfigError> {
        let machine = FoStateMachine::new(config)?;
        let default_request = config.build_request()?;
        let auto_assess = config
            .auto_assess
            .then(|| millis(config.observation_ms).unwrap_or(Duration::ZERO));

        let (state_tx, _) = watch::channel(machine.state());
        let (events_tx, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Ok(Self {
            machine,
            default_request,
            auto_assess,
            assessment_due: None,
            state_tx,
            events_tx,
        })
    }

    pub fn state(&self) -> FoState {
        self.machine.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FoState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MissionEvent> {
        self.events_tx.subscribe()
    }

    pub fn machine(&self) -> &FoStateMachine {
        &self.machine
    }

    pub fn default_request(&self) -> &RequestForFire {
        &self.default_request
    }

    /// When the automatic assessment goes out, if one is pending.
    pub fn assessment_due(&self) -> Option<Instant> {
        self.assessment_due
    }

    /// # Errors
    ///
    /// Returns the violation when the machine rejects `input`.
    pub fn submit(&mut self, input: FoInput) -> Result<FoOutput, ProtocolViolation> {
        self.submit_at(input, Instant::now())
    }

    /// # Errors
    ///
    /// Returns the violation when the machine rejects `input`.
    pub fn submit_at(&mut self, input: FoInput, now: Instant) -> Result<FoOutput, ProtocolViolation> {
        let span = info_span!("fo", input = input.kind());
        let _enter = span.enter();

        let output = self.machine.handle(input, now)?;
        self.track_assessment(now);
        self.publish(&output);
        Ok(output)
    }

    /// # Errors
    ///
    /// Returns the violation when the observer cannot call for fire now.
    pub fn command(&mut self, command: FoCommand) -> Result<FoOutput, ProtocolViolation> {
        let input = match command {
            FoCommand::RequestFire(request) => {
                FoInput::RequestFire(request.unwrap_or_else(|| self.default_request.clone()))
            }
            FoCommand::ReportAssessment(assessment) => FoInput::ReportAssessment(assessment),
        };
        self.submit(input)
    }

    /// Earliest instant anything is due: a timeout or the automatic assessment.
    pub fn next_wake(&self) -> Option<Instant> {
        match (self.machine.next_deadline(), self.assessment_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Sends a due assessment, then times out the mission if its deadline passed.
    pub fn tick(&mut self, now: Instant) -> FoOutput {
        let mut output = FoOutput::default();
        if self.assessment_due.is_some_and(|due| due <= now) {
            self.assessment_due = None;
            match self.submit_at(FoInput::ReportAssessment(Assessment::default()), now) {
                Ok(assessment) => output.merge(assessment),
                Err(violation) => warn!(%violation, "automatic assessment rejected"),
            }
        }

        let expired = self.machine.expire(now);
        self.track_assessment(now);
        self.publish(&expired);
        output.merge(expired);
        output
    }

    /// Arms the automatic assessment on entering the assessment stage and
    /// disarms it on leaving.
    fn track_assessment(&mut self, now: Instant) {
        let awaiting = self.machine.state() == FoState::Connected(FoMission::AwaitingAssessmentAck);
        match (awaiting, self.assessment_due, self.auto_assess) {
            (true, None, Some(delay)) => {
                debug!(?delay, "observing effects before assessing");
                self.assessment_due = Some(now + delay);
            }
            (false, Some(_), _) => self.assessment_due = None,
            _ => {}
        }
    }

    fn publish(&self, output: &FoOutput) {
        self.state_tx.send_replace(self.machine.state());
        publish_events(&self.events_tx, output.events.clone());
    }

    /// Runs the actor until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Fails when the link's outbound queue has been dropped.
    pub async fn run(mut self, conduits: FoConduits, cancel: CancellationToken) -> Result<(), SimError> {
        let FoConduits {
            mut fdc_rx,
            fdc_tx,
            mut control_rx,
        } = conduits;
        info!(callsign = %self.machine.callsign(), "🔭 observer running");

        loop {
            let wake_at = self.next_wake();
            let wake = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = fdc_rx.recv() => Wake::Input(match event {
                    LinkEvent::Up => FoInput::LinkUp,
                    LinkEvent::Message(message) => FoInput::FromFdc(message),
                    LinkEvent::Down => FoInput::LinkLost,
                }),
                Some(command) = control_rx.recv() => Wake::Command(command),
                _ = sleep_until_deadline(wake_at) => Wake::Timer,
            };

            let result = match wake {
                Wake::Input(input) => self.submit(input),
                Wake::Command(command) => self.command(command),
                Wake::Timer => Ok(self.tick(Instant::now())),
            };
            let output = match result {
                Ok(output) => output,
                Err(violation) => {
                    warn!(%violation, "observer rejected input");
                    continue;
                }
            };
            dispatch("fdc", &fdc_tx, output.to_fdc)?;
        }

        info!(
            missions = self.machine.mission_log().history().len(),
            successes = self.machine.mission_log().successes(),
            "observer stopped"
        );
        Ok(())
    }
}
