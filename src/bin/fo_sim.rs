use clap::{App, Arg};
use colored::*;
use fire_support_sim::config::SimConfig;
use fire_support_sim::fo_fdc::FoFdcMessage;
use fire_support_sim::link::faults::LinkFaultConfig;
use fire_support_sim::link::{run_link, LinkEvent};
use fire_support_sim::mission::{MissionEvent, MissionOutcome, Peer};
use fire_support_sim::sim::fo::{FoMission, FoState};
use fire_support_sim::sim::{FoCommand, FoConduits, FoSimulator};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("fo-sim")
        .version("0.1.0")
        .author("Fire Support Simulation Team")
        .about("🔭 Forward observer simulator - calls for fire and reports the effect")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("fdc")
                .short("f")
                .long("fdc")
                .value_name("ADDR")
                .help("Address of the FDC")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("callsign")
                .long("callsign")
                .value_name("CALLSIGN")
                .help("Observer callsign")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("missions")
                .short("n")
                .long("missions")
                .value_name("COUNT")
                .help("Missions to call before exiting, 0 to keep calling")
                .takes_value(true)
                .validator(|v| match v.parse::<u32>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Mission count must be a valid number".into()),
                }),
        )
        .get_matches();

    let mut config = SimConfig::load(matches.value_of("config").map(Path::new))?;
    if let Some(addr) = matches.value_of("fdc") {
        config.network.observer_listen_addr = addr.to_string();
    }
    if let Some(callsign) = matches.value_of("callsign") {
        config.observer.callsign = callsign.to_string();
    }
    if let Some(missions) = matches.value_of("missions") {
        config.observer.missions = missions.parse()?;
    }
    config.validate()?;

    println!("{}", format!("🔭 Forward Observer {}", config.observer.callsign).bold());
    println!("================================");

    let capacity = config.network.channel_capacity;
    let (fdc_events, fdc_rx) = mpsc::channel(capacity);
    let (fdc_tx, fdc_outbound) = mpsc::channel(capacity);
    let (control_tx, control_rx) = mpsc::channel(capacity);

    let cancel = CancellationToken::new();
    let observer = FoSimulator::new(&config.observer)?;
    let state = observer.subscribe_state();
    let events = observer.subscribe_events();
    let actor = tokio::spawn(observer.run(
        FoConduits {
            fdc_rx,
            fdc_tx,
            control_rx,
        },
        cancel.clone(),
    ));
    let link = tokio::spawn(connect_fdc(
        config.network.observer_listen_addr.clone(),
        Duration::from_millis(config.network.reconnect_delay_ms),
        fdc_events,
        fdc_outbound,
        config.network.faults.clone(),
        cancel.clone(),
    ));

    let interval = Duration::from_millis(config.observer.mission_interval_ms);
    let (called, succeeded) = tokio::select! {
        tally = call_missions(config.observer.missions, interval, control_tx, state, events) => tally,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            (0, 0)
        }
    };
    cancel.cancel();

    actor.await??;
    link.await?;

    if called > 0 {
        let summary = format!("{succeeded}/{called} missions assessed");
        if succeeded == called {
            println!("{}", summary.green().bold());
        } else {
            println!("{}", summary.yellow().bold());
        }
    }
    println!("🔭 Forward Observer stopped");
    Ok(())
}

/// Calls `count` missions one after another (forever when zero) and returns
/// how many were called and how many ended assessed.
async fn call_missions(
    count: u32,
    interval: Duration,
    control: mpsc::Sender<FoCommand>,
    mut state: watch::Receiver<FoState>,
    mut events: broadcast::Receiver<MissionEvent>,
) -> (u32, u32) {
    let mut called = 0;
    let mut succeeded = 0;
    while count == 0 || called < count {
        if state
            .wait_for(|state| *state == FoState::Connected(FoMission::Idle))
            .await
            .is_err()
        {
            break;
        }
        // Anything still queued belongs to an earlier mission
        events = events.resubscribe();
        if control.send(FoCommand::RequestFire(None)).await.is_err() {
            break;
        }
        called += 1;

        match wait_for_outcome(&mut events).await {
            Some(true) => succeeded += 1,
            Some(false) => {}
            None => break,
        }
        time::sleep(interval).await;
    }
    (called, succeeded)
}

/// Prints how the current mission ended; `None` once the observer is gone.
async fn wait_for_outcome(events: &mut broadcast::Receiver<MissionEvent>) -> Option<bool> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Missed {} mission events", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        };
        match event {
            MissionEvent::Opened { target_number } => {
                println!("📋 {} {}", "Target number".cyan(), target_number.to_string().bold());
            }
            MissionEvent::ShotCall { target_number, call } => {
                println!("   {} {}", target_number, call.to_string().cyan());
            }
            MissionEvent::TimedOut {
                target_number: None,
                stage,
            } => {
                println!("⏱️  {}", format!("No answer from the FDC ({stage})").yellow());
                return Some(false);
            }
            MissionEvent::LinkLost { .. } => {
                println!("🔌 {}", "Lost the FDC".red());
                return Some(false);
            }
            other => {
                if let Some((target_number, outcome)) = other.outcome() {
                    print_outcome(&target_number.to_string(), outcome);
                    return Some(outcome.is_success());
                }
            }
        }
    }
}

fn print_outcome(target_number: &str, outcome: MissionOutcome) {
    match outcome {
        MissionOutcome::Assessed { effect, reengage } => {
            let line = format!("{target_number} assessed {effect:?}");
            if reengage {
                println!("✅ {} {}", line.green(), "(re-engage)".yellow());
            } else {
                println!("✅ {}", line.green());
            }
        }
        MissionOutcome::Aborted(cause) => {
            println!("❌ {}", format!("{target_number} aborted: {cause}").red());
        }
        MissionOutcome::TimedOut(stage) => {
            println!("⏱️  {}", format!("{target_number} timed out waiting for {stage}").yellow());
        }
        MissionOutcome::Discarded => {
            println!("🔌 {}", format!("{target_number} discarded with the link").yellow());
        }
    }
}

/// Keeps a connection to the FDC up, retrying after `delay`.
async fn connect_fdc(
    addr: String,
    delay: Duration,
    events: mpsc::Sender<LinkEvent<FoFdcMessage>>,
    mut outbound: mpsc::Receiver<FoFdcMessage>,
    faults: LinkFaultConfig,
    cancel: CancellationToken,
) {
    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            connected = TcpStream::connect(&addr) => connected,
        };
        match connected {
            Ok(stream) => {
                info!("🔗 Connected to FDC at {}", addr);
                if let Err(e) = run_link(stream, Peer::Fdc, &events, &mut outbound, &faults, &cancel).await {
                    warn!("FDC link error: {}", e);
                }
                info!("🔌 FDC at {} disconnected", addr);
            }
            Err(e) => {
                warn!("FDC at {} unreachable: {}", addr, e);
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep(delay) => {}
        }
    }
}
