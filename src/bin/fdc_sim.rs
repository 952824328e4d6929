use clap::{App, Arg};
use fire_support_sim::config::SimConfig;
use fire_support_sim::fdc_gun::FdcGunMessage;
use fire_support_sim::fo_fdc::FoFdcMessage;
use fire_support_sim::link::faults::LinkFaultConfig;
use fire_support_sim::link::{run_link, LinkEvent};
use fire_support_sim::mission::Peer;
use fire_support_sim::sim::{FdcCommand, FdcConduits, FdcSimulator};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("fdc-sim")
        .version("0.1.0")
        .author("Fire Support Simulation Team")
        .about("🎯 Fire Direction Center simulator - takes calls for fire and commands the gun")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Address to accept the observer on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("gun")
                .short("g")
                .long("gun")
                .value_name("ADDR")
                .help("Address of the gun")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("callsign")
                .long("callsign")
                .value_name("CALLSIGN")
                .help("FDC callsign")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("auto-approve")
                .long("auto-approve")
                .value_name("STATE")
                .help("Approve fire as soon as the observer confirms the warn order")
                .takes_value(true)
                .possible_values(&["on", "off"]),
        )
        .get_matches();

    let mut config = SimConfig::load(matches.value_of("config").map(Path::new))?;
    if let Some(addr) = matches.value_of("listen") {
        config.network.observer_listen_addr = addr.to_string();
    }
    if let Some(addr) = matches.value_of("gun") {
        config.network.gun_addr = addr.to_string();
    }
    if let Some(callsign) = matches.value_of("callsign") {
        config.fdc.callsign = callsign.to_string();
    }
    if let Some(state) = matches.value_of("auto-approve") {
        config.fdc.auto_approve = state == "on";
    }
    config.validate()?;

    println!("🎯 Fire Direction Center {}", config.fdc.callsign);
    println!("================================");

    let capacity = config.network.channel_capacity;
    let (observer_events, observer_rx) = mpsc::channel(capacity);
    let (observer_tx, observer_outbound) = mpsc::channel(capacity);
    let (gun_events, gun_rx) = mpsc::channel(capacity);
    let (gun_tx, gun_outbound) = mpsc::channel(capacity);
    let (control_tx, control_rx) = mpsc::channel(capacity);

    let cancel = CancellationToken::new();
    let fdc = FdcSimulator::new(&config.fdc)?;
    let actor = tokio::spawn(fdc.run(
        FdcConduits {
            observer_rx,
            observer_tx,
            gun_rx,
            gun_tx,
            control_rx,
        },
        cancel.clone(),
    ));

    let listener = TcpListener::bind(&config.network.observer_listen_addr).await?;
    info!("🌐 Listening for the observer on {}", config.network.observer_listen_addr);

    let observer_link = tokio::spawn(serve_observer(
        listener,
        observer_events,
        observer_outbound,
        config.network.faults.clone(),
        cancel.clone(),
    ));
    let gun_link = tokio::spawn(connect_gun(
        config.network.gun_addr.clone(),
        Duration::from_millis(config.network.reconnect_delay_ms),
        gun_events,
        gun_outbound,
        config.network.faults.clone(),
        cancel.clone(),
    ));
    let operator = tokio::spawn(read_operator_commands(control_tx, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();

    actor.await??;
    observer_link.await?;
    gun_link.await?;
    operator.abort();

    println!("🎯 Fire Direction Center stopped");
    Ok(())
}

/// Serves one observer connection at a time.
async fn serve_observer(
    listener: TcpListener,
    events: mpsc::Sender<LinkEvent<FoFdcMessage>>,
    mut outbound: mpsc::Receiver<FoFdcMessage>,
    faults: LinkFaultConfig,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                info!("🔗 Observer connected: {}", addr);
                if let Err(e) = run_link(stream, Peer::Observer, &events, &mut outbound, &faults, &cancel).await {
                    warn!("Observer {} link error: {}", addr, e);
                }
                info!("🔌 Observer {} disconnected", addr);
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Keeps a connection to the gun up, retrying after `delay`.
async fn connect_gun(
    addr: String,
    delay: Duration,
    events: mpsc::Sender<LinkEvent<FdcGunMessage>>,
    mut outbound: mpsc::Receiver<FdcGunMessage>,
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
                info!("🔗 Connected to gun at {}", addr);
                if let Err(e) = run_link(stream, Peer::Gun, &events, &mut outbound, &faults, &cancel).await {
                    warn!("Gun link error: {}", e);
                }
                info!("🔌 Gun at {} disconnected", addr);
            }
            Err(e) => {
                warn!("Gun at {} unreachable: {}", addr, e);
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep(delay) => {}
        }
    }
}

/// Reads `approve`, `check` and `status` from stdin.
async fn read_operator_commands(control: mpsc::Sender<FdcCommand>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        let command = match line {
            Ok(Some(line)) => match line.trim() {
                "approve" => FdcCommand::ApproveFire,
                "check" => FdcCommand::CheckFire,
                "status" => FdcCommand::RequestGunStatus,
                "" => continue,
                other => {
                    warn!("Unknown command {:?}, expected approve, check or status", other);
                    continue;
                }
            },
            Ok(None) => return,
            Err(e) => {
                error!("Error reading stdin: {}", e);
                return;
            }
        };
        if control.send(command).await.is_err() {
            return;
        }
    }
}
