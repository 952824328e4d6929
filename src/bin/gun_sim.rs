use clap::{App, Arg};
use fire_support_sim::config::SimConfig;
use fire_support_sim::fdc_gun::{FdcGunMessage, Status};
use fire_support_sim::link::faults::LinkFaultConfig;
use fire_support_sim::link::{run_link, LinkEvent};
use fire_support_sim::mission::Peer;
use fire_support_sim::sim::{GunConduits, GunSimulator};
use std::path::Path;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("gun-sim")
        .version("0.1.0")
        .author("Fire Support Simulation Team")
        .about("💥 Gun section simulator - executes fire commands from the FDC")
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
                .help("Address to accept the FDC on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("callsign")
                .long("callsign")
                .value_name("CALLSIGN")
                .help("Gun callsign")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("status")
                .long("status")
                .value_name("STATUS")
                .help("Operational status")
                .takes_value(true)
                .possible_values(&["operational", "partial", "down"]),
        )
        .get_matches();

    let mut config = SimConfig::load(matches.value_of("config").map(Path::new))?;
    if let Some(addr) = matches.value_of("listen") {
        config.network.gun_addr = addr.to_string();
    }
    if let Some(callsign) = matches.value_of("callsign") {
        config.gun.callsign = callsign.to_string();
    }
    match matches.value_of("status") {
        Some("operational") => config.gun.status = Status::Operational,
        Some("partial") => config.gun.status = Status::PartialOperational,
        Some("down") => config.gun.status = Status::NonOperational,
        _ => {}
    }
    config.validate()?;

    println!("💥 Gun section {}", config.gun.callsign);
    println!("================================");

    let capacity = config.network.channel_capacity;
    let (fdc_events, fdc_rx) = mpsc::channel(capacity);
    let (fdc_tx, fdc_outbound) = mpsc::channel(capacity);

    let cancel = CancellationToken::new();
    let gun = GunSimulator::new(&config.gun)?;
    let actor = tokio::spawn(gun.run(GunConduits { fdc_rx, fdc_tx }, cancel.clone()));

    let listener = TcpListener::bind(&config.network.gun_addr).await?;
    info!("🌐 Listening for the FDC on {}", config.network.gun_addr);
    let link = tokio::spawn(serve_fdc(
        listener,
        fdc_events,
        fdc_outbound,
        config.network.faults.clone(),
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();

    actor.await??;
    link.await?;

    println!("💥 Gun section stopped");
    Ok(())
}

/// Serves one FDC connection at a time.
async fn serve_fdc(
    listener: TcpListener,
    events: mpsc::Sender<LinkEvent<FdcGunMessage>>,
    mut outbound: mpsc::Receiver<FdcGunMessage>,
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
                info!("🔗 FDC connected: {}", addr);
                if let Err(e) = run_link(stream, Peer::Fdc, &events, &mut outbound, &faults, &cancel).await {
                    warn!("FDC {} link error: {}", addr, e);
                }
                info!("🔌 FDC {} disconnected", addr);
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
