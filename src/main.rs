use std::net::TcpListener;
use std::process;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchlab::console;
use switchlab::lab::SwitchLab;
use switchlab::ofp_controller::{handle_client_connected, SwitchRegistry};
use switchlab::strategy::Strategy;

#[derive(Parser, Debug)]
#[command(about = "OpenFlow 0x01 switching laboratory controller")]
struct Cli {
    /// Address the controller listens on for switch connections.
    #[arg(long, default_value = "127.0.0.1:6633")]
    listen: String,

    /// Strategy attached at startup; `none` starts detached.
    #[arg(long, default_value = "ideal-pair-switch")]
    strategy: String,

    /// Enforce the port firewall on punted packets.
    #[arg(long)]
    firewall: bool,
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
                             .unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let initial = if cli.strategy == "none" {
        None
    } else {
        match cli.strategy.parse::<Strategy>() {
            Ok(strategy) => Some(strategy),
            Err(err) => {
                eprintln!("{}", err);
                eprintln!("strategies: {}",
                          Strategy::ALL.map(|s| s.name()).join(", "));
                process::exit(2);
            }
        }
    };

    let lab = Arc::new(SwitchLab::new(initial, cli.firewall));
    let registry = Arc::new(SwitchRegistry::new());

    {
        let lab = Arc::clone(&lab);
        let registry = Arc::clone(&registry);
        thread::spawn(move || console::run(lab, registry));
    }

    let listener = match TcpListener::bind(&cli.listen) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("cannot listen on {}: {}", cli.listen, err);
            process::exit(1);
        }
    };
    info!("listening for switches on {}", cli.listen);
    match lab.active_strategy() {
        Some(strategy) => info!("strategy {} attached", strategy),
        None => info!("no strategy attached; use the console to attach one"),
    }
    if lab.firewall_enabled() {
        info!("firewall enabled; ip traffic is denied until rules are added");
    }

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let lab = Arc::clone(&lab);
                let registry = Arc::clone(&registry);
                thread::spawn(move || handle_client_connected(lab, stream, registry));
            }
            Err(err) => warn!("failed to accept switch connection: {}", err),
        }
    }
}
