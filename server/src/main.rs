use clap::Parser;
use log::info;
use netcode::NetConfig;
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Maximum number of connected clients (overrides the config file)
    #[arg(short = 'm', long)]
    max_clients: Option<usize>,

    /// Simulation ticks per second
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,

    /// Path to the JSON config file
    #[arg(short = 'c', long, default_value = "server_config.json")]
    config: PathBuf,

    /// Let the host join its own lobby as player 0
    #[arg(long)]
    host_plays: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = NetConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_clients) = args.max_clients {
        config.max_clients = max_clients;
    }
    if args.host_plays {
        config.host_participates = true;
    }

    let tick_rate = args.tick_rate.max(1);
    let tick_duration = Duration::from_secs_f64(1.0 / f64::from(tick_rate));

    info!("Starting server...");
    info!(
        "Port {}, max {} clients, {}Hz tick, {}ms snapshots",
        config.port, config.max_clients, tick_rate, config.snapshot_interval_ms
    );

    let mut server = Server::new(config, tick_duration)?;
    server.run().await?;

    Ok(())
}
