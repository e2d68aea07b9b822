use clap::{Parser, ValueEnum};
use client::network::Client;
use log::info;
use netcode::NetConfig;
use shared::Color;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PaintColor {
    Red,
    Green,
    Blue,
    Orange,
    Purple,
    Yellow,
}

impl From<PaintColor> for Color {
    fn from(color: PaintColor) -> Self {
        match color {
            PaintColor::Red => Color::RED,
            PaintColor::Green => Color::GREEN,
            PaintColor::Blue => Color::BLUE,
            PaintColor::Orange => Color::ORANGE,
            PaintColor::Purple => Color::PURPLE,
            PaintColor::Yellow => Color::YELLOW,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port (overrides the config file)
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Name shown in the lobby; defaults to Player_<id> when empty
    #[arg(short = 'u', long, default_value = "")]
    username: String,

    /// Paint color
    #[arg(long, value_enum, default_value = "orange")]
    color: PaintColor,

    /// Path to the JSON config file
    #[arg(short = 'c', long, default_value = "client_config.json")]
    config: PathBuf,
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

    info!("Starting client...");
    info!("Connecting to: {}:{}", args.host, config.port);

    let mut client = Client::new(&args.host, config, &args.username, args.color.into())?;
    client.run().await?;

    Ok(())
}
