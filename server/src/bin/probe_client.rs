//! Raw protocol probe: performs the handshake by hand and prints every frame.

use clap::Parser;
use shared::{
    encode_frame, Color, FrameDecoder, LobbyState, MessageType, NetworkMessage, PlayerInfo,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to probe
    #[arg(short = 's', long, default_value = "127.0.0.1:7777")]
    server: String,

    /// Username to announce
    #[arg(short = 'u', long, default_value = "probe")]
    username: String,

    /// Also mark the probe as ready
    #[arg(long)]
    ready: bool,

    /// Seconds to keep listening
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,
}

fn describe(message: &NetworkMessage) -> String {
    match message.kind {
        MessageType::LobbyState => match message.body::<LobbyState>() {
            Ok(lobby) => format!(
                "{} players, starting={}, countdown={}",
                lobby.players.len(),
                lobby.game_starting,
                lobby.countdown
            ),
            Err(e) => format!("undecodable: {}", e),
        },
        _ => String::from_utf8_lossy(&message.payload).into_owned(),
    }
}

async fn print_frames(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut buf = [0u8; 4096];
    loop {
        while let Some(frame) = decoder.next_frame() {
            match frame {
                Ok(message) => println!(
                    "{:?} from {}: {}",
                    message.kind,
                    message.player_id,
                    describe(&message)
                ),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => println!("Skipped frame: {}", e),
            }
        }

        let len = stream.read(&mut buf).await?;
        if len == 0 {
            println!("Server closed the connection");
            return Ok(());
        }
        decoder.push(&buf[..len]);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let mut stream = TcpStream::connect(&args.server).await?;
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    // Wait for the welcome frame carrying our id.
    println!("Waiting for server welcome...");
    let player_id = loop {
        if let Some(frame) = decoder.next_frame() {
            let message = frame?;
            if message.kind == MessageType::PlayerJoin {
                break message.player_id;
            }
            println!("Unexpected {:?} before welcome", message.kind);
            continue;
        }

        let len = stream.read(&mut buf).await?;
        if len == 0 {
            println!("Server closed the connection (full?)");
            return Ok(());
        }
        decoder.push(&buf[..len]);
    };
    println!("Assigned player ID: {}", player_id);

    let mut info = PlayerInfo::new(player_id, args.username, Color::PURPLE);
    let hello = NetworkMessage::with_body(MessageType::PlayerInfo, player_id, &info)?;
    stream.write_all(&encode_frame(&hello)?).await?;
    println!("Sent PlayerInfo");

    if args.ready {
        info.is_ready = true;
        let ready = NetworkMessage::with_body(MessageType::PlayerReady, player_id, &info)?;
        stream.write_all(&encode_frame(&ready)?).await?;
        println!("Sent PlayerReady");
    }

    let deadline = Duration::from_secs(args.duration);
    let listen = print_frames(&mut stream, &mut decoder);
    match timeout(deadline, listen).await {
        Ok(result) => result?,
        Err(_) => println!("Probe finished after {}s", args.duration),
    }

    Ok(())
}
