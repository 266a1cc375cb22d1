use clap::Parser;
use client::RelayClient;
use log::{error, info, warn};
use shared::Packet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-oriented room relay client", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Room to join on startup
    #[arg(short = 'r', long, default_value = "lobby")]
    room: String,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut client = RelayClient::connect(args.server).await?;
    let me = client.local_addr()?;
    client.join(&args.room).await?;

    info!("Joined room {} as {}", args.room, me);
    info!(
        "Type a line to publish it as the room state, /join <room> to switch rooms, /quit to leave"
    );

    let mut heartbeat = interval(Duration::from_millis(args.heartbeat_ms));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            packet = client.recv_packet(Duration::from_secs(3600)) => {
                match packet {
                    Ok(Some(Packet::RoomState(state))) => {
                        if client.accept_state(&state) {
                            let role = if state.is_host(me) { " (you are host)" } else { "" };
                            println!(
                                "[{} v{}] host {}{}, {} players: {}",
                                state.room_id,
                                state.version,
                                state.host,
                                role,
                                state.players.len(),
                                String::from_utf8_lossy(&state.payload)
                            );
                        }
                    }
                    Ok(Some(Packet::Disconnected { reason })) => {
                        warn!("Disconnected: {}", reason);
                        break;
                    }
                    Ok(Some(other)) => warn!("Unexpected packet: {:?}", other),
                    Ok(None) => {}
                    Err(e) => error!("Error receiving packet: {}", e),
                }
            },

            _ = heartbeat.tick() => {
                if let Err(e) = client.heartbeat().await {
                    error!("Error sending heartbeat: {}", e);
                }
            },

            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim() == "/quit" => break,
                    Some(line) if line.starts_with("/join ") => {
                        let room = line["/join ".len()..].trim();
                        client.join(room).await?;
                        info!("Joining room {}", room);
                    }
                    Some(line) => client.update(line.into_bytes()).await?,
                    None => break,
                }
            },
        }
    }

    client.disconnect().await?;
    Ok(())
}
