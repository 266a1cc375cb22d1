use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Room-based state relay server", long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent connections (capped at the protocol limit)
    #[arg(short, long, default_value = "256")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(short, long, default_value = "5")]
    timeout_secs: u64,

    /// Largest accepted room payload in bytes (capped at the protocol limit)
    #[arg(long, default_value_t = shared::MAX_PAYLOAD_BYTES)]
    max_payload: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.timeout_secs),
        max_payload_bytes: args.max_payload.min(shared::MAX_PAYLOAD_BYTES),
    };

    let mut server = Server::new(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
