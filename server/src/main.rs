use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig};
use shared::{DEFAULT_MAX_PLAYERS, DEFAULT_TICK_RATE};

/// Authoritative match server for flappy royale.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Simulation tick rate (updates per second)
    #[clap(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Maximum number of players in the room
    #[clap(short, long, default_value_t = DEFAULT_MAX_PLAYERS)]
    max_players: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        max_players: args.max_players,
        ..ServerConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::bind(&address, config).await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
