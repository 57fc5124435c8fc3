use clap::Parser;
use client::network::{Client, ClientConfig};
use shared::DEFAULT_TICK_RATE;
use std::time::{SystemTime, UNIX_EPOCH};

/// Headless client for the flappy royale match server.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server WebSocket URL
    #[clap(short, long, default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Stable player identity; generated when omitted
    #[clap(short, long)]
    id: Option<String>,

    /// Display name
    #[clap(short, long, default_value = "AnonBird")]
    nickname: String,

    /// Local prediction rate; should match the server's tick rate
    #[clap(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,
}

fn generate_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("bot-{}-{}", std::process::id(), nanos)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ClientConfig {
        url: args.url,
        id: args.id.unwrap_or_else(generate_id),
        nickname: args.nickname,
        tick_rate: args.tick_rate,
    };

    Client::new(config).run().await
}
