//! Terminal client for a Parley room.
//!
//! Joins a room on the signaling server, negotiates a stub peer connection
//! with every other participant, and offers chat and media controls on a
//! readline prompt. When the server is unreachable the session falls back
//! to the in-process loopback channel.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin parley-client -- --room standup --name Alice
//! cargo run --bin parley-client -- -r standup -n Bob
//! ```

use clap::Parser;
use uuid::Uuid;

use parley_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "parley-client")]
#[command(about = "Terminal client for Parley video call rooms", long_about = None)]
struct Args {
    /// Room to join
    #[arg(short = 'r', long, default_value = "lobby")]
    room: String,

    /// Display name shown to other participants
    #[arg(short = 'n', long, default_value = "anonymous")]
    name: String,

    /// Stable user id; generated per session when omitted
    #[arg(short = 'i', long)]
    user_id: Option<String>,

    /// WebSocket endpoint of the signaling server
    #[arg(short = 'u', long, default_value = "ws://127.0.0.1:3001/ws")]
    url: String,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "warn");

    let args = Args::parse();
    let user_id = args
        .user_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Err(e) = parley_client::cli::run_session(args.room, user_id, args.name, args.url).await
    {
        tracing::error!("client error: {e}");
        std::process::exit(1);
    }
}
