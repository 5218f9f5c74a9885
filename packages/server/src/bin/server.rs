//! WebRTC signaling server binary.
//!
//! Brokers room membership and relays offer/answer/ICE/chat messages
//! between browser peers; media flows directly peer-to-peer once connected.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin parley-server
//! cargo run --bin parley-server -- --host 0.0.0.0 --port 3001
//! PORT=4000 cargo run --bin parley-server
//! ```

use clap::Parser;

use parley_server::{ServerConfig, SignalingServer};
use parley_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "WebRTC signaling server: room membership and message relay", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "PORT", default_value_t = 3001)]
    port: u16,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    };

    if let Err(e) = SignalingServer::new(config).run().await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
