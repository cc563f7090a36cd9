use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use skaakee::relay::Relay;

/// Relay for shared-chessboard sessions: routes welcome, presence and
/// piece-movement frames between the two clients of a room.
#[derive(Parser, Debug)]
#[clap(name = "skaakee-relay", version)]
struct Args {
    /// Address to listen on.
    #[clap(short, long, default_value = "0.0.0.0:7248")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let relay = Relay::bind(&args.listen).await?;
    relay.run().await
}
