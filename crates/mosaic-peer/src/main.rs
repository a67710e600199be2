//! Puzzle peer binary
//!
//! Founds a Mosaic session, or joins one through a buddy, and drives it from
//! the console.

use std::sync::Arc;

use mosaic_peer::{console, ConsoleView, Controller, PeerConfig};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "puzzle_peer=info,mosaic=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PeerConfig::from_args(std::env::args().skip(1))?;
    tracing::info!(host = %config.host, port = config.port, "Starting puzzle peer");

    let controller = match Controller::start(&config, Arc::new(ConsoleView)).await {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("could not join: {e}");
            std::process::exit(1);
        }
    };

    let input = BufReader::new(tokio::io::stdin());
    let outcome = console::run(&controller, input).await;
    controller.leave().await?;
    outcome?;

    Ok(())
}
