use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use media_relay::{api, logging, Config, Relay};

#[derive(Parser, Debug)]
#[command(name = "media-relay")]
#[command(about = "Relays live media streams to HTTP sinks", long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, env = "RELAY_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Control API listen address (overrides the config file)
    #[arg(long, env = "RELAY_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(addr) = args.http_addr {
        config = config.http_addr(addr);
    }

    logging::init_logging(&config.logging)?;
    tracing::info!(
        config = %args.config.display(),
        streams = ?config.stream_ids(),
        "Starting media relay"
    );

    let (relay, _hub) = Relay::from_config(&config)?;

    let listener = TcpListener::bind(config.server.http_addr)
        .await
        .with_context(|| format!("binding {}", config.server.http_addr))?;

    api::serve(listener, relay, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    tracing::info!("Media relay stopped");
    Ok(())
}
