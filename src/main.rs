mod archive;
mod config;
mod discoverer;
mod error;
mod event;
mod http;
mod hub;
mod logging;
mod subscriber;
mod tailer;
mod unstacker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info};

use config::Config;
use event::{ChannelId, Event};
use hub::Hub;

/// Upper bound on buffered, not-yet-broadcast events.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Dynamic-server discovery scan cadence, before scaling by server count.
const DISCOVERY_BASE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "taillamp")]
#[command(about = "Real-time log tailing and fan-out service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a config file and start serving subscribers.
    Serve {
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => {
            if let Err(e) = run(config) {
                eprintln!("fatal: {e}");
                std::process::exit(1);
            }
        }
    }
}

#[tokio::main]
async fn run(config_path: PathBuf) -> Result<(), error::AppError> {
    let config = config::load_config_from(&config_path)?;
    logging::init(config.debug);
    info!(path = %config_path.display(), "loaded configuration");

    let config = Arc::new(config);

    let classic_tags = config.classic.iter().map(|s| s.server_tag.clone());
    let dynamic_tags = config.dynamic.iter().map(|s| s.server_tag.clone());
    let hub = Arc::new(Hub::new(classic_tags, dynamic_tags));

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);

    // Central fan-in: every unstacker feeds this channel, a single task
    // drains it into the hub's per-channel broadcast.
    {
        let hub = hub.clone();
        tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                let channel = ChannelId::parse(&evt.server);
                hub.broadcast(&channel, &evt).await;
            }
        });
    }

    for server in &config.classic {
        let channel = ChannelId::Classic(server.server_tag.clone());
        let (fifo_tx, fifo_rx) = mpsc::unbounded_channel();
        // Dropping the handle detaches the task; tokio keeps it running.
        // Classic tailers rewatch forever unless a fatal I/O error occurs,
        // which the tailer itself logs.
        let _handle = tailer::spawn(
            server.log_file_path.clone(),
            fifo_tx,
            true,
            config.delay_before_rewatch,
        );
        tokio::spawn(unstacker::run(channel, fifo_rx, event_tx.clone()));
    }

    let scan_interval = DISCOVERY_BASE_INTERVAL
        .checked_mul(config.dynamic.len().max(1) as u32)
        .unwrap_or(DISCOVERY_BASE_INTERVAL);

    for server in &config.dynamic {
        let hub = hub.clone();
        let event_tx = event_tx.clone();
        let server = server.clone();
        let delay = config.delay_before_rewatch;
        tokio::spawn(async move {
            discoverer::run(server, hub, event_tx, scan_interval, delay).await;
        });
    }

    let state = http::AppState {
        hub: hub.clone(),
        config: config.clone(),
    };
    let router = http::build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(error::AppError::Server)?;
    info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(error::AppError::Server)?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to install ctrl-c handler"),
    }
}
