//! spark-server: matching queue and signaling relay over WebSocket.
//!
//! Clients say hello, then call the queue API, subscribe to changes of
//! their own queue entry, and exchange room signaling on named channels.
//! The server never inspects channel payloads.

mod connection;
mod hub;
mod owners;


use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spark_config::SparkConfig;
use spark_matching::{EngineConfig, MatchingEngine};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::{handle_connection, ServerState};
use crate::hub::ChannelHub;
use crate::owners::Owners;

#[derive(Parser)]
#[command(name = "spark-server", about = "Matching queue and signaling relay for Spark events")]
struct Args {
    /// Port to listen on. Overrides `[server] port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file. Defaults to the platform config path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level for the server crates. `RUST_LOG` takes precedence.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let loaded = match &args.config {
        Some(path) => spark_config::load_config_from(path),
        None => spark_config::load_config(),
    };

    let level = args.log_level.clone().unwrap_or_else(|| {
        loaded
            .as_ref()
            .map(|c| c.logging.level.as_directive())
            .unwrap_or("info")
            .to_string()
    });
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("spark_server={level},spark_matching={level}").into()),
        )
        .init();

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Config not loaded, using defaults");
            SparkConfig::default()
        }
    };

    let state = ServerState {
        engine: Arc::new(MatchingEngine::new(EngineConfig::from(&config.matching))),
        hub: ChannelHub::new(),
        owners: Owners::new(),
        hello_timeout: Duration::from_secs(config.server.hello_timeout_secs),
    };

    let port = args.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!("spark-server listening on {}", addr);

    // Spawn stale entry reaper.
    let ttl = config.matching.stale_entry_ttl_secs;
    if ttl > 0 {
        let engine = Arc::clone(&state.engine);
        let hub = state.hub.clone();
        let every = Duration::from_secs(config.matching.reaper_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let reaped = engine.reap_stale(Duration::from_secs(ttl)).await;
                let channels = hub.count().await;
                tracing::debug!(reaped, channels, "Reaper tick");
            }
        });
    }

    serve(listener, state).await;
}

/// Accept loop. Never returns.
async fn serve(listener: TcpListener, state: ServerState) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, state).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
