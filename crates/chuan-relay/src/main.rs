//! chuan relay server
//!
//! Rendezvous for browser-to-browser WebRTC transfers: ephemeral
//! two-peer rooms, a WebSocket signaling relay with binary fallback,
//! an embedded TURN relay, and the JSON control surface that gates it
//! all.

mod api;
mod config;
mod frontend;
mod registry;
mod room;
mod socket;
mod websocket;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chuan_turn::{TurnConfig, TurnService};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::registry::RoomRegistry;

/// Drain window between the shutdown signal and forced exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "chuan-relay")]
#[command(about = "chuan rendezvous and relay server", version)]
struct Cli {
    /// HTTP listen port
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The dotfile feeds the environment without overriding variables
    // that are already set; clap resolves flags over env. Together:
    // flags > env > dotfile > defaults.
    let _ = dotenvy::from_filename(config::DOTFILE);

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env(cli.port);
    run(config).await
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let registry = Arc::new(RoomRegistry::new());
    let sweeper = registry.spawn_sweeper(cancel.clone());

    let turn = if config.turn.enabled {
        let service = Arc::new(TurnService::new(TurnConfig {
            port: config.turn.port,
            username: config.turn.username.clone(),
            password: config.turn.password.clone(),
            realm: config.turn.realm.clone(),
            public_ip: config.turn.public_ip,
        }));
        if let Err(err) = service.start().await {
            // The rendezvous service is still useful without a relay
            error!(%err, "TURN service failed to start, continuing without it");
        }
        Some(service)
    } else {
        None
    };

    let frontend_dir = match config.frontend_dir.as_deref() {
        Some(dir) => {
            let usable = frontend::usable_dir(dir);
            if usable.is_none() {
                warn!(dir = %dir.display(), "frontend directory unusable, serving embedded page");
            }
            usable
        }
        None => None,
    };

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        turn: turn.clone(),
        frontend_dir,
        cancel: cancel.clone(),
    });
    let app = api::router(state);

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    info!(%addr, "HTTP server listening");

    // One cancellation fans out to the HTTP acceptor, the sweeper,
    // every per-socket task, and the drain timer below.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining");
        signal_cancel.cancel();
    });

    let serve_cancel = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_cancel.cancelled().await });

    let drain_expired = {
        let cancel = cancel.clone();
        async move {
            cancel.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
    };

    let result = tokio::select! {
        result = async move { server.await } => result.context("HTTP server failed"),
        _ = drain_expired => Err(anyhow::anyhow!(
            "connections did not drain within {}s",
            SHUTDOWN_GRACE.as_secs()
        )),
    };
    cancel.cancel();

    if let Some(turn) = turn {
        match turn.stop().await {
            Ok(()) | Err(chuan_turn::TurnError::NotRunning) => {}
            Err(err) => warn!(%err, "TURN service stop failed"),
        }
    }
    let _ = sweeper.await;

    result?;
    info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
