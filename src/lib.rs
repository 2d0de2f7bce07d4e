//! Coordination server for a peer-to-peer audio broadcast fabric: the tree
//! state machine and signaling relay described in SPEC_FULL.md. Media never
//! passes through this process - it only places listeners in a distribution
//! tree, relays the small handshake messages peers use to set up their own
//! direct connections, and repairs the tree when participants come and go.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod ids;
pub mod liveness;
pub mod placement;
pub mod protocol;
pub mod rebalance;
pub mod registry;
pub mod signaling;
pub mod transport;

use crate::{config::Config, dispatcher::Command, error::ServerError, ids::IdAllocator};
use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::EnvFilter;

/// `tracing`/`tracing-subscriber` bootstrap, in the idiom this codebase uses
/// across its services: route the `log` facade through `tracing`, read the
/// standard `RUST_LOG` env filter (defaulting to `info`), write to stderr.
pub fn setup_logger() {
    tracing_log::LogTracer::init().ok();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Assembles the dispatcher, its two periodic timers, and the HTTP/WebSocket
/// listener, then runs until a graceful-shutdown signal arrives. Returns
/// once the listener has stopped; the dispatcher task is left to drain (it
/// has no persistent state to flush - SPEC_FULL.md SS6, "Persisted state").
pub async fn run(config: Config) -> Result<(), ServerError> {
    let dispatcher = dispatcher::spawn(config);
    spawn_heartbeat_sweep(dispatcher.clone(), config.t_heartbeat_sweep);
    spawn_rebalance(dispatcher.clone(), config.t_rebalance);

    let allocator = Arc::new(IdAllocator::new());
    let routes = http::routes(dispatcher, allocator);
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let (bound, server) = http::bind(routes, addr)?;
    tracing::info!(%bound, "listening");

    tokio::select! {
        _ = server => {}
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    // SIGTERM is the orchestrator-sent signal (containers, systemd); SIGINT
    // is Ctrl-C in a terminal. Either stops the server the same way.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn spawn_heartbeat_sweep(dispatcher: dispatcher::DispatcherHandle, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if dispatcher.send(Command::HeartbeatSweep).await.is_err() {
                break;
            }
        }
    });
}

fn spawn_rebalance(dispatcher: dispatcher::DispatcherHandle, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if dispatcher.send(Command::Rebalance).await.is_err() {
                break;
            }
        }
    });
}
