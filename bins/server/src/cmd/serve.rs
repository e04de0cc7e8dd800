use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use bridge_engine::{Bridge, BridgeError};
use bridge_wire::{TcpRequestPort, TcpUpstreamClient};

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("vchans-server starting");

    // --- Config + channel map ---
    let (config, map) = ServerConfig::resolve(&args)?;
    if let Some(path) = &args.config {
        tracing::info!(config = %path, "loaded config");
    }
    for (real, virt) in map.iter() {
        tracing::info!("mapping {real} to {virt}");
    }
    let map = Arc::new(map);

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutting down..."),
            Err(e) => tracing::error!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        signal_token.cancel();
    });

    // --- Consumer-facing port ---
    let port = Arc::new(TcpRequestPort::bind(&config.port_config(), token.child_token()).await?);

    // --- Upstream connection loop ---
    let upstream_config = config.upstream_config();
    let result: Result<(), ServerError> = loop {
        let upstream = tokio::select! {
            _ = token.cancelled() => break Ok(()),
            connected = TcpUpstreamClient::connect(&upstream_config) => connected,
        };
        let upstream = match upstream {
            Ok(upstream) => Arc::new(upstream),
            Err(e) => match config.reconnect_delay() {
                Some(delay) => {
                    tracing::warn!(error = %e, retry_in = ?delay, "upstream unavailable");
                    if wait_or_cancel(&token, delay).await {
                        break Ok(());
                    }
                    continue;
                }
                None => break Err(e.into()),
            },
        };

        let bridge = Bridge::new(map.clone(), port.clone(), upstream, config.bridge_config());
        match bridge.run(token.clone()).await {
            Ok(()) => break Ok(()),
            Err(BridgeError::UpstreamClosed(e)) => match config.reconnect_delay() {
                Some(delay) => {
                    tracing::warn!(error = ?e, retry_in = ?delay, "upstream lost, reconnecting");
                    if wait_or_cancel(&token, delay).await {
                        break Ok(());
                    }
                }
                None => break Err(BridgeError::UpstreamClosed(e).into()),
            },
            Err(e) => break Err(e.into()),
        }
    };

    token.cancel();
    // Drain: даём соединениям дописать ответы на уже обслуженные запросы.
    if tokio::time::timeout(SHUTDOWN_DRAIN, port.shutdown()).await.is_err() {
        tracing::warn!(timeout = ?SHUTDOWN_DRAIN, "request port drain timed out");
    }
    tracing::info!("shutdown complete");
    result
}

/// Пауза перед переподключением. `true`, если за это время пришла отмена.
async fn wait_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
