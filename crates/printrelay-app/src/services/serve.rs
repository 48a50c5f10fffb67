// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Startup of the bridge, relay and dispatch HTTP services.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use printrelay_bridge::http::BridgeApp;
use printrelay_bridge::{BridgeConnection, LineSettings, SystemSerial, monitor};
use printrelay_core::config::{BridgeConfig, DiscoveryConfig, DispatchConfig, RelayConfig};
use printrelay_core::error::{PrintRelayError, Result};
use printrelay_dispatch::{Authenticator, DispatchApp, DispatchService, JobStore};
use printrelay_print::NetworkDiscovery;
use printrelay_print::http::NetworkState;

/// Secret used when `dispatch.jwt_secret` is left empty.
const JWT_SECRET_ENV: &str = "PRINTRELAY_JWT_SECRET";

/// Serve `router` on `addr` until Ctrl-C, then fire `shutdown`.
async fn serve(addr: &str, router: Router, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        signal.cancel();
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

pub async fn bridge(config: &BridgeConfig) -> Result<()> {
    let conn = Arc::new(BridgeConnection::new(
        Arc::new(SystemSerial),
        LineSettings::with_baud(config.baud_rate),
    ));
    if config.auto_connect {
        monitor::auto_connect(&conn).await;
    }

    let shutdown = CancellationToken::new();
    let watcher = monitor::spawn_monitor(Arc::clone(&conn), config.monitor_interval(), shutdown.clone());

    let router = printrelay_bridge::http::router(BridgeApp {
        conn: Arc::clone(&conn),
        max_payload_bytes: config.max_payload_bytes,
    });
    let addr = format!("0.0.0.0:{}", config.listen_port);
    info!(port = config.listen_port, max_payload = config.max_payload_bytes, "print bridge starting");
    let served = serve(&addr, router, shutdown.clone()).await;

    shutdown.cancel();
    if watcher.await.is_err() {
        warn!("device monitor ended abnormally");
    }
    conn.disconnect();
    served
}

pub async fn relay(config: &RelayConfig, discovery: &DiscoveryConfig) -> Result<()> {
    let router = printrelay_print::http::router(NetworkState {
        discovery: NetworkDiscovery::new(discovery.clone()),
        relay_timeout: config.timeout(),
    });
    info!(timeout_secs = config.timeout_secs, "network relay starting");
    serve(&config.listen, router, CancellationToken::new()).await
}

pub async fn dispatch(config: &DispatchConfig) -> Result<()> {
    let secret = if config.jwt_secret.is_empty() {
        std::env::var(JWT_SECRET_ENV).unwrap_or_default()
    } else {
        config.jwt_secret.clone()
    };
    let auth = Authenticator::new(&secret).map_err(|_| {
        PrintRelayError::Config(format!(
            "dispatch.jwt_secret is empty and {JWT_SECRET_ENV} is not set"
        ))
    })?;

    let path = config.database_path.clone();
    let store = tokio::task::spawn_blocking(move || JobStore::open(path))
        .await
        .map_err(|e| PrintRelayError::Database(format!("store open task failed: {e}")))??;
    let service = Arc::new(DispatchService::new(store, config));

    let shutdown = CancellationToken::new();
    let pruner = {
        let service = Arc::clone(&service);
        let shutdown = shutdown.clone();
        let every = config.presence_ttl();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        service.registry().prune();
                    }
                }
            }
        })
    };

    let router = printrelay_dispatch::http::router(DispatchApp {
        service,
        auth: Arc::new(auth),
    });
    info!(
        database = %config.database_path.display(),
        presence_ttl_secs = config.presence_ttl_secs,
        max_attempts = config.max_attempts,
        "dispatch service starting"
    );
    let served = serve(&config.listen, router, shutdown.clone()).await;
    shutdown.cancel();
    let _ = pruner.await;
    served
}
