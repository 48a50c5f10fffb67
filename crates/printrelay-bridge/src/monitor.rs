// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Startup auto-connect and the device-removal watcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::BridgeConnection;
use crate::serial::pick_preferred_endpoint;

/// Connect to the preferred endpoint, if there is one.
///
/// Failure is logged and otherwise ignored; the bridge stays up and waits
/// for an explicit connect request.
pub async fn auto_connect(conn: &BridgeConnection) -> Option<String> {
    let endpoints = match conn.list_endpoints().await {
        Ok(endpoints) => endpoints,
        Err(e) => {
            warn!(error = %e, "could not list serial ports for auto-connect");
            return None;
        }
    };

    let Some(endpoint) = pick_preferred_endpoint(&endpoints) else {
        info!("no serial ports found, waiting for a connect request");
        return None;
    };

    let path = endpoint.path.clone();
    match conn.connect(&path).await {
        Ok(()) => {
            info!(path = %path, "auto-connected to printer");
            Some(path)
        }
        Err(e) => {
            warn!(path = %path, error = %e, "auto-connect failed");
            None
        }
    }
}

/// One watcher pass: raise the close event if the active device vanished.
///
/// Returns whether a connection was closed.
pub async fn check_once(conn: &BridgeConnection) -> bool {
    let Some((session, path)) = conn.active_session() else {
        return false;
    };

    match conn.list_endpoints().await {
        Ok(endpoints) if endpoints.iter().any(|e| e.path == path) => false,
        Ok(_) => conn.handle_close(session, "device removed"),
        Err(e) => {
            // Listing can fail transiently; the next pass decides.
            debug!(error = %e, "port listing failed during monitor pass");
            false
        }
    }
}

/// Run `check_once` every `interval` until `shutdown` fires.
pub fn spawn_monitor(
    conn: Arc<BridgeConnection>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("device monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    check_once(&conn).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::FakeSerial;
    use crate::serial::{LineSettings, SerialEndpoint};
    use printrelay_core::types::BridgeState;

    #[tokio::test]
    async fn auto_connect_prefers_usb_port() {
        let fake = FakeSerial::with_ports(&["/dev/ttyS0", "/dev/ttyUSB0"]);
        let conn = BridgeConnection::new(fake, LineSettings::default());

        assert_eq!(auto_connect(&conn).await.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(conn.state(), BridgeState::Connected);
    }

    #[tokio::test]
    async fn auto_connect_without_ports_is_quiet() {
        let conn = BridgeConnection::new(FakeSerial::with_ports(&[]), LineSettings::default());
        assert!(auto_connect(&conn).await.is_none());
        assert_eq!(conn.state(), BridgeState::Disconnected);
    }

    #[tokio::test]
    async fn unplugged_device_is_closed() {
        let fake = FakeSerial::with_ports(&["/dev/ttyUSB0"]);
        let conn = BridgeConnection::new(fake.clone(), LineSettings::default());
        conn.connect("/dev/ttyUSB0").await.unwrap();

        assert!(!check_once(&conn).await);

        *fake.endpoints.lock().unwrap() = vec![SerialEndpoint::new("/dev/ttyS0")];
        assert!(check_once(&conn).await);
        assert_eq!(conn.state(), BridgeState::Disconnected);
    }

    #[tokio::test]
    async fn monitor_task_stops_on_shutdown() {
        let conn = Arc::new(BridgeConnection::new(
            FakeSerial::with_ports(&[]),
            LineSettings::default(),
        ));
        let shutdown = CancellationToken::new();
        let handle = spawn_monitor(conn, Duration::from_millis(10), shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
