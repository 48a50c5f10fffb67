// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TCP reachability probe.
//
// A probe answers one question: does something accept connections on this
// host:port within the timeout?  A missing printer is the normal outcome of
// most probes, so failures are folded into `reachable = false` instead of
// being raised.  The socket is dropped (closed) before the probe returns on
// every path.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    /// Time until the connection was accepted; meaningful only when reachable.
    pub latency_ms: u64,
}

impl ProbeOutcome {
    pub const UNREACHABLE: Self = Self {
        reachable: false,
        latency_ms: 0,
    };
}

/// Something that can test an endpoint for a listening printer.
///
/// The discovery sweep is written against this trait so it can be exercised
/// without a real network.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, addr: SocketAddr, timeout: Duration) -> ProbeOutcome;
}

/// Probe by opening (and immediately closing) a TCP connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, addr: SocketAddr, timeout: Duration) -> ProbeOutcome {
        probe_tcp(&addr.ip().to_string(), addr.port(), timeout).await
    }
}

/// Try to connect to `host:port`, giving up after `timeout`.
///
/// Name resolution counts against the timeout.
#[instrument(level = "debug", skip(timeout), fields(timeout_ms = timeout.as_millis() as u64))]
pub async fn probe_tcp(host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    let started = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            let latency_ms = started.elapsed().as_millis() as u64;
            drop(stream);
            debug!(latency_ms, "endpoint answered");
            ProbeOutcome {
                reachable: true,
                latency_ms,
            }
        }
        Ok(Err(e)) => {
            debug!(error = %e, "endpoint refused");
            ProbeOutcome::UNREACHABLE
        }
        Err(_) => {
            debug!("probe timed out");
            ProbeOutcome::UNREACHABLE
        }
    }
}
