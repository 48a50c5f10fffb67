// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP print relay (JetDirect-style, port 9100).
//
// Open a socket, dump the ESC/POS bytes, close.  The relay is stateless and
// makes exactly one attempt per call; retrying is the caller's decision.
// Each failure names the stage it happened in (decode, connect, write) so a
// caller can tell "printer unreachable" from "malformed payload".

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use printrelay_core::codec;
use printrelay_core::error::{PrintRelayError, RelayStage, Result};

/// Connect + write budget for one relay call.
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Write granularity, for progress logging.
const CHUNK_SIZE: usize = 8192;

/// Decode a base64 payload and relay it to `ip:port`.
///
/// Returns the number of bytes written to the printer.
pub async fn relay_base64(ip: &str, port: u16, payload_b64: &str, timeout: Duration) -> Result<usize> {
    let bytes = codec::decode(payload_b64)
        .map_err(|e| PrintRelayError::relay(RelayStage::Decode, e.to_string()))?;
    send_raw(ip, port, &bytes, timeout).await
}

/// Send `bytes` to `ip:port` over a fresh TCP connection.
///
/// One deadline covers both the connect and the write.  The socket is closed
/// before returning on every path.
#[instrument(skip(bytes, timeout), fields(total = bytes.len()))]
pub async fn send_raw(ip: &str, port: u16, bytes: &[u8], timeout: Duration) -> Result<usize> {
    let deadline = Instant::now() + timeout;
    let addr = format!("{ip}:{port}");
    info!(addr = %addr, "connecting via raw TCP");

    let mut stream = tokio::time::timeout_at(deadline, TcpStream::connect((ip, port)))
        .await
        .map_err(|_| {
            PrintRelayError::relay(
                RelayStage::Connect,
                format!("connection to {addr} timed out after {}s", timeout.as_secs()),
            )
        })?
        .map_err(|e| PrintRelayError::relay(RelayStage::Connect, format!("{addr}: {e}")))?;

    let written = tokio::time::timeout_at(deadline, write_all_chunked(&mut stream, bytes))
        .await
        .map_err(|_| {
            PrintRelayError::relay(
                RelayStage::Write,
                format!("write to {addr} timed out after {}s", timeout.as_secs()),
            )
        })??;

    info!(addr = %addr, bytes = written, "raw TCP print sent");
    Ok(written)
}

async fn write_all_chunked(stream: &mut TcpStream, bytes: &[u8]) -> Result<usize> {
    let mut sent = 0usize;
    for chunk in bytes.chunks(CHUNK_SIZE) {
        stream.write_all(chunk).await.map_err(|e| {
            PrintRelayError::relay(RelayStage::Write, format!("send failed at byte {sent}: {e}"))
        })?;
        sent += chunk.len();
        debug!(sent, total = bytes.len(), "raw TCP progress");
    }

    stream
        .flush()
        .await
        .map_err(|e| PrintRelayError::relay(RelayStage::Write, format!("flush: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| PrintRelayError::relay(RelayStage::Write, format!("shutdown: {e}")))?;

    Ok(sent)
}
