// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP surface for the network relay and the discovery sweep.
//
//   POST /network-print               {ip, port, data}  -> {success, message, bytesSent}
//   POST /discover-network-printers   {subnet?}         -> {printers, total, message}
//
// Bodies are parsed by hand so malformed requests still get the documented
// error shape instead of an extractor rejection.

use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use printrelay_core::error::{PrintRelayError, RelayStage};

use crate::discovery::NetworkDiscovery;
use crate::raw_client;

/// Shared state of the relay + discovery service.
#[derive(Clone)]
pub struct NetworkState {
    pub discovery: NetworkDiscovery,
    pub relay_timeout: Duration,
}

/// Build the router for the relay + discovery service.
pub fn router(state: NetworkState) -> Router {
    Router::new()
        .route("/network-print", post(network_print))
        .route("/discover-network-printers", post(discover))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Callers send the port either as a number or as a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u16),
    Text(String),
}

impl PortField {
    fn value(&self) -> Option<u16> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NetworkPrintRequest {
    ip: Option<String>,
    port: Option<PortField>,
    data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscoverRequest {
    subnet: Option<String>,
}

async fn network_print(State(state): State<NetworkState>, body: Bytes) -> Response {
    let request: NetworkPrintRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return relay_error(&PrintRelayError::Validation(e.to_string())),
    };

    let (Some(ip), Some(port), Some(data)) = (request.ip, request.port, request.data) else {
        return relay_error(&PrintRelayError::Validation(
            "ip, port and data are required".into(),
        ));
    };
    let Some(port) = port.value().filter(|p| *p != 0) else {
        return relay_error(&PrintRelayError::Validation("port must be 1-65535".into()));
    };

    match raw_client::relay_base64(&ip, port, &data, state.relay_timeout).await {
        Ok(bytes_sent) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Print sent successfully",
                "bytesSent": bytes_sent,
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(ip = %ip, port, error = %e, "network print failed");
            relay_error(&e)
        }
    }
}

fn relay_error(err: &PrintRelayError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let error = match err.stage() {
        Some(RelayStage::Decode) => "Invalid print data",
        Some(RelayStage::Connect) => "Could not connect to the printer",
        Some(RelayStage::Write) => "Failed to send data to the printer",
        None => "Invalid request",
    };
    let details = match err {
        PrintRelayError::Relay { detail, .. } => detail.clone(),
        other => other.to_string(),
    };
    (
        status,
        Json(json!({
            "success": false,
            "error": error,
            "details": details,
            "stage": err.stage(),
        })),
    )
        .into_response()
}

async fn discover(State(state): State<NetworkState>, body: Bytes) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        DiscoverRequest::default()
    } else {
        match serde_json::from_slice::<DiscoverRequest>(&body) {
            Ok(r) => r,
            Err(e) => return discovery_error(StatusCode::BAD_REQUEST, e.to_string()),
        }
    };

    match state.discovery.sweep(request.subnet.as_deref()).await {
        Ok(report) => {
            info!(total = report.total, "discovery request served");
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(PrintRelayError::Discovery(detail)) => {
            discovery_error(StatusCode::BAD_REQUEST, detail)
        }
        Err(e) => discovery_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn discovery_error(status: StatusCode, details: String) -> Response {
    (
        status,
        Json(json!({
            "error": "Printer discovery failed",
            "details": details,
            "printers": [],
            "total": 0,
        })),
    )
        .into_response()
}
