// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP intake of the local bridge.
//
//   GET  /status      bridge and connection state
//   GET  /ports       serial endpoints the bridge can see
//   POST /connect     {path} -> open that endpoint (closing any other)
//   POST /print       raw bytes (octet-stream) or {data: base64} (json)
//   POST /disconnect  close the connection
//
// Print bodies above the configured ceiling are answered with 413 before
// anything reaches the serial handle.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use printrelay_core::codec;
use printrelay_core::error::PrintRelayError;

use crate::connection::BridgeConnection;

/// Room for the JSON envelope around a base64 payload.
const JSON_ENVELOPE_SLACK: usize = 4096;

/// Shared state of the bridge HTTP service.
#[derive(Clone)]
pub struct BridgeApp {
    pub conn: Arc<BridgeConnection>,
    /// Largest accepted payload, in decoded bytes.
    pub max_payload_bytes: usize,
}

pub fn router(app: BridgeApp) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/ports", get(ports))
        .route("/connect", post(connect))
        .route("/print", post(print).layer(DefaultBodyLimit::disable()))
        .route("/disconnect", post(disconnect))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

fn error_response(err: &PrintRelayError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "success": false,
        "error": err.to_string(),
        "code": err.code(),
    });
    if let PrintRelayError::PayloadTooLarge { size, limit } = err {
        body["size"] = json!(size);
        body["limit"] = json!(limit);
    }
    (status, Json(body)).into_response()
}

async fn status(State(app): State<BridgeApp>) -> Json<serde_json::Value> {
    let status = app.conn.status();
    Json(json!({
        "status": "online",
        "connected": status.connected,
        "state": status.state,
        "port": status.port,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ports(State(app): State<BridgeApp>) -> Response {
    match app.conn.list_endpoints().await {
        Ok(ports) => Json(json!({ "ports": ports })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    #[serde(alias = "port")]
    path: Option<String>,
}

async fn connect(State(app): State<BridgeApp>, body: Bytes) -> Response {
    let path = serde_json::from_slice::<ConnectRequest>(&body)
        .ok()
        .and_then(|r| r.path)
        .filter(|p| !p.trim().is_empty());
    let Some(path) = path else {
        return error_response(&PrintRelayError::Validation("path is required".into()));
    };

    match app.conn.connect(&path).await {
        Ok(()) => Json(json!({ "success": true, "port": path })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn disconnect(State(app): State<BridgeApp>) -> Json<serde_json::Value> {
    let was_connected = app.conn.disconnect();
    Json(json!({ "success": true, "wasConnected": was_connected }))
}

enum BodyFormat {
    Raw,
    Json,
}

#[derive(Debug, Deserialize)]
struct JsonPrintRequest {
    data: String,
}

async fn print(State(app): State<BridgeApp>, headers: HeaderMap, body: Body) -> Response {
    match read_payload(&app, &headers, body).await {
        Ok(bytes) => match app.conn.write(bytes).await {
            Ok(written) => Json(json!({ "success": true, "bytesWritten": written })).into_response(),
            Err(e) => {
                warn!(error = %e, "print write failed");
                error_response(&e)
            }
        },
        Err(e) => {
            info!(error = %e, "print request rejected");
            error_response(&e)
        }
    }
}

/// Validate and read the print body into raw bytes.
async fn read_payload(
    app: &BridgeApp,
    headers: &HeaderMap,
    body: Body,
) -> Result<Vec<u8>, PrintRelayError> {
    let max = app.max_payload_bytes;
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let (format, body_limit) = match mime.as_str() {
        "application/octet-stream" => (BodyFormat::Raw, max),
        "application/json" => (BodyFormat::Json, max.div_ceil(3) * 4 + JSON_ENVELOPE_SLACK),
        other => {
            return Err(PrintRelayError::Validation(format!(
                "unsupported content type '{other}'; send application/octet-stream or application/json"
            )));
        }
    };

    // Reject on the declared length before reading anything.
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(len) = declared.filter(|len| *len > body_limit) {
        let size = match format {
            BodyFormat::Raw => len,
            BodyFormat::Json => codec::decoded_len_estimate(len),
        };
        return Err(PrintRelayError::PayloadTooLarge { size, limit: max });
    }

    let collected = Limited::new(body, body_limit).collect().await.map_err(|e| {
        if e.downcast_ref::<LengthLimitError>().is_some() {
            PrintRelayError::PayloadTooLarge {
                size: body_limit + 1,
                limit: max,
            }
        } else {
            PrintRelayError::Validation(format!("reading request body: {e}"))
        }
    })?;
    let raw = collected.to_bytes();

    let bytes = match format {
        BodyFormat::Raw => raw.to_vec(),
        BodyFormat::Json => {
            let request: JsonPrintRequest = serde_json::from_slice(&raw)
                .map_err(|e| PrintRelayError::Validation(format!("expected {{\"data\": base64}}: {e}")))?;
            codec::decode(&request.data)?
        }
    };

    if bytes.len() > max {
        return Err(PrintRelayError::PayloadTooLarge {
            size: bytes.len(),
            limit: max,
        });
    }
    if bytes.is_empty() {
        return Err(PrintRelayError::Validation("print payload is empty".into()));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use axum::http::Request;
    use tower::ServiceExt;

    use crate::connection::testing::FakeSerial;
    use crate::serial::LineSettings;

    const LIMIT: usize = 10 * 1024 * 1024;

    async fn connected_app() -> (Router, Arc<FakeSerial>) {
        let fake = FakeSerial::with_ports(&["/dev/ttyUSB0"]);
        let conn = Arc::new(BridgeConnection::new(fake.clone(), LineSettings::default()));
        conn.connect("/dev/ttyUSB0").await.unwrap();
        let app = router(BridgeApp {
            conn,
            max_payload_bytes: LIMIT,
        });
        (app, fake)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn raw_print(bytes: Vec<u8>) -> Request<Body> {
        Request::post("/print")
            .header("content-type", "application/octet-stream")
            .body(Body::from(bytes))
            .unwrap()
    }

    #[tokio::test]
    async fn raw_body_is_written_to_the_printer() {
        let (app, fake) = connected_app().await;
        let (status, body) = send(app, raw_print(b"\x1b@Order 42\n".to_vec())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bytesWritten"], 11);
        assert_eq!(fake.wire(), b"\x1b@Order 42\n");
    }

    #[tokio::test]
    async fn json_body_is_decoded_before_writing() {
        let (app, fake) = connected_app().await;
        let payload = vec![0x1B, 0x40, 0x00, 0xFF, 0x1D, 0x56, 0x00];
        let request = Request::post("/print")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "data": codec::encode(&payload) }).to_string()))
            .unwrap();
        let (status, _) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fake.wire(), payload);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_without_writing() {
        let (app, fake) = connected_app().await;
        let (status, body) = send(app, raw_print(vec![0x20; 20 * 1024 * 1024])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "payload_too_large");
        assert!(body["limit"].as_u64().is_some());
        assert_eq!(fake.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn declared_oversize_is_rejected_up_front() {
        let (app, fake) = connected_app().await;
        let request = Request::post("/print")
            .header("content-type", "application/octet-stream")
            .header("content-length", (20 * 1024 * 1024).to_string())
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body["error"].as_str().unwrap().contains("exceeds"));
        assert_eq!(fake.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn print_while_disconnected_is_503() {
        let fake = FakeSerial::with_ports(&["/dev/ttyUSB0"]);
        let app = router(BridgeApp {
            conn: Arc::new(BridgeConnection::new(fake.clone(), LineSettings::default())),
            max_payload_bytes: LIMIT,
        });
        let (status, body) = send(app, raw_print(b"x".to_vec())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "printer not connected");
        assert_eq!(fake.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsupported_content_type_is_400() {
        let (app, _) = connected_app().await;
        let request = Request::post("/print")
            .header("content-type", "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let (status, _) = send(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_connect_and_disconnect() {
        let fake = FakeSerial::with_ports(&["/dev/ttyUSB0"]);
        let app = router(BridgeApp {
            conn: Arc::new(BridgeConnection::new(fake, LineSettings::default())),
            max_payload_bytes: LIMIT,
        });

        let (_, body) = send(app.clone(), Request::get("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(body["status"], "online");
        assert_eq!(body["connected"], false);

        let request = Request::post("/connect")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"port":"/dev/ttyUSB0"}"#))
            .unwrap();
        let (status, _) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(app.clone(), Request::get("/status").body(Body::empty()).unwrap()).await;
        assert_eq!(body["state"], "connected");
        assert_eq!(body["port"], "/dev/ttyUSB0");

        let (_, body) = send(app, Request::post("/disconnect").body(Body::empty()).unwrap()).await;
        assert_eq!(body["wasConnected"], true);
    }

    #[tokio::test]
    async fn connect_to_missing_port_surfaces_the_cause() {
        let fake = FakeSerial::with_ports(&["/dev/ttyUSB0"]);
        let app = router(BridgeApp {
            conn: Arc::new(BridgeConnection::new(fake, LineSettings::default())),
            max_payload_bytes: LIMIT,
        });
        let request = Request::post("/connect")
            .body(Body::from(r#"{"path":"/dev/ttyUSB7"}"#))
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("/dev/ttyUSB7"));
    }
}
