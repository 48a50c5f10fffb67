// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HTTP surface of the dispatch service.
//
//   POST /send-print-job                {userId, orderRef, payloadBase64, documentType?}
//   GET  /print-jobs/{job_id}           status poll
//   POST /devices/{device_id}/heartbeat device presence
//   POST /devices/{device_id}/claim     next job for the device (204 when none)
//   POST /print-jobs/{job_id}/result    {deviceId, success, errorMessage?, processingDurationMs?}
//
// Every request passes the bearer-token check before it is routed.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use printrelay_core::error::PrintRelayError;
use printrelay_core::types::{DeviceId, JobId};

use crate::auth::{Authenticator, Caller};
use crate::service::{DispatchService, ResultReport, SubmitRequest};

#[derive(Clone)]
pub struct DispatchApp {
    pub service: Arc<DispatchService>,
    pub auth: Arc<Authenticator>,
}

pub fn router(app: DispatchApp) -> Router {
    Router::new()
        .route("/send-print-job", post(send_print_job))
        .route("/print-jobs/{job_id}", get(job_status))
        .route("/print-jobs/{job_id}/result", post(job_result))
        .route("/devices/{device_id}/heartbeat", post(heartbeat))
        .route("/devices/{device_id}/claim", post(claim))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(app.clone(), authenticate))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

fn error_response(err: &PrintRelayError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({
            "success": false,
            "error": err.to_string(),
            "code": err.code(),
        })),
    )
        .into_response()
}

async fn authenticate(State(app): State<DispatchApp>, mut request: Request, next: Next) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match app.auth.verify_header(authorization) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(e) => {
            debug!(path = %request.uri().path(), "unauthenticated request rejected");
            error_response(&e)
        }
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "not found" })),
    )
        .into_response()
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, PrintRelayError> {
    serde_json::from_slice(body).map_err(|e| PrintRelayError::Validation(e.to_string()))
}

fn parse_job_id(text: &str) -> Result<JobId, PrintRelayError> {
    text.parse()
        .map_err(|_| PrintRelayError::Validation(format!("'{text}' is not a job id")))
}

async fn send_print_job(
    State(app): State<DispatchApp>,
    Extension(caller): Extension<Caller>,
    body: Bytes,
) -> Response {
    let request = match parse_json::<SubmitRequest>(&body) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    match app.service.submit(&caller, request).await {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => {
            warn!(error = %e, user = %caller.user_id, "print job rejected");
            error_response(&e)
        }
    }
}

async fn job_status(
    State(app): State<DispatchApp>,
    Extension(caller): Extension<Caller>,
    Path(job_id): Path<String>,
) -> Response {
    let job_id = match parse_job_id(&job_id) {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };
    match app.service.status(&caller, job_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn heartbeat(
    State(app): State<DispatchApp>,
    Extension(caller): Extension<Caller>,
    Path(device_id): Path<String>,
) -> Response {
    match app.service.heartbeat(&caller, &DeviceId(device_id)).await {
        Ok(pending) => Json(json!({ "success": true, "pendingJobs": pending })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct ClaimQuery {
    wait_ms: Option<u64>,
}

async fn claim(
    State(app): State<DispatchApp>,
    Extension(caller): Extension<Caller>,
    Path(device_id): Path<String>,
    Query(query): Query<ClaimQuery>,
) -> Response {
    let wait = query.wait_ms.map(Duration::from_millis);
    match app.service.claim(&caller, &DeviceId(device_id), wait).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultBody {
    device_id: String,
    #[serde(flatten)]
    report: ResultReport,
}

async fn job_result(
    State(app): State<DispatchApp>,
    Extension(caller): Extension<Caller>,
    Path(job_id): Path<String>,
    body: Bytes,
) -> Response {
    let parsed = parse_job_id(&job_id).and_then(|id| Ok((id, parse_json::<ResultBody>(&body)?)));
    let (job_id, body) = match parsed {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    match app
        .service
        .report(&caller, &DeviceId(body.device_id), job_id, body.report)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(&e),
    }
}
