// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pluggable delivery of a print job.
//
// Three routes reach a printer, chosen by where the client runs:
//
//   DirectSocket   raw TCP to the printer, or through the network relay
//                  when the client cannot open sockets itself
//   LocalBridge    the bridge process owning a serial printer
//   MediatedRelay  the dispatch service, which hands the job to one of the
//                  account's bridge devices

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use printrelay_core::error::{PrintRelayError, RelayStage, Result};
use printrelay_core::types::{DeviceId, JobId, JobStatus, PrintJob};
use printrelay_print::raw_client;

/// Where a job went.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The printer (or the bridge's serial handle) accepted the bytes.
    Printed { bytes: usize },
    /// The dispatch service accepted the job.
    Dispatched {
        job_id: JobId,
        device_id: Option<DeviceId>,
        queued: bool,
    },
}

/// Dispatch-side view of a mediated job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStatus {
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<u64>,
}

#[async_trait]
pub trait PrintTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver `job`, tagged with the business reference `order_ref`.
    async fn deliver(&self, job: &PrintJob, order_ref: &str) -> Result<Delivery>;

    /// Status of a job this transport handed to the dispatch service.
    async fn remote_status(&self, job_id: &JobId) -> Result<RemoteStatus> {
        Err(PrintRelayError::Validation(format!(
            "{} does not track job {job_id} remotely",
            self.name()
        )))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transport {
    DirectSocket {
        ip: String,
        port: u16,
        /// Network relay base URL; `None` opens the socket from this process.
        relay_url: Option<String>,
    },
    LocalBridge {
        base_url: String,
    },
    MediatedRelay {
        dispatch_url: String,
        token: String,
        user_id: String,
    },
}

/// Extra time the HTTP client allows on top of the delivery timeout, so a
/// relay can still answer with the stage that timed out.
const HTTP_HEADROOM: Duration = Duration::from_secs(5);

/// A `Transport` plus the HTTP client and time budget used to drive it.
pub struct TransportClient {
    transport: Transport,
    http: reqwest::Client,
    timeout: Duration,
}

impl TransportClient {
    /// `timeout` bounds one delivery to the printer; HTTP calls get
    /// `HTTP_HEADROOM` more.
    pub fn new(transport: Transport, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout + HTTP_HEADROOM)
            .build()
            .map_err(|e| PrintRelayError::Http(e.to_string()))?;
        Ok(Self {
            transport,
            http,
            timeout,
        })
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayReply {
    bytes_sent: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeReply {
    bytes_written: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchReply {
    job_id: JobId,
    device_id: Option<DeviceId>,
    #[serde(default)]
    queued: bool,
}

fn http_error(e: reqwest::Error) -> PrintRelayError {
    PrintRelayError::Http(e.to_string())
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

/// Decode a JSON reply, mapping error bodies back onto `PrintRelayError`.
async fn read_reply<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await.map_err(http_error)?;
    if status.is_success() {
        return serde_json::from_str(&text)
            .map_err(|e| PrintRelayError::Http(format!("unexpected reply: {e}")));
    }

    let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if text.is_empty() {
                format!("HTTP {status}")
            } else {
                text.clone()
            }
        });
    let stage = body
        .get("stage")
        .cloned()
        .and_then(|s| serde_json::from_value::<RelayStage>(s).ok());
    let code = body.get("code").and_then(Value::as_str).unwrap_or_default();
    let count = |field: &str| body.get(field).and_then(Value::as_u64).unwrap_or(0) as usize;

    Err(match (status.as_u16(), stage) {
        (401, _) => PrintRelayError::Unauthenticated,
        (403, _) => PrintRelayError::Forbidden(message),
        (409, _) if code == "connect_in_progress" => PrintRelayError::ConnectInProgress,
        (409, _) => PrintRelayError::WriteInProgress,
        (413, _) => PrintRelayError::PayloadTooLarge {
            size: count("size"),
            limit: count("limit"),
        },
        (503, _) if code == "connection_closed" => PrintRelayError::ConnectionClosed,
        (503, _) => PrintRelayError::NotConnected,
        (_, Some(stage)) => PrintRelayError::Relay {
            stage,
            detail: body
                .get("details")
                .and_then(Value::as_str)
                .unwrap_or(&message)
                .to_string(),
        },
        _ => PrintRelayError::Http(format!("{status}: {message}")),
    })
}

#[async_trait]
impl PrintTransport for TransportClient {
    fn name(&self) -> &'static str {
        match self.transport {
            Transport::DirectSocket { .. } => "direct socket",
            Transport::LocalBridge { .. } => "local bridge",
            Transport::MediatedRelay { .. } => "mediated relay",
        }
    }

    #[instrument(skip(self, job), fields(transport = self.name(), job_id = %job.id, bytes = job.payload.len()))]
    async fn deliver(&self, job: &PrintJob, order_ref: &str) -> Result<Delivery> {
        let delivery = match &self.transport {
            Transport::DirectSocket {
                ip,
                port,
                relay_url: None,
            } => {
                let bytes = raw_client::send_raw(ip, *port, job.payload.as_bytes(), self.timeout).await?;
                Delivery::Printed { bytes }
            }
            Transport::DirectSocket {
                ip,
                port,
                relay_url: Some(relay),
            } => {
                let response = self
                    .http
                    .post(endpoint(relay, "/network-print"))
                    .json(&json!({ "ip": ip, "port": port, "data": job.payload.to_base64() }))
                    .send()
                    .await
                    .map_err(http_error)?;
                let reply: RelayReply = read_reply(response).await?;
                Delivery::Printed {
                    bytes: reply.bytes_sent,
                }
            }
            Transport::LocalBridge { base_url } => {
                let response = self
                    .http
                    .post(endpoint(base_url, "/print"))
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(job.payload.as_bytes().to_vec())
                    .send()
                    .await
                    .map_err(http_error)?;
                let reply: BridgeReply = read_reply(response).await?;
                Delivery::Printed {
                    bytes: reply.bytes_written,
                }
            }
            Transport::MediatedRelay {
                dispatch_url,
                token,
                user_id,
            } => {
                let response = self
                    .http
                    .post(endpoint(dispatch_url, "/send-print-job"))
                    .bearer_auth(token)
                    .json(&json!({
                        "userId": user_id,
                        "orderRef": order_ref,
                        "payloadBase64": job.payload.to_base64(),
                        "documentType": job.document_type,
                    }))
                    .send()
                    .await
                    .map_err(http_error)?;
                let reply: DispatchReply = read_reply(response).await?;
                Delivery::Dispatched {
                    job_id: reply.job_id,
                    device_id: reply.device_id,
                    queued: reply.queued,
                }
            }
        };
        info!(?delivery, "job delivered");
        Ok(delivery)
    }

    async fn remote_status(&self, job_id: &JobId) -> Result<RemoteStatus> {
        let Transport::MediatedRelay {
            dispatch_url,
            token,
            ..
        } = &self.transport
        else {
            return Err(PrintRelayError::Validation(format!(
                "{} does not track job {job_id} remotely",
                self.name()
            )));
        };
        let response = self
            .http
            .get(endpoint(dispatch_url, &format!("/print-jobs/{job_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(http_error)?;
        let status: RemoteStatus = read_reply(response).await?;
        debug!(job_id = %job_id, status = status.status.as_str(), "remote status");
        Ok(status)
    }
}
