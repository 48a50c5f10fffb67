// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One-shot client commands: discovery sweep and file submission.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::info;

use printrelay_client::{
    Delivery, FileStore, PrintController, PrintQueue, PrintRequest, Transport, TransportClient,
};
use printrelay_core::AppConfig;
use printrelay_core::config::DiscoveryConfig;
use printrelay_core::error::{PrintRelayError, Result};
use printrelay_core::human_errors::humanize_error;
use printrelay_core::types::{DocumentType, JobStatus, Payload};
use printrelay_print::NetworkDiscovery;

use crate::Via;

/// Transport options collected from the command line.
pub struct Route {
    pub via: Via,
    pub ip: Option<String>,
    pub port: u16,
    pub relay_url: Option<String>,
    pub bridge_url: String,
    pub dispatch_url: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<String>,
}

fn required(value: Option<String>, flag: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PrintRelayError::Validation(format!("--{flag} is required for this route")))
}

pub fn pick_transport(route: Route) -> Result<Transport> {
    Ok(match route.via {
        Via::Direct => Transport::DirectSocket {
            ip: required(route.ip, "ip")?,
            port: route.port,
            relay_url: route.relay_url,
        },
        Via::Bridge => Transport::LocalBridge {
            base_url: route.bridge_url,
        },
        Via::Dispatch => Transport::MediatedRelay {
            dispatch_url: required(route.dispatch_url, "dispatch-url")?,
            token: required(route.token, "token")?,
            user_id: required(route.user_id, "user-id")?,
        },
    })
}

pub async fn discover(config: &DiscoveryConfig, subnet: Option<&str>) -> Result<()> {
    let report = NetworkDiscovery::new(config.clone()).sweep(subnet).await?;
    println!("{}", report.message);
    for printer in &report.printers {
        println!(
            "  {}:{}  {}  {} ms",
            printer.address, printer.port, printer.name, printer.latency_ms
        );
    }
    Ok(())
}

pub async fn send_file(
    config: &AppConfig,
    transport: Transport,
    file: &Path,
    order_ref: &str,
    document_type: DocumentType,
    document_number: Option<u32>,
) -> Result<()> {
    let bytes = tokio::fs::read(file).await?;
    if bytes.is_empty() {
        return Err(PrintRelayError::Validation(format!("{} is empty", file.display())));
    }

    let store = Arc::new(FileStore::open(&config.client.storage_dir)?);
    let queue = Arc::new(Mutex::new(PrintQueue::load(store, config.client.max_queue_size)?));
    let client = TransportClient::new(transport, config.relay.timeout())?;
    let controller = PrintController::new(Arc::clone(&queue), Arc::new(client), (&config.client).into());

    let request = PrintRequest {
        document_type,
        document_number,
        order_ref: order_ref.to_string(),
        payload: Payload::from(bytes),
    };
    let outcome = match controller.print(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let human = humanize_error(&e);
            eprintln!("{}\n{}", human.message, human.suggestion);
            return Err(e);
        }
    };

    match &outcome.delivery {
        Delivery::Printed { bytes } => println!("Printed ({bytes} bytes)"),
        Delivery::Dispatched {
            job_id,
            device_id,
            queued: false,
        } => println!(
            "Sent to device {} (job {job_id})",
            device_id.as_ref().map(|d| d.as_str()).unwrap_or("?")
        ),
        Delivery::Dispatched {
            job_id, queued: true, ..
        } => {
            println!("Queued until a print bridge comes online (job {job_id})");
            let status = wait_for_finish(&controller, &outcome.job_id, config).await;
            println!("Final status: {}", status.as_str());
        }
    }
    Ok(())
}

/// Follow a queued job's history entry until it finishes or the poll window closes.
async fn wait_for_finish(
    controller: &PrintController,
    job_id: &printrelay_core::types::JobId,
    config: &AppConfig,
) -> JobStatus {
    let deadline = Instant::now() + config.client.poll_timeout();
    loop {
        let status = {
            let queue = controller.queue();
            let queue = queue.lock().expect("print queue lock poisoned");
            queue.get(job_id).map(|j| j.status).unwrap_or(JobStatus::Pending)
        };
        if status.is_finished() || Instant::now() >= deadline {
            info!(status = status.as_str(), "stopped following queued job");
            return status;
        }
        tokio::time::sleep(config.client.poll_interval()).await;
    }
}
