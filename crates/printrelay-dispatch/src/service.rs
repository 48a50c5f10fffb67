// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dispatch routing: submit, status, device heartbeat/claim/report.
//
// Every operation takes an authenticated `Caller`; authentication itself
// happens in the HTTP layer before any of this runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use printrelay_core::codec;
use printrelay_core::config::DispatchConfig;
use printrelay_core::error::{PrintRelayError, Result};
use printrelay_core::types::{DeviceId, DocumentType, JobId, JobStatus, Payload};
use printrelay_print::retry::{RetryConfig, RetryDecision, should_retry_detail};

use crate::auth::Caller;
use crate::registry::DeviceRegistry;
use crate::store::{DispatchJob, JobStore};

/// Longest a waiting claim sleeps before looking at the store again, so jobs
/// whose retry backoff expires are picked up without a wake-up.
const CLAIM_RECHECK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub user_id: String,
    pub order_ref: String,
    pub payload_base64: String,
    #[serde(default)]
    pub document_type: Option<DocumentType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub success: bool,
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    pub queued: bool,
    pub processing_time_ms: u64,
}

/// Read-only status of a stored job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<u64>,
}

/// A job handed to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedJob {
    pub job_id: JobId,
    pub order_ref: String,
    pub document_type: DocumentType,
    pub payload_base64: String,
    pub payload_sha256: String,
    pub attempt: u32,
}

impl From<DispatchJob> for ClaimedJob {
    fn from(job: DispatchJob) -> Self {
        Self {
            job_id: job.id,
            order_ref: job.order_ref,
            document_type: job.document_type,
            payload_base64: job.payload.to_base64(),
            payload_sha256: job.payload_sha256,
            attempt: job.attempts,
        }
    }
}

/// Outcome a device reports for a claimed job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultReport {
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub processing_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutcome {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// The dispatch service: durable store, device presence and retry policy.
pub struct DispatchService {
    store: Arc<Mutex<JobStore>>,
    registry: DeviceRegistry,
    retry: RetryConfig,
    claim_wait: Duration,
}

impl DispatchService {
    pub fn new(store: JobStore, config: &DispatchConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            registry: DeviceRegistry::new(config.presence_ttl()),
            retry: RetryConfig::with_max_attempts(config.max_attempts),
            claim_wait: config.claim_wait(),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Run `f` against the store on the blocking pool.
    async fn db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let guard = store.lock().expect("job store lock poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| PrintRelayError::Database(format!("store task failed: {e}")))?
    }

    /// Accept a job and route it to the caller's freshest online device.
    ///
    /// With no device online the job is stored for the next device of the
    /// account to claim and the receipt says `queued = true`.
    #[instrument(skip(self, request), fields(user = %caller.user_id, order = %request.order_ref))]
    pub async fn submit(&self, caller: &Caller, request: SubmitRequest) -> Result<SubmitReceipt> {
        let started = Instant::now();
        caller.require_print_role()?;
        if request.user_id != caller.user_id {
            return Err(PrintRelayError::Forbidden(
                "userId does not match the authenticated caller".into(),
            ));
        }
        if request.order_ref.trim().is_empty() {
            return Err(PrintRelayError::Validation("orderRef is required".into()));
        }
        let bytes = codec::decode(&request.payload_base64)?;
        if bytes.is_empty() {
            return Err(PrintRelayError::Validation("payload is empty".into()));
        }

        let owner = caller.user_id.clone();
        let online = self.registry.online_device(&owner);
        let reported = match &online {
            Some(device) => Some(device.clone()),
            None => {
                let owner = owner.clone();
                self.db(move |s| s.latest_device(&owner)).await?
            }
        };

        let job = DispatchJob::new(
            owner.clone(),
            request.order_ref,
            request.document_type.unwrap_or_default(),
            Payload::from(bytes),
            online.clone(),
            self.retry.max_attempts,
        );
        let job_id = job.id;
        self.db(move |s| s.insert(&job)).await?;
        self.registry.wake(&owner);

        let queued = online.is_none();
        info!(job_id = %job_id, queued, device = ?reported, "print job accepted");
        Ok(SubmitReceipt {
            success: true,
            job_id,
            device_id: reported,
            queued,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Status of one of the caller's jobs.  Other accounts' jobs read as missing.
    pub async fn status(&self, caller: &Caller, job_id: JobId) -> Result<JobStatusView> {
        let job = self
            .db(move |s| s.get(&job_id))
            .await?
            .filter(|job| job.owner == caller.user_id)
            .ok_or(PrintRelayError::JobNotFound(job_id))?;
        Ok(JobStatusView {
            status: job.status,
            error_message: job.error_message,
            finished_at: job.finished_at,
            processing_duration_ms: job.processing_duration_ms,
        })
    }

    /// Register `device` as online for the caller's account and return how
    /// many of the account's jobs are waiting to be claimed.
    pub async fn heartbeat(&self, caller: &Caller, device: &DeviceId) -> Result<usize> {
        self.touch(caller, device)?;
        let owner = caller.user_id.clone();
        self.db(move |store| store.pending_count(&owner)).await
    }

    fn touch(&self, caller: &Caller, device: &DeviceId) -> Result<()> {
        if let Some(owner) = self.registry.owner_of(device) {
            if owner != caller.user_id && self.registry.is_online(device) {
                return Err(PrintRelayError::Forbidden(format!(
                    "device {device} belongs to another account"
                )));
            }
        }
        self.registry.heartbeat(&caller.user_id, device);
        Ok(())
    }

    /// Hand the next job to `device`, waiting up to `wait` for one to arrive.
    #[instrument(skip(self, caller), fields(user = %caller.user_id, device = %device))]
    pub async fn claim(
        &self,
        caller: &Caller,
        device: &DeviceId,
        wait: Option<Duration>,
    ) -> Result<Option<ClaimedJob>> {
        self.touch(caller, device)?;

        let deadline = Instant::now() + wait.unwrap_or(self.claim_wait).min(self.claim_wait);
        let waker = self.registry.waker(&caller.user_id);
        loop {
            let notified = waker.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let owner = caller.user_id.clone();
            let target = device.clone();
            if let Some(job) = self.db(move |s| s.claim_next(&owner, &target)).await? {
                return Ok(Some(job.into()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout((deadline - now).min(CLAIM_RECHECK), notified).await;
        }
    }

    /// Record the device's outcome for a claimed job.
    ///
    /// Transient failures go back to the queue while attempts remain;
    /// anything else ends the job as `error`.
    #[instrument(skip(self, caller, report), fields(device = %device, job_id = %job_id))]
    pub async fn report(
        &self,
        caller: &Caller,
        device: &DeviceId,
        job_id: JobId,
        report: ResultReport,
    ) -> Result<ReportOutcome> {
        let job = self
            .db(move |s| s.get(&job_id))
            .await?
            .filter(|job| job.owner == caller.user_id)
            .ok_or(PrintRelayError::JobNotFound(job_id))?;

        if job.status != JobStatus::Sending || job.device_id.as_ref() != Some(device) {
            return Err(PrintRelayError::Validation(format!(
                "job {job_id} is not claimed by device {device}"
            )));
        }

        let duration = report.processing_duration_ms;
        if report.success {
            self.db(move |s| s.finish(&job_id, JobStatus::Success, None, duration))
                .await?;
            info!("job printed");
            return Ok(ReportOutcome {
                status: JobStatus::Success,
                retry_after_ms: None,
            });
        }

        let message = report
            .error_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "device reported a failure".to_string());

        match should_retry_detail(&message, job.attempts, &self.retry) {
            RetryDecision::RetryAfter(delay) => {
                let available_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                let text = message.clone();
                self.db(move |s| s.requeue(&job_id, &text, available_at)).await?;
                warn!(error = %message, attempt = job.attempts, "job requeued for retry");
                Ok(ReportOutcome {
                    status: JobStatus::Pending,
                    retry_after_ms: Some(delay.as_millis() as u64),
                })
            }
            RetryDecision::GiveUp(_) | RetryDecision::Exhausted => {
                self.db(move |s| s.finish(&job_id, JobStatus::Error, Some(&message), duration))
                    .await?;
                warn!("job failed");
                Ok(ReportOutcome {
                    status: JobStatus::Error,
                    retry_after_ms: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn service() -> DispatchService {
        let config = DispatchConfig {
            claim_wait_ms: 200,
            ..DispatchConfig::default()
        };
        DispatchService::new(JobStore::open_in_memory().expect("store"), &config)
    }

    fn attendant(user: &str) -> Caller {
        Caller {
            user_id: user.into(),
            role: Role::Attendant,
        }
    }

    fn request(user: &str, bytes: &[u8]) -> SubmitRequest {
        SubmitRequest {
            user_id: user.into(),
            order_ref: "OS-77".into(),
            payload_base64: codec::encode(bytes),
            document_type: None,
        }
    }

    #[tokio::test]
    async fn offline_submit_is_queued_then_completes() {
        let svc = service();
        let caller = attendant("user-1");

        let receipt = svc.submit(&caller, request("user-1", b"\x1b@hi")).await.unwrap();
        assert!(receipt.queued);
        assert_eq!(receipt.device_id, None);
        assert_eq!(svc.status(&caller, receipt.job_id).await.unwrap().status, JobStatus::Pending);

        let device = DeviceId::from("bridge-a");
        assert_eq!(svc.heartbeat(&caller, &device).await.unwrap(), 1);
        let claimed = svc
            .claim(&caller, &device, Some(Duration::ZERO))
            .await
            .unwrap()
            .expect("job");
        assert_eq!(codec::decode(&claimed.payload_base64).unwrap(), b"\x1b@hi");

        let outcome = svc
            .report(
                &caller,
                &device,
                claimed.job_id,
                ResultReport {
                    success: true,
                    error_message: None,
                    processing_duration_ms: Some(420),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Success);

        let view = svc.status(&caller, receipt.job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Success);
        assert_eq!(view.processing_duration_ms, Some(420));
        assert!(view.finished_at.is_some());
    }

    #[tokio::test]
    async fn online_device_gets_the_job_directly() {
        let svc = service();
        let caller = attendant("user-1");
        let device = DeviceId::from("bridge-a");
        assert_eq!(svc.heartbeat(&caller, &device).await.unwrap(), 0);

        let receipt = svc.submit(&caller, request("user-1", b"x")).await.unwrap();
        assert!(!receipt.queued);
        assert_eq!(receipt.device_id, Some(device.clone()));

        // A different device of the same account cannot take a targeted job.
        let other = DeviceId::from("bridge-b");
        assert!(svc.claim(&caller, &other, Some(Duration::ZERO)).await.unwrap().is_none());
        assert!(svc.claim(&caller, &device, Some(Duration::ZERO)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn queued_receipt_names_the_last_used_device() {
        let svc = service();
        let caller = attendant("user-1");
        let device = DeviceId::from("bridge-a");

        svc.submit(&caller, request("user-1", b"1")).await.unwrap();
        svc.claim(&caller, &device, Some(Duration::ZERO)).await.unwrap().expect("job");

        // Same store, no presence: only the job history can name the device.
        let svc_offline = DispatchService {
            store: Arc::clone(&svc.store),
            registry: DeviceRegistry::new(Duration::from_secs(120)),
            retry: RetryConfig::default(),
            claim_wait: Duration::ZERO,
        };
        let receipt = svc_offline.submit(&caller, request("user-1", b"2")).await.unwrap();
        assert!(receipt.queued);
        assert_eq!(receipt.device_id, Some(device));
    }

    #[tokio::test]
    async fn waiting_claim_wakes_on_submit() {
        let svc = Arc::new(service());
        let caller = attendant("user-1");
        let device = DeviceId::from("bridge-a");

        let waiter = {
            let svc = Arc::clone(&svc);
            let caller = caller.clone();
            let device = device.clone();
            tokio::spawn(async move { svc.claim(&caller, &device, None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        svc.submit(&caller, request("user-1", b"late")).await.unwrap();

        let claimed = waiter.await.unwrap().unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_exhausted() {
        let svc = service();
        let caller = attendant("user-1");
        let device = DeviceId::from("bridge-a");
        let receipt = svc.submit(&caller, request("user-1", b"x")).await.unwrap();

        let failed = || ResultReport {
            success: false,
            error_message: Some("serial timed out".into()),
            processing_duration_ms: None,
        };

        let first = svc.claim(&caller, &device, Some(Duration::ZERO)).await.unwrap().expect("job");
        let outcome = svc.report(&caller, &device, first.job_id, failed()).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Pending);
        assert!(outcome.retry_after_ms.is_some());

        // Skip the backoff.
        {
            let store = svc.store.lock().unwrap();
            store.requeue(&receipt.job_id, "serial timed out", Utc::now()).unwrap();
        }
        let second = svc.claim(&caller, &device, Some(Duration::ZERO)).await.unwrap().expect("job");
        assert_eq!(second.attempt, 2);
        let outcome = svc.report(&caller, &device, second.job_id, failed()).await.unwrap();
        assert_eq!(outcome.status, JobStatus::Error);

        let view = svc.status(&caller, receipt.job_id).await.unwrap();
        assert_eq!(view.error_message.as_deref(), Some("serial timed out"));
    }

    #[tokio::test]
    async fn out_of_paper_fails_without_retry() {
        let svc = service();
        let caller = attendant("user-1");
        let device = DeviceId::from("bridge-a");
        svc.submit(&caller, request("user-1", b"x")).await.unwrap();
        let job = svc.claim(&caller, &device, Some(Duration::ZERO)).await.unwrap().expect("job");

        let outcome = svc
            .report(
                &caller,
                &device,
                job.job_id,
                ResultReport {
                    success: false,
                    error_message: Some("printer out of paper".into()),
                    processing_duration_ms: Some(10),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Error);
    }

    #[tokio::test]
    async fn submit_preconditions() {
        let svc = service();
        let viewer = Caller {
            user_id: "user-1".into(),
            role: Role::Other("viewer".into()),
        };
        assert!(matches!(
            svc.submit(&viewer, request("user-1", b"x")).await,
            Err(PrintRelayError::Forbidden(_))
        ));

        let caller = attendant("user-1");
        assert!(matches!(
            svc.submit(&caller, request("user-2", b"x")).await,
            Err(PrintRelayError::Forbidden(_))
        ));

        let mut bad = request("user-1", b"x");
        bad.payload_base64 = "***".into();
        assert!(matches!(
            svc.submit(&caller, bad).await,
            Err(PrintRelayError::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn other_accounts_cannot_read_a_job() {
        let svc = service();
        let receipt = svc.submit(&attendant("user-1"), request("user-1", b"x")).await.unwrap();
        assert!(matches!(
            svc.status(&attendant("user-2"), receipt.job_id).await,
            Err(PrintRelayError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn report_from_wrong_device_is_rejected() {
        let svc = service();
        let caller = attendant("user-1");
        svc.submit(&caller, request("user-1", b"x")).await.unwrap();
        let job = svc
            .claim(&caller, &DeviceId::from("bridge-a"), Some(Duration::ZERO))
            .await
            .unwrap()
            .expect("job");

        let err = svc
            .report(
                &caller,
                &DeviceId::from("bridge-b"),
                job.job_id,
                ResultReport {
                    success: true,
                    error_message: None,
                    processing_duration_ms: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PrintRelayError::Validation(_)));
    }
}
