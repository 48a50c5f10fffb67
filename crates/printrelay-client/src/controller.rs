// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The print controller: what the order screen's "Print" button calls.
//
// One print at a time.  A call made while another is in flight is dropped
// with `ClientBusy`.  The visible status goes idle -> sending -> waiting ->
// success | error and falls back to idle on a timer (2 s after success, 3 s
// after error); a new print cancels a pending fallback.  Jobs the dispatch
// service queued are polled in the background until they finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use printrelay_core::config::ClientConfig;
use printrelay_core::error::{PrintRelayError, Result};
use printrelay_core::human_errors::humanize_error;
use printrelay_core::types::{DocumentType, JobId, JobStatus, Payload};

use crate::queue::PrintQueue;
use crate::transport::{Delivery, PrintTransport};

/// Status shown next to the print button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintStatus {
    Idle,
    Sending,
    Waiting,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub status: PrintStatus,
    /// Local id of the job the status refers to.
    pub job_id: Option<JobId>,
    /// Message for the user: the humanized error, or a note that the job queued.
    pub message: Option<String>,
}

impl ControllerState {
    fn idle() -> Self {
        Self {
            status: PrintStatus::Idle,
            job_id: None,
            message: None,
        }
    }
}

/// Timers used by the controller.
#[derive(Debug, Clone)]
pub struct ControllerTimings {
    pub success_reset: Duration,
    pub error_reset: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl From<&ClientConfig> for ControllerTimings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            success_reset: config.success_reset(),
            error_reset: config.error_reset(),
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
        }
    }
}

/// Result of a print call.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintOutcome {
    pub job_id: JobId,
    pub delivery: Delivery,
}

/// A document to print.
#[derive(Debug, Clone)]
pub struct PrintRequest {
    pub document_type: DocumentType,
    pub document_number: Option<u32>,
    pub order_ref: String,
    pub payload: Payload,
}

#[derive(Clone)]
pub struct PrintController {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Arc<Mutex<PrintQueue>>,
    transport: Arc<dyn PrintTransport>,
    timings: ControllerTimings,
    busy: AtomicBool,
    state: watch::Sender<ControllerState>,
    reset_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Releases the in-flight guard however `print` exits.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PrintController {
    pub fn new(
        queue: Arc<Mutex<PrintQueue>>,
        transport: Arc<dyn PrintTransport>,
        timings: ControllerTimings,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::idle());
        Self {
            inner: Arc::new(Inner {
                queue,
                transport,
                timings,
                busy: AtomicBool::new(false),
                state,
                reset_timer: Mutex::new(None),
            }),
        }
    }

    pub fn queue(&self) -> Arc<Mutex<PrintQueue>> {
        Arc::clone(&self.inner.queue)
    }

    pub fn state(&self) -> ControllerState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Back to idle now, cancelling any scheduled fallback.
    pub fn reset(&self) {
        self.cancel_reset_timer();
        self.inner.state.send_replace(ControllerState::idle());
    }

    /// Record `request` in the history and deliver it.
    #[instrument(skip(self, request), fields(order = %request.order_ref, bytes = request.payload.len()))]
    pub async fn print(&self, request: PrintRequest) -> Result<PrintOutcome> {
        if self.inner.busy.swap(true, Ordering::AcqRel) {
            info!("print already in flight, call dropped");
            return Err(PrintRelayError::ClientBusy);
        }
        let _guard = BusyGuard(&self.inner.busy);
        self.cancel_reset_timer();

        let job_id = self.with_queue(|q| {
            q.enqueue(request.document_type, request.document_number, request.payload.clone())
        })?;
        self.set_state(PrintStatus::Sending, job_id, None);
        self.advance(&job_id, JobStatus::Sending, None);

        let job = self
            .with_queue(|q| Ok(q.get(&job_id).cloned()))?
            .ok_or(PrintRelayError::JobNotFound(job_id))?;

        self.set_state(PrintStatus::Waiting, job_id, None);
        match self.inner.transport.deliver(&job, &request.order_ref).await {
            Ok(delivery) => {
                self.on_delivered(job_id, &delivery);
                Ok(PrintOutcome { job_id, delivery })
            }
            Err(e) => {
                let human = humanize_error(&e);
                warn!(error = %e, "print failed");
                self.advance(&job_id, JobStatus::Error, Some(e.to_string()));
                self.set_state(PrintStatus::Error, job_id, Some(human.message));
                self.schedule_reset(self.inner.timings.error_reset);
                Err(e)
            }
        }
    }

    fn on_delivered(&self, job_id: JobId, delivery: &Delivery) {
        match delivery {
            Delivery::Printed { bytes } => {
                debug!(bytes, "printer accepted the job");
                self.advance(&job_id, JobStatus::Success, None);
                self.set_state(PrintStatus::Success, job_id, None);
            }
            Delivery::Dispatched {
                job_id: remote_id,
                device_id,
                queued,
            } => {
                if let Some(device) = device_id {
                    if let Err(e) = self.with_queue(|q| q.set_device(&job_id, device.clone())) {
                        warn!(error = %e, "could not record the device");
                    }
                }
                if *queued {
                    self.advance(&job_id, JobStatus::Waiting, None);
                    self.set_state(
                        PrintStatus::Success,
                        job_id,
                        Some("Print job queued until a print bridge comes online".into()),
                    );
                    self.spawn_status_poll(job_id, *remote_id);
                } else {
                    self.advance(&job_id, JobStatus::Success, None);
                    self.set_state(PrintStatus::Success, job_id, None);
                }
            }
        }
        self.schedule_reset(self.inner.timings.success_reset);
    }

    fn with_queue<T>(&self, f: impl FnOnce(&mut PrintQueue) -> Result<T>) -> Result<T> {
        let mut queue = self.inner.queue.lock().expect("print queue lock poisoned");
        f(&mut queue)
    }

    /// Move the history entry forward.  Failures are logged, not returned:
    /// the controller status already carries the outcome.
    fn advance(&self, job_id: &JobId, status: JobStatus, error: Option<String>) {
        advance(&self.inner.queue, job_id, status, error);
    }

    fn set_state(&self, status: PrintStatus, job_id: JobId, message: Option<String>) {
        self.inner.state.send_replace(ControllerState {
            status,
            job_id: Some(job_id),
            message,
        });
    }

    fn cancel_reset_timer(&self) {
        let mut timer = self.inner.reset_timer.lock().expect("reset timer lock poisoned");
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    fn schedule_reset(&self, after: Duration) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            inner.state.send_replace(ControllerState::idle());
        });
        let mut timer = self.inner.reset_timer.lock().expect("reset timer lock poisoned");
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    fn spawn_status_poll(&self, local_id: JobId, remote_id: JobId) {
        let queue = Arc::clone(&self.inner.queue);
        let transport = Arc::clone(&self.inner.transport);
        let interval = self.inner.timings.poll_interval;
        let window = self.inner.timings.poll_timeout;
        let deadline = Instant::now() + window;
        tokio::spawn(async move {
            while Instant::now() < deadline {
                tokio::time::sleep(interval).await;
                match transport.remote_status(&remote_id).await {
                    Ok(remote) if remote.status.is_finished() => {
                        info!(job_id = %remote_id, status = remote.status.as_str(), "queued job finished");
                        advance(&queue, &local_id, remote.status, remote.error_message);
                        return;
                    }
                    Ok(remote) => debug!(job_id = %remote_id, status = remote.status.as_str(), "queued job still open"),
                    Err(e) => debug!(job_id = %remote_id, error = %e, "status poll failed"),
                }
            }
            warn!(job_id = %remote_id, "gave up polling queued job");
            advance(
                &queue,
                &local_id,
                JobStatus::Error,
                Some(format!("no result from dispatch within {window:?}")),
            );
        });
    }
}

fn advance(queue: &Mutex<PrintQueue>, job_id: &JobId, status: JobStatus, error: Option<String>) {
    let mut queue = queue.lock().expect("print queue lock poisoned");
    if let Err(e) = queue.update_status(job_id, status, error) {
        warn!(job_id = %job_id, error = %e, "could not persist job status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use printrelay_core::error::RelayStage;
    use printrelay_core::types::PrintJob;

    use crate::queue::MAX_QUEUE_SIZE;
    use crate::storage::MemoryStore;
    use crate::transport::RemoteStatus;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Print,
        Fail,
        Queue,
    }

    struct FakeTransport {
        behaviour: Behaviour,
        delay: Duration,
        calls: AtomicUsize,
        remote: Mutex<VecDeque<JobStatus>>,
    }

    impl FakeTransport {
        fn new(behaviour: Behaviour, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                delay,
                calls: AtomicUsize::new(0),
                remote: Mutex::new(VecDeque::new()),
            })
        }
    }

    #[async_trait]
    impl PrintTransport for FakeTransport {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn deliver(&self, job: &PrintJob, _order_ref: &str) -> Result<Delivery> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match self.behaviour {
                Behaviour::Print => Ok(Delivery::Printed {
                    bytes: job.payload.len(),
                }),
                Behaviour::Fail => Err(PrintRelayError::relay(RelayStage::Connect, "connection refused")),
                Behaviour::Queue => Ok(Delivery::Dispatched {
                    job_id: JobId::new(),
                    device_id: None,
                    queued: true,
                }),
            }
        }

        async fn remote_status(&self, _job_id: &JobId) -> Result<RemoteStatus> {
            let status = self
                .remote
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(JobStatus::Success);
            Ok(RemoteStatus {
                status,
                error_message: None,
                finished_at: None,
                processing_duration_ms: None,
            })
        }
    }

    fn timings() -> ControllerTimings {
        ControllerTimings {
            success_reset: Duration::from_millis(40),
            error_reset: Duration::from_millis(60),
            poll_interval: Duration::from_millis(10),
            poll_timeout: Duration::from_secs(2),
        }
    }

    fn controller(transport: Arc<FakeTransport>) -> PrintController {
        controller_with(transport, timings())
    }

    fn controller_with(transport: Arc<FakeTransport>, timings: ControllerTimings) -> PrintController {
        let queue = PrintQueue::load(Arc::new(MemoryStore::new()), MAX_QUEUE_SIZE).unwrap();
        PrintController::new(Arc::new(Mutex::new(queue)), transport, timings)
    }

    fn request() -> PrintRequest {
        PrintRequest {
            document_type: DocumentType::Order,
            document_number: Some(1042),
            order_ref: "OS-1042".into(),
            payload: Payload::from(vec![0x1B, 0x40, 0x0A]),
        }
    }

    fn queued_status(ctl: &PrintController, id: &JobId) -> JobStatus {
        ctl.queue().lock().unwrap().get(id).expect("job").status
    }

    #[tokio::test]
    async fn success_then_resets_to_idle() {
        let ctl = controller(FakeTransport::new(Behaviour::Print, Duration::ZERO));
        let outcome = ctl.print(request()).await.unwrap();

        assert_eq!(outcome.delivery, Delivery::Printed { bytes: 3 });
        assert_eq!(ctl.state().status, PrintStatus::Success);
        assert_eq!(queued_status(&ctl, &outcome.job_id), JobStatus::Success);
        assert!(!ctl.is_busy());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(ctl.state(), ControllerState::idle());
    }

    #[tokio::test]
    async fn overlapping_print_is_dropped() {
        let transport = FakeTransport::new(Behaviour::Print, Duration::from_millis(50));
        let ctl = controller(Arc::clone(&transport));

        let first = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.print(request()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = ctl.print(request()).await;

        assert!(matches!(second, Err(PrintRelayError::ClientBusy)));
        assert!(first.await.unwrap().is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.queue().lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_reaches_history_and_status() {
        let ctl = controller(FakeTransport::new(Behaviour::Fail, Duration::ZERO));
        let err = ctl.print(request()).await.unwrap_err();
        assert_eq!(err.stage(), Some(RelayStage::Connect));

        let state = ctl.state();
        assert_eq!(state.status, PrintStatus::Error);
        assert!(state.message.is_some());

        let queue = ctl.queue();
        let queue = queue.lock().unwrap();
        let job = &queue.jobs()[0];
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn new_print_supersedes_pending_reset() {
        let transport = FakeTransport::new(Behaviour::Print, Duration::from_millis(80));
        let ctl = controller(transport);
        ctl.print(request()).await.unwrap();

        let second = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.print(request()).await })
        };
        // Past the first job's 40 ms fallback, while the second is in flight.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(ctl.state().status, PrintStatus::Waiting);
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn queued_job_is_polled_to_completion() {
        let transport = FakeTransport::new(Behaviour::Queue, Duration::ZERO);
        transport.remote.lock().unwrap().extend([JobStatus::Pending, JobStatus::Sending]);
        let ctl = controller(Arc::clone(&transport));

        let outcome = ctl.print(request()).await.unwrap();
        assert!(matches!(outcome.delivery, Delivery::Dispatched { queued: true, .. }));
        assert_eq!(queued_status(&ctl, &outcome.job_id), JobStatus::Waiting);

        let deadline = Instant::now() + Duration::from_secs(1);
        while queued_status(&ctl, &outcome.job_id) != JobStatus::Success {
            assert!(Instant::now() < deadline, "queued job never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn unanswered_queued_job_ends_as_error() {
        let transport = FakeTransport::new(Behaviour::Queue, Duration::ZERO);
        transport.remote.lock().unwrap().extend([JobStatus::Pending; 1000]);
        let ctl = controller_with(
            Arc::clone(&transport),
            ControllerTimings {
                poll_timeout: Duration::from_millis(60),
                ..timings()
            },
        );

        let outcome = ctl.print(request()).await.unwrap();
        assert_eq!(queued_status(&ctl, &outcome.job_id), JobStatus::Waiting);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let queue = ctl.queue();
        let queue = queue.lock().unwrap();
        let job = queue.get(&outcome.job_id).expect("job");
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.as_deref().unwrap().contains("no result from dispatch"));
    }
}
