// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded print history kept by the submitting client.
//
// Holds the most recent `max_size` jobs, newest first.  Adding past the
// bound evicts the oldest job whatever its status.  Every mutation that
// leaves jobs behind rewrites the stored history; a mutation that empties
// the history removes the stored key.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use printrelay_core::error::Result;
use printrelay_core::types::{DeviceId, DocumentType, JobId, JobStatus, Payload, PrintJob};

use crate::storage::{KeyValueStore, QUEUE_KEY};

pub const MAX_QUEUE_SIZE: usize = 3;

pub struct PrintQueue {
    store: Arc<dyn KeyValueStore>,
    max_size: usize,
    jobs: Vec<PrintJob>,
}

impl PrintQueue {
    /// Restore the history from `store`.
    ///
    /// An unreadable stored value is logged and replaced by an empty history.
    pub fn load(store: Arc<dyn KeyValueStore>, max_size: usize) -> Result<Self> {
        let max_size = max_size.max(1);
        let mut jobs = match store.get(QUEUE_KEY)? {
            Some(text) => match serde_json::from_str::<Vec<PrintJob>>(&text) {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(error = %e, "stored print history unreadable, starting empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        jobs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        jobs.truncate(max_size);
        debug!(jobs = jobs.len(), "print history loaded");
        Ok(Self {
            store,
            max_size,
            jobs,
        })
    }

    /// Jobs, newest first.
    pub fn jobs(&self) -> &[PrintJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, id: &JobId) -> Option<&PrintJob> {
        self.jobs.iter().find(|j| j.id == *id)
    }

    /// Record a new pending job and return its id.
    pub fn enqueue(
        &mut self,
        document_type: DocumentType,
        document_number: Option<u32>,
        payload: Payload,
    ) -> Result<JobId> {
        self.add(PrintJob::new(document_type, document_number, payload))
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn add(&mut self, job: PrintJob) -> Result<JobId> {
        let id = job.id;
        self.jobs.insert(0, job);
        self.jobs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if self.jobs.len() > self.max_size {
            let evicted = self.jobs.split_off(self.max_size);
            for old in &evicted {
                debug!(evicted = %old.id, status = old.status.as_str(), "oldest job evicted");
            }
        }
        self.persist()?;
        Ok(id)
    }

    /// Move a job to `status`.
    ///
    /// Unknown ids and backward moves leave the history untouched; the
    /// return value says whether anything changed.
    pub fn update_status(&mut self, id: &JobId, status: JobStatus, error: Option<String>) -> Result<bool> {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == *id) else {
            return Ok(false);
        };
        if !job.status.can_advance_to(status) {
            debug!(job_id = %id, from = job.status.as_str(), to = status.as_str(), "status regression ignored");
            return Ok(false);
        }
        if job.status == status && job.error == error {
            return Ok(false);
        }
        job.status = status;
        job.error = error;
        self.persist()?;
        Ok(true)
    }

    /// Record the device a job was routed to.
    pub fn set_device(&mut self, id: &JobId, device: DeviceId) -> Result<bool> {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == *id) else {
            return Ok(false);
        };
        if job.device_id.as_ref() == Some(&device) {
            return Ok(false);
        }
        job.device_id = Some(device);
        self.persist()?;
        Ok(true)
    }

    /// Explicitly put a job back to `pending`, clearing its error.
    pub fn reset(&mut self, id: &JobId) -> Result<bool> {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == *id) else {
            return Ok(false);
        };
        job.status = JobStatus::Pending;
        job.error = None;
        self.persist()?;
        Ok(true)
    }

    pub fn remove(&mut self, id: &JobId) -> Result<bool> {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.id != *id);
        if self.jobs.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Drop finished jobs (`success` / `error`); in-flight ones stay.
    pub fn clear_completed(&mut self) -> Result<usize> {
        let before = self.jobs.len();
        self.jobs.retain(|j| !j.status.is_finished());
        let removed = before - self.jobs.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn clear_all(&mut self) -> Result<()> {
        self.jobs.clear();
        self.persist()?;
        info!("print history cleared");
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        if self.jobs.is_empty() {
            self.store.remove(QUEUE_KEY)
        } else {
            self.store.set(QUEUE_KEY, &serde_json::to_string(&self.jobs)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::Duration;

    fn queue() -> (Arc<MemoryStore>, PrintQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = PrintQueue::load(store.clone(), MAX_QUEUE_SIZE).unwrap();
        (store, queue)
    }

    fn job_at(minutes_ago: i64) -> PrintJob {
        let mut job = PrintJob::new(DocumentType::Order, Some(7), Payload::from(vec![0x1B, 0x40]));
        job.timestamp = chrono::Utc::now() - Duration::minutes(minutes_ago);
        job
    }

    #[test]
    fn fourth_job_evicts_the_oldest_even_if_pending() {
        let (_, mut q) = queue();
        let oldest = q.add(job_at(30)).unwrap();
        q.add(job_at(20)).unwrap();
        q.add(job_at(10)).unwrap();
        let newest = q.add(job_at(0)).unwrap();

        assert_eq!(q.len(), 3);
        assert!(q.get(&oldest).is_none());
        assert_eq!(q.jobs()[0].id, newest);
        assert!(q.jobs().windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[test]
    fn history_survives_reload() {
        let (store, mut q) = queue();
        let id = q
            .enqueue(DocumentType::Receipt, Some(12), Payload::from(vec![0x00, 0xFF]))
            .unwrap();
        q.update_status(&id, JobStatus::Success, None).unwrap();

        let restored = PrintQueue::load(store, MAX_QUEUE_SIZE).unwrap();
        let job = restored.get(&id).expect("restored");
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.payload.as_bytes(), &[0x00, 0xFF]);
    }

    #[test]
    fn clear_completed_keeps_in_flight_jobs() {
        let (_, mut q) = queue();
        let pending = q.add(job_at(3)).unwrap();
        let sending = q.add(job_at(2)).unwrap();
        let failed = q.add(job_at(1)).unwrap();
        q.update_status(&sending, JobStatus::Sending, None).unwrap();
        q.update_status(&failed, JobStatus::Error, Some("paper out".into())).unwrap();

        assert_eq!(q.clear_completed().unwrap(), 1);
        assert!(q.get(&pending).is_some());
        assert!(q.get(&sending).is_some());
        assert!(q.get(&failed).is_none());
    }

    #[test]
    fn unknown_id_and_regressions_are_no_ops() {
        let (_, mut q) = queue();
        assert!(!q.update_status(&JobId::new(), JobStatus::Success, None).unwrap());

        let id = q.add(job_at(0)).unwrap();
        assert!(q.update_status(&id, JobStatus::Success, None).unwrap());
        assert!(!q.update_status(&id, JobStatus::Sending, None).unwrap());
        assert_eq!(q.get(&id).unwrap().status, JobStatus::Success);

        assert!(q.reset(&id).unwrap());
        assert_eq!(q.get(&id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn emptying_the_history_removes_the_stored_key() {
        let (store, mut q) = queue();
        let id = q.add(job_at(0)).unwrap();
        assert!(store.get(QUEUE_KEY).unwrap().is_some());

        assert!(q.remove(&id).unwrap());
        assert!(store.get(QUEUE_KEY).unwrap().is_none());

        q.add(job_at(0)).unwrap();
        q.clear_all().unwrap();
        assert!(q.is_empty());
        assert!(store.get(QUEUE_KEY).unwrap().is_none());
    }

    #[test]
    fn corrupt_history_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(QUEUE_KEY, "not json").unwrap();
        let q = PrintQueue::load(store, MAX_QUEUE_SIZE).unwrap();
        assert!(q.is_empty());
    }
}
