// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable dispatch job store backed by SQLite.
//
// Jobs are kept with their base64 payload and its SHA-256 so a device always
// receives exactly the submitted bytes.  Status moves pending -> sending
// (claimed by a device) -> success | error; a transient failure puts the job
// back to pending with a not-before time.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use printrelay_core::error::{PrintRelayError, Result};
use printrelay_core::types::{DeviceId, DocumentType, JobId, JobStatus, Payload};

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS print_jobs (
        job_id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        order_ref TEXT NOT NULL,
        device_id TEXT,
        document_type TEXT NOT NULL,
        payload_base64 TEXT NOT NULL,
        payload_sha256 TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        available_at TEXT NOT NULL,
        finished_at TEXT,
        processing_duration_ms INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_print_jobs_claim
        ON print_jobs (owner, status, available_at);
"#;

const SELECT_COLUMNS: &str = "job_id, owner, order_ref, device_id, document_type, payload_base64,
    payload_sha256, status, attempts, max_attempts, error_message, created_at, updated_at,
    available_at, finished_at, processing_duration_ms";

/// A job as held by the dispatch service.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchJob {
    pub id: JobId,
    /// Account the job belongs to; only that account's devices may claim it.
    pub owner: String,
    pub order_ref: String,
    /// Target device; `None` means any device of the owner.
    pub device_id: Option<DeviceId>,
    pub document_type: DocumentType,
    pub payload: Payload,
    pub payload_sha256: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this time (retry backoff).
    pub available_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<u64>,
}

impl DispatchJob {
    pub fn new(
        owner: impl Into<String>,
        order_ref: impl Into<String>,
        document_type: DocumentType,
        payload: Payload,
        device_id: Option<DeviceId>,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner: owner.into(),
            order_ref: order_ref.into(),
            device_id,
            document_type,
            payload_sha256: sha256_hex(payload.as_bytes()),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            error_message: None,
            created_at: now,
            updated_at: now,
            available_at: now,
            finished_at: None,
            processing_duration_ms: None,
        }
    }
}

/// Fixed-width UTC text, so SQL string comparison orders by time.
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn db_err(context: &str) -> impl FnOnce(rusqlite::Error) -> PrintRelayError + '_ {
    move |e| PrintRelayError::Database(format!("{context}: {e}"))
}

/// Job store over one SQLite connection.
///
/// Methods are synchronous; async callers go through `spawn_blocking`.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open (or create) the store at `path`, in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err("open"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err("WAL pragma"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;
        info!("dispatch job store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory"))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(db_err("create table"))?;
        debug!("in-memory dispatch job store opened");
        Ok(Self { conn })
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, owner = %job.owner))]
    pub fn insert(&self, job: &DispatchJob) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO print_jobs (job_id, owner, order_ref, device_id, document_type,
                 payload_base64, payload_sha256, status, attempts, max_attempts, error_message,
                 created_at, updated_at, available_at, finished_at, processing_duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    job.id.to_string(),
                    job.owner,
                    job.order_ref,
                    job.device_id.as_ref().map(DeviceId::as_str),
                    job.document_type.as_str(),
                    job.payload.to_base64(),
                    job.payload_sha256,
                    job.status.as_str(),
                    job.attempts,
                    job.max_attempts,
                    job.error_message,
                    timestamp(&job.created_at),
                    timestamp(&job.updated_at),
                    timestamp(&job.available_at),
                    job.finished_at.as_ref().map(timestamp),
                    job.processing_duration_ms.map(|ms| ms as i64),
                ],
            )
            .map_err(db_err("insert job"))?;
        info!(bytes = job.payload.len(), "job stored");
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn get(&self, job_id: &JobId) -> Result<Option<DispatchJob>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM print_jobs WHERE job_id = ?1");
        self.conn
            .query_row(&sql, params![job_id.to_string()], row_to_job)
            .optional()
            .map_err(db_err("get job"))
    }

    /// Claim the oldest claimable job of `owner` for `device`.
    ///
    /// A job is claimable when pending, past its `available_at`, and either
    /// untargeted or targeted at `device`.  Claiming moves it to `sending`,
    /// binds it to the device and counts an attempt.
    #[instrument(skip(self), fields(device = %device))]
    pub fn claim_next(&self, owner: &str, device: &DeviceId) -> Result<Option<DispatchJob>> {
        let now = Utc::now();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM print_jobs
             WHERE owner = ?1 AND status = ?2 AND available_at <= ?3
               AND (device_id IS NULL OR device_id = ?4)
             ORDER BY created_at ASC LIMIT 1"
        );
        let candidate = self
            .conn
            .query_row(
                &sql,
                params![owner, JobStatus::Pending.as_str(), timestamp(&now), device.as_str()],
                row_to_job,
            )
            .optional()
            .map_err(db_err("select claimable job"))?;

        let Some(mut job) = candidate else {
            return Ok(None);
        };

        let rows = self
            .conn
            .execute(
                "UPDATE print_jobs SET status = ?1, device_id = ?2, attempts = attempts + 1,
                 updated_at = ?3 WHERE job_id = ?4 AND status = ?5",
                params![
                    JobStatus::Sending.as_str(),
                    device.as_str(),
                    timestamp(&now),
                    job.id.to_string(),
                    JobStatus::Pending.as_str(),
                ],
            )
            .map_err(db_err("claim job"))?;
        if rows == 0 {
            return Ok(None);
        }

        job.status = JobStatus::Sending;
        job.device_id = Some(device.clone());
        job.attempts += 1;
        job.updated_at = now;
        info!(job_id = %job.id, attempt = job.attempts, "job claimed");
        Ok(Some(job))
    }

    /// Record a terminal outcome.
    #[instrument(skip(self, error_message), fields(job_id = %job_id))]
    pub fn finish(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<&str>,
        processing_duration_ms: Option<u64>,
    ) -> Result<()> {
        debug_assert!(status.is_finished());
        let now = timestamp(&Utc::now());
        let rows = self
            .conn
            .execute(
                "UPDATE print_jobs SET status = ?1, error_message = ?2, finished_at = ?3,
                 updated_at = ?3, processing_duration_ms = ?4 WHERE job_id = ?5",
                params![
                    status.as_str(),
                    error_message,
                    now,
                    processing_duration_ms.map(|ms| ms as i64),
                    job_id.to_string(),
                ],
            )
            .map_err(db_err("finish job"))?;
        if rows == 0 {
            return Err(PrintRelayError::JobNotFound(*job_id));
        }
        info!(status = status.as_str(), "job finished");
        Ok(())
    }

    /// Put a claimed job back for another attempt after `available_at`.
    #[instrument(skip(self, error_message), fields(job_id = %job_id))]
    pub fn requeue(
        &self,
        job_id: &JobId,
        error_message: &str,
        available_at: DateTime<Utc>,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE print_jobs SET status = ?1, error_message = ?2, available_at = ?3,
                 updated_at = ?4 WHERE job_id = ?5",
                params![
                    JobStatus::Pending.as_str(),
                    error_message,
                    timestamp(&available_at),
                    timestamp(&Utc::now()),
                    job_id.to_string(),
                ],
            )
            .map_err(db_err("requeue job"))?;
        if rows == 0 {
            return Err(PrintRelayError::JobNotFound(*job_id));
        }
        debug!(%available_at, "job requeued");
        Ok(())
    }

    /// The device that most recently handled a job for `owner`.
    pub fn latest_device(&self, owner: &str) -> Result<Option<DeviceId>> {
        self.conn
            .query_row(
                "SELECT device_id FROM print_jobs
                 WHERE owner = ?1 AND device_id IS NOT NULL
                 ORDER BY updated_at DESC LIMIT 1",
                params![owner],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|found| found.map(DeviceId))
            .map_err(db_err("latest device"))
    }

    /// Number of jobs of `owner` still waiting for a device.
    pub fn pending_count(&self, owner: &str) -> Result<usize> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM print_jobs WHERE owner = ?1 AND status = ?2",
                params![owner, JobStatus::Pending.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(db_err("count pending"))
    }
}

fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, err.into())
}

fn parse_time(column: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

/// Map a row selected with `SELECT_COLUMNS` to a `DispatchJob`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<DispatchJob> {
    let id: String = row.get(0)?;
    let device_id: Option<String> = row.get(3)?;
    let document_type: String = row.get(4)?;
    let payload_b64: String = row.get(5)?;
    let status: String = row.get(7)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    let available_at: String = row.get(13)?;
    let finished_at: Option<String> = row.get(14)?;
    let duration: Option<i64> = row.get(15)?;

    Ok(DispatchJob {
        id: id.parse().map_err(|e| conversion_error(0, e))?,
        owner: row.get(1)?,
        order_ref: row.get(2)?,
        device_id: device_id.map(DeviceId),
        document_type: document_type.parse().map_err(|e| conversion_error(4, e))?,
        payload: Payload::from_base64(&payload_b64).map_err(|e| conversion_error(5, e))?,
        payload_sha256: row.get(6)?,
        status: status.parse().map_err(|e| conversion_error(7, e))?,
        attempts: row.get(8)?,
        max_attempts: row.get(9)?,
        error_message: row.get(10)?,
        created_at: parse_time(11, &created_at)?,
        updated_at: parse_time(12, &updated_at)?,
        available_at: parse_time(13, &available_at)?,
        finished_at: finished_at.as_deref().map(|t| parse_time(14, t)).transpose()?,
        processing_duration_ms: duration.map(|ms| ms as u64),
    })
}
