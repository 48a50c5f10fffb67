// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for PrintRelay.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ErrorClass, JobId};

/// The step of a relay attempt that failed.
///
/// Callers use this to tell "printer unreachable" apart from "malformed payload".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStage {
    Decode,
    Connect,
    Write,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Decode => "decode",
            Self::Connect => "connect",
            Self::Write => "write",
        })
    }
}

/// Top-level error type for all PrintRelay operations.
#[derive(Debug, Error)]
pub enum PrintRelayError {
    // -- Transport failures --
    #[error("relay {stage} failed: {detail}")]
    Relay { stage: RelayStage, detail: String },

    #[error("serial port error: {0}")]
    Serial(String),

    #[error("serial connection closed while writing")]
    ConnectionClosed,

    // -- Transport absent --
    #[error("printer not connected")]
    NotConnected,

    // -- Preconditions --
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid payload encoding: {0}")]
    InvalidPayload(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("printer discovery failed: {0}")]
    Discovery(String),

    // -- Capacity / contention --
    #[error("a write is already in progress on this connection")]
    WriteInProgress,

    #[error("a connect attempt is already in progress")]
    ConnectInProgress,

    #[error("a print job is already being submitted")]
    ClientBusy,

    // -- Infrastructure --
    #[error("print job {0} not found")]
    JobNotFound(JobId),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintRelayError {
    /// Shorthand for a relay failure at `stage`.
    pub fn relay(stage: RelayStage, detail: impl Into<String>) -> Self {
        Self::Relay {
            stage,
            detail: detail.into(),
        }
    }

    /// The relay stage, if this error came from a relay attempt.
    pub fn stage(&self) -> Option<RelayStage> {
        match self {
            Self::Relay { stage, .. } => Some(*stage),
            Self::InvalidPayload(_) => Some(RelayStage::Decode),
            _ => None,
        }
    }

    /// Classify for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Relay { stage, detail } => match stage {
                RelayStage::Decode => ErrorClass::Permanent,
                RelayStage::Connect | RelayStage::Write => classify_detail(detail),
            },
            Self::Serial(detail) => classify_detail(detail),
            Self::ConnectionClosed => ErrorClass::Transient,
            Self::NotConnected => ErrorClass::UserAction,
            Self::Unauthenticated | Self::Forbidden(_) => ErrorClass::UserAction,
            Self::PayloadTooLarge { .. }
            | Self::InvalidPayload(_)
            | Self::Validation(_)
            | Self::Config(_)
            | Self::Serialization(_) => ErrorClass::Permanent,
            Self::Discovery(_) => ErrorClass::Transient,
            Self::WriteInProgress | Self::ConnectInProgress | Self::ClientBusy => {
                ErrorClass::Transient
            }
            Self::JobNotFound(_) => ErrorClass::Permanent,
            Self::Database(_) | Self::Http(_) => ErrorClass::Transient,
            Self::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ErrorClass::UserAction
                }
                _ => ErrorClass::Transient,
            },
        }
    }

    /// HTTP status code used when this error ends a request.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Relay {
                stage: RelayStage::Decode,
                ..
            } => 400,
            Self::Relay { .. } | Self::Http(_) => 502,
            Self::Unauthenticated => 401,
            Self::Forbidden(_) => 403,
            Self::JobNotFound(_) => 404,
            Self::WriteInProgress | Self::ConnectInProgress | Self::ClientBusy => 409,
            Self::PayloadTooLarge { .. } => 413,
            Self::InvalidPayload(_) | Self::Validation(_) | Self::Discovery(_) => 400,
            Self::NotConnected | Self::ConnectionClosed => 503,
            Self::Serial(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_) => 500,
        }
    }
}

impl PrintRelayError {
    /// Stable identifier sent as `code` in HTTP error bodies, so a client can
    /// tell apart errors that share a status.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Relay { .. } => "relay_failed",
            Self::Serial(_) => "serial_error",
            Self::ConnectionClosed => "connection_closed",
            Self::NotConnected => "not_connected",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Validation(_) => "invalid_request",
            Self::Discovery(_) => "discovery_failed",
            Self::WriteInProgress => "write_in_progress",
            Self::ConnectInProgress => "connect_in_progress",
            Self::ClientBusy => "client_busy",
            Self::JobNotFound(_) => "job_not_found",
            Self::Database(_) => "database_error",
            Self::Config(_) => "config_error",
            Self::Http(_) => "http_error",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

/// Classify a free-form transport error detail string.
pub fn classify_detail(detail: &str) -> ErrorClass {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("paper")
        || lower.contains("cover open")
        || lower.contains("permission denied")
        || lower.contains("no such file")
    {
        return ErrorClass::UserAction;
    }

    if lower.contains("invalid") || lower.contains("unsupported") {
        return ErrorClass::Permanent;
    }

    // timeouts, refused/reset connections and anything unknown
    ErrorClass::Transient
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintRelayError>;
