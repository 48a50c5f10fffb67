// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the PrintRelay dispatch layer.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::codec;

/// Raw TCP port (HP JetDirect / ESC/POS over Ethernet).
pub const RAW_PORT: u16 = 9100;

/// Line Printer Daemon port (RFC 1179).
pub const LPD_PORT: u16 = 515;

/// Internet Printing Protocol port.
pub const IPP_PORT: u16 = 631;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a print-bridge device registered with the dispatch service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Kind of business document carried by a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    #[default]
    Order,
    Checklist,
    Receipt,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Checklist => "checklist",
            Self::Receipt => "receipt",
        }
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "order" => Ok(Self::Order),
            "checklist" => Ok(Self::Checklist),
            "receipt" => Ok(Self::Receipt),
            other => Err(format!("unknown document type '{other}'")),
        }
    }
}

/// Lifecycle states of a print job.
///
/// Transitions only move forward (`Pending → Sending → Waiting → Success|Error`);
/// going back to `Pending` requires an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Recorded, not yet handed to a transport.
    Pending,
    /// Being transmitted.
    Sending,
    /// Handed off; waiting for the printer or a device to confirm.
    Waiting,
    /// Printed.
    Success,
    /// Failed; see the job's error field.
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Waiting => "waiting",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// `Success` or `Error`.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sending => 1,
            Self::Waiting => 2,
            Self::Success | Self::Error => 3,
        }
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    ///
    /// Re-applying the current status is allowed (idempotent updates).
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_finished() && next.rank() > self.rank()
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "waiting" => Ok(Self::Waiting),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Classification of errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network blip or busy printer; safe to retry automatically.
    Transient,
    /// Someone must act (add paper, plug the cable back in, log in).
    UserAction,
    /// Retrying cannot help (malformed payload, invalid request).
    Permanent,
}

/// An immutable ESC/POS byte stream.
///
/// Serialised as base64 text so that it survives JSON storage and
/// text-oriented transports byte-for-byte.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_base64(&self) -> String {
        codec::encode(&self.0)
    }

    pub fn from_base64(text: &str) -> crate::error::Result<Self> {
        codec::decode(text).map(Self)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Payload::from_base64(&text).map_err(serde::de::Error::custom)
    }
}

/// A print job as tracked by the submitting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: JobId,
    pub document_type: DocumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_number: Option<u32>,
    pub payload: Payload,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<DeviceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time, used for ordering and pruning.
    pub timestamp: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(document_type: DocumentType, document_number: Option<u32>, payload: Payload) -> Self {
        Self {
            id: JobId::new(),
            document_type,
            document_number,
            payload,
            status: JobStatus::Pending,
            device_id: None,
            error: None,
            timestamp: Utc::now(),
        }
    }
}

/// Printer protocol guessed from the port that answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolHint {
    Raw,
    Lpd,
    Ipp,
    Unknown,
}

impl ProtocolHint {
    pub fn from_port(port: u16) -> Self {
        match port {
            RAW_PORT => Self::Raw,
            LPD_PORT => Self::Lpd,
            IPP_PORT => Self::Ipp,
            _ => Self::Unknown,
        }
    }

    /// Short human label for device lists.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Raw => "ESC/POS thermal printer",
            Self::Lpd => "LPD printer",
            Self::Ipp => "IPP printer",
            Self::Unknown => "Network printer",
        }
    }
}

/// Presence of a discovered device.  A sweep only reports devices that
/// answered, so this is always `online` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
}

/// A printer found by a discovery sweep. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterDevice {
    pub address: IpAddr,
    pub port: u16,
    pub protocol_hint: ProtocolHint,
    pub name: String,
    pub status: DeviceStatus,
    pub reachable: bool,
    pub latency_ms: u64,
}

impl PrinterDevice {
    /// A device that answered a probe on `port`.
    pub fn found(address: IpAddr, port: u16, latency_ms: u64) -> Self {
        let protocol_hint = ProtocolHint::from_port(port);
        Self {
            address,
            port,
            protocol_hint,
            name: format!("{} ({address})", protocol_hint.label()),
            status: DeviceStatus::Online,
            reachable: true,
            latency_ms,
        }
    }
}

/// State of the bridge's managed serial connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Sending));
        assert!(JobStatus::Sending.can_advance_to(JobStatus::Success));
        assert!(JobStatus::Waiting.can_advance_to(JobStatus::Error));
        assert!(JobStatus::Success.can_advance_to(JobStatus::Success));
        assert!(!JobStatus::Waiting.can_advance_to(JobStatus::Sending));
        assert!(!JobStatus::Success.can_advance_to(JobStatus::Error));
        assert!(!JobStatus::Error.can_advance_to(JobStatus::Pending));
    }

    #[test]
    fn protocol_hint_follows_port() {
        assert_eq!(ProtocolHint::from_port(9100), ProtocolHint::Raw);
        assert_eq!(ProtocolHint::from_port(515), ProtocolHint::Lpd);
        assert_eq!(ProtocolHint::from_port(631), ProtocolHint::Ipp);
        assert_eq!(ProtocolHint::from_port(8080), ProtocolHint::Unknown);
    }

    #[test]
    fn found_device_is_named_after_its_protocol() {
        let device = PrinterDevice::found("192.168.1.100".parse().unwrap(), 9100, 12);
        assert_eq!(device.name, "ESC/POS thermal printer (192.168.1.100)");
        assert!(device.reachable);
        assert_eq!(device.status, DeviceStatus::Online);
    }

    #[test]
    fn print_job_serialises_payload_as_base64() {
        let job = PrintJob::new(
            DocumentType::Receipt,
            Some(42),
            Payload::from(vec![0x1B, 0x40, 0x00, 0xFF]),
        );
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["payload"], "G0AA/w==");
        assert_eq!(json["documentType"], "receipt");
        assert_eq!(json["status"], "pending");
        assert!(json.get("deviceId").is_none());

        let back: PrintJob = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn job_id_parses_from_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
