// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration, loaded from an optional TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PrintRelayError, Result};
use crate::types::{IPP_PORT, LPD_PORT, RAW_PORT};

/// Persistent settings for every PrintRelay service.
///
/// Every section has defaults, so a config file only needs the keys it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    pub relay: RelayConfig,
    pub discovery: DiscoveryConfig,
    pub dispatch: DispatchConfig,
    pub client: ClientConfig,
}

impl AppConfig {
    /// Load from `path`; a missing path or file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("no config file given, using defaults");
            return Ok(Self::default());
        };
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PrintRelayError::Config(e.to_string()))
    }
}

/// Local Bridge Server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// TCP port the bridge HTTP intake listens on.
    pub listen_port: u16,
    /// Largest accepted print payload, in decoded bytes.
    pub max_payload_bytes: usize,
    pub baud_rate: u32,
    /// Connect to the preferred serial endpoint at startup.
    pub auto_connect: bool,
    /// How often the device-removal monitor re-lists endpoints.
    pub monitor_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_port: RAW_PORT,
            max_payload_bytes: 10 * 1024 * 1024,
            baud_rate: 9600,
            auto_connect: true,
            monitor_interval_ms: 2000,
        }
    }
}

impl BridgeConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

/// Network Print Relay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen: String,
    /// Connect + write budget for a single relay attempt.
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8787".into(),
            timeout_secs: 10,
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Network Discovery Service settings.
///
/// The host ranges are a heuristic for where shops usually park printers;
/// change them for networks that number printers differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Three-octet prefixes swept when the caller names none.
    pub default_subnets: Vec<String>,
    /// Inclusive host-suffix ranges probed within each subnet.
    pub host_ranges: Vec<(u8, u8)>,
    /// Ports probed per host, in priority order.
    pub ports: Vec<u16>,
    pub probe_timeout_ms: u64,
    /// Sweep stops once this many devices were found.
    pub max_devices: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_subnets: vec![
                "192.168.1".into(),
                "192.168.0".into(),
                "10.0.0".into(),
                "172.16.0".into(),
            ],
            host_ranges: vec![(100, 110), (200, 210)],
            ports: vec![RAW_PORT, LPD_PORT, IPP_PORT],
            probe_timeout_ms: 1000,
            max_devices: 10,
        }
    }
}

impl DiscoveryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Remote Dispatch Service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub listen: String,
    pub database_path: PathBuf,
    /// HS256 secret used to verify caller bearer tokens.
    pub jwt_secret: String,
    /// A device heartbeat older than this no longer counts as online.
    pub presence_ttl_secs: u64,
    /// Delivery attempts per job before a transient failure becomes final.
    pub max_attempts: u32,
    /// Longest a device claim request waits for new work.
    pub claim_wait_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8788".into(),
            database_path: PathBuf::from("printrelay-dispatch.db"),
            jwt_secret: String::new(),
            presence_ttl_secs: 120,
            max_attempts: 2,
            claim_wait_ms: 25_000,
        }
    }
}

impl DispatchConfig {
    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn claim_wait(&self) -> Duration {
        Duration::from_millis(self.claim_wait_ms)
    }
}

/// Client Print Queue and dispatch-hook settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub max_queue_size: usize,
    pub success_reset_ms: u64,
    pub error_reset_ms: u64,
    /// Directory holding the durable client key/value store.
    pub storage_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 3,
            success_reset_ms: 2000,
            error_reset_ms: 3000,
            storage_dir: default_storage_dir(),
            poll_interval_ms: 2000,
            poll_timeout_secs: 120,
        }
    }
}

impl ClientConfig {
    pub fn success_reset(&self) -> Duration {
        Duration::from_millis(self.success_reset_ms)
    }

    pub fn error_reset(&self) -> Duration {
        Duration::from_millis(self.error_reset_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

fn default_storage_dir() -> PathBuf {
    // XDG data dir, then ~/.local/share, then the temp dir
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("share")
    } else {
        std::env::temp_dir()
    };
    base.join("printrelay")
}
