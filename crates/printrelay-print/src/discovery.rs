// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network printer discovery by TCP sweep.
//
// Browsers cannot browse mDNS, so the sweep guesses: for every candidate
// subnet it walks the configured host ranges and probes each host on the
// printer ports in priority order (raw 9100, LPD 515, IPP 631).
//
// Observable contract:
//   - one result per host: the first port that answers wins and the
//     remaining ports of that host are skipped;
//   - the sweep stops as soon as `max_devices` printers were found, across
//     all subnets;
//   - results come back in discovery order, not sorted by latency;
//   - a malformed subnet is an error, distinct from finding nothing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument};

use printrelay_core::config::DiscoveryConfig;
use printrelay_core::error::{PrintRelayError, Result};
use printrelay_core::types::PrinterDevice;

use crate::probe::{Probe, TcpProbe};

/// Outcome of one sweep, shaped for the HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub printers: Vec<PrinterDevice>,
    pub total: usize,
    pub message: String,
}

impl DiscoveryReport {
    fn new(printers: Vec<PrinterDevice>) -> Self {
        let total = printers.len();
        let message = match total {
            0 => "No printers found. Check that the printer is on and connected to the same network."
                .to_string(),
            1 => "Found 1 printer".to_string(),
            n => format!("Found {n} printers"),
        };
        Self {
            printers,
            total,
            message,
        }
    }
}

/// The candidate address space of one sweep, fixed before any probe runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    subnets: Vec<[u8; 3]>,
    hosts: Vec<u8>,
    ports: Vec<u16>,
    max_devices: usize,
    probe_timeout: Duration,
}

impl SweepPlan {
    /// Build the plan for `subnet`, or for the configured defaults when the
    /// caller names none (an empty string counts as none).
    pub fn new(config: &DiscoveryConfig, subnet: Option<&str>) -> Result<Self> {
        let requested = subnet.map(str::trim).filter(|s| !s.is_empty());
        let subnets = match requested {
            Some(prefix) => vec![parse_subnet(prefix)?],
            None => config
                .default_subnets
                .iter()
                .map(|s| parse_subnet(s))
                .collect::<Result<Vec<_>>>()?,
        };

        let mut hosts = Vec::new();
        for &(first, last) in &config.host_ranges {
            if first > last {
                return Err(PrintRelayError::Discovery(format!(
                    "host range {first}-{last} is reversed"
                )));
            }
            for host in first..=last {
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }

        if hosts.is_empty() || config.ports.is_empty() {
            return Err(PrintRelayError::Discovery(
                "no hosts or ports to probe".into(),
            ));
        }

        Ok(Self {
            subnets,
            hosts,
            ports: config.ports.clone(),
            max_devices: config.max_devices,
            probe_timeout: config.probe_timeout(),
        })
    }

    /// Candidate hosts in sweep order.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.subnets.iter().flat_map(move |[a, b, c]| {
            self.hosts
                .iter()
                .map(move |&host| Ipv4Addr::new(*a, *b, *c, host))
        })
    }

    /// Worst-case number of probes, ignoring early stops.
    pub fn probe_budget(&self) -> usize {
        self.subnets.len() * self.hosts.len() * self.ports.len()
    }
}

/// Parse a three-octet prefix such as `"192.168.1"` (a trailing dot is allowed).
pub fn parse_subnet(text: &str) -> Result<[u8; 3]> {
    let trimmed = text.trim().trim_end_matches('.');
    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.len() != 3 {
        return Err(PrintRelayError::Discovery(format!(
            "invalid subnet '{text}': expected three octets like 192.168.1"
        )));
    }

    let mut octets = [0u8; 3];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        *slot = part.parse::<u8>().map_err(|_| {
            PrintRelayError::Discovery(format!("invalid subnet '{text}': bad octet '{part}'"))
        })?;
    }
    Ok(octets)
}

/// Sweep engine bound to a probe implementation.
#[derive(Clone)]
pub struct NetworkDiscovery {
    probe: Arc<dyn Probe>,
    config: DiscoveryConfig,
}

impl NetworkDiscovery {
    /// Discovery over real TCP connections.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_probe(config, Arc::new(TcpProbe))
    }

    pub fn with_probe(config: DiscoveryConfig, probe: Arc<dyn Probe>) -> Self {
        Self { probe, config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run one sweep and return a fresh snapshot of the printers found.
    #[instrument(skip(self))]
    pub async fn sweep(&self, subnet: Option<&str>) -> Result<DiscoveryReport> {
        let plan = SweepPlan::new(&self.config, subnet)?;
        info!(
            subnets = plan.subnets.len(),
            hosts = plan.hosts.len(),
            max_probes = plan.probe_budget(),
            "starting printer sweep"
        );

        let mut printers: Vec<PrinterDevice> = Vec::new();

        'hosts: for addr in plan.hosts() {
            if printers.len() >= plan.max_devices {
                break;
            }
            for &port in &plan.ports {
                let target = SocketAddr::new(IpAddr::V4(addr), port);
                let outcome = self.probe.probe(target, plan.probe_timeout).await;
                if outcome.reachable {
                    debug!(%target, latency_ms = outcome.latency_ms, "printer answered");
                    printers.push(PrinterDevice::found(
                        IpAddr::V4(addr),
                        port,
                        outcome.latency_ms,
                    ));
                    continue 'hosts;
                }
            }
        }

        info!(found = printers.len(), "printer sweep finished");
        Ok(DiscoveryReport::new(printers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use printrelay_core::types::ProtocolHint;

    use crate::probe::ProbeOutcome;

    /// Answers on a fixed set of endpoints and records every probe.
    struct FakeProbe {
        live: HashSet<SocketAddr>,
        seen: Mutex<Vec<SocketAddr>>,
    }

    impl FakeProbe {
        fn new(live: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                live: live.iter().map(|s| s.parse().unwrap()).collect(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<SocketAddr> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        async fn probe(&self, addr: SocketAddr, _timeout: Duration) -> ProbeOutcome {
            self.seen.lock().unwrap().push(addr);
            if self.live.contains(&addr) {
                ProbeOutcome {
                    reachable: true,
                    latency_ms: 3,
                }
            } else {
                ProbeOutcome::UNREACHABLE
            }
        }
    }

    fn discovery(probe: Arc<FakeProbe>) -> NetworkDiscovery {
        NetworkDiscovery::with_probe(DiscoveryConfig::default(), probe)
    }

    #[test]
    fn subnet_parsing() {
        assert_eq!(parse_subnet("192.168.1").unwrap(), [192, 168, 1]);
        assert_eq!(parse_subnet(" 10.0.0. ").unwrap(), [10, 0, 0]);
        assert!(parse_subnet("192.168").is_err());
        assert!(parse_subnet("192.168.1.5").is_err());
        assert!(parse_subnet("192.168.300").is_err());
        assert!(parse_subnet("printer").is_err());
    }

    #[test]
    fn default_plan_covers_documented_space() {
        let plan = SweepPlan::new(&DiscoveryConfig::default(), None).unwrap();
        assert_eq!(plan.hosts.len(), 22);
        assert_eq!(plan.probe_budget(), 4 * 22 * 3);
        let first = plan.hosts().next().unwrap();
        assert_eq!(first, Ipv4Addr::new(192, 168, 1, 100));
    }

    #[test]
    fn empty_subnet_falls_back_to_defaults() {
        let plan = SweepPlan::new(&DiscoveryConfig::default(), Some("  ")).unwrap();
        assert_eq!(plan.subnets.len(), 4);
    }

    #[tokio::test]
    async fn first_answering_port_wins_per_host() {
        let probe = FakeProbe::new(&["192.168.1.100:515", "192.168.1.100:631"]);
        let report = discovery(probe.clone()).sweep(Some("192.168.1")).await.unwrap();

        assert_eq!(report.total, 1);
        let device = &report.printers[0];
        assert_eq!(device.port, 515);
        assert_eq!(device.protocol_hint, ProtocolHint::Lpd);
        assert_eq!(device.name, "LPD printer (192.168.1.100)");

        // 9100 then 515 on .100, never 631
        let on_first_host: Vec<u16> = probe
            .seen()
            .iter()
            .filter(|a| a.ip() == "192.168.1.100".parse::<IpAddr>().unwrap())
            .map(|a| a.port())
            .collect();
        assert_eq!(on_first_host, vec![9100, 515]);
    }

    #[tokio::test]
    async fn results_keep_discovery_order() {
        let probe = FakeProbe::new(&["192.168.1.205:9100", "192.168.1.101:631"]);
        let report = discovery(probe).sweep(Some("192.168.1")).await.unwrap();

        let hosts: Vec<String> = report.printers.iter().map(|p| p.address.to_string()).collect();
        assert_eq!(hosts, vec!["192.168.1.101", "192.168.1.205"]);
        assert_eq!(report.message, "Found 2 printers");
    }

    #[tokio::test]
    async fn sweep_stops_at_device_cap() {
        // Every host answers on every port.
        let live: Vec<String> = DiscoveryConfig::default()
            .default_subnets
            .iter()
            .flat_map(|s| {
                (100..=110)
                    .chain(200..=210)
                    .flat_map(move |h| [9100, 515, 631].map(|p| format!("{s}.{h}:{p}")))
            })
            .collect();
        let refs: Vec<&str> = live.iter().map(String::as_str).collect();
        let probe = FakeProbe::new(&refs);

        let report = discovery(probe.clone()).sweep(None).await.unwrap();
        assert_eq!(report.total, 10);
        assert_eq!(probe.seen().len(), 10);

        let unique: HashSet<IpAddr> = report.printers.iter().map(|p| p.address).collect();
        assert_eq!(unique.len(), report.total);
    }

    #[tokio::test]
    async fn nothing_found_is_not_an_error() {
        let report = discovery(FakeProbe::new(&[])).sweep(Some("10.0.0")).await.unwrap();
        assert_eq!(report.total, 0);
        assert!(report.printers.is_empty());
        assert!(report.message.starts_with("No printers found"));
    }

    #[tokio::test]
    async fn malformed_subnet_is_an_error() {
        let probe = FakeProbe::new(&[]);
        let err = discovery(probe.clone()).sweep(Some("not-a-subnet")).await.unwrap_err();
        assert!(matches!(err, PrintRelayError::Discovery(_)));
        assert!(probe.seen().is_empty());
    }

    #[tokio::test]
    async fn custom_ranges_are_honoured() {
        let config = DiscoveryConfig {
            host_ranges: vec![(50, 51)],
            ports: vec![9100],
            ..DiscoveryConfig::default()
        };
        let probe = FakeProbe::new(&["10.1.2.51:9100"]);
        let report = NetworkDiscovery::with_probe(config, probe.clone())
            .sweep(Some("10.1.2"))
            .await
            .unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(probe.seen().len(), 2);
    }
}
