// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintRelay Print: the network side of the dispatch layer: TCP reachability
// probes, the subnet discovery sweep, the stateless raw TCP relay and the
// retry policy shared with the dispatch service.  `http` exposes the relay
// and the sweep to browser clients that cannot open sockets themselves.

pub mod discovery;
pub mod http;
pub mod probe;
pub mod raw_client;
pub mod retry;

pub use discovery::{DiscoveryReport, NetworkDiscovery};
pub use probe::{Probe, ProbeOutcome, TcpProbe};
pub use raw_client::{relay_base64, send_raw};
