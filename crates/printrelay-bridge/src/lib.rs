// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintRelay Bridge: a resident process that owns exactly one serial
// connection to a directly attached receipt printer and exposes it through
// a small HTTP intake on the local machine.
//
// - `serial`: endpoint listing and opening, behind a backend trait.
// - `connection`: the single-owner connection state machine.
// - `monitor`: auto-connect at startup and the device-removal watcher.
// - `http`: the intake routes.

pub mod connection;
pub mod http;
pub mod monitor;
pub mod serial;

pub use connection::{BridgeConnection, BridgeStatus};
pub use serial::{LineSettings, SerialBackend, SerialEndpoint, SystemSerial};
