// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintRelay Dispatch mediates between clients that cannot reach a
// printer and the print-bridge devices registered to their account.
//
// A submitted job is stored durably and handed to the account's freshest
// online device; with no device online it waits in the store until one
// claims it.  Devices report the outcome, which clients poll by job id.

pub mod auth;
pub mod http;
pub mod registry;
pub mod service;
pub mod store;

pub use auth::{Authenticator, Caller, Role};
pub use http::DispatchApp;
pub use registry::DeviceRegistry;
pub use service::{DispatchService, SubmitReceipt, SubmitRequest};
pub use store::{DispatchJob, JobStore};
