// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintRelay core: types, error definitions, configuration and the payload
// codec shared across all crates.

pub mod codec;
pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;

pub use config::AppConfig;
pub use error::{PrintRelayError, RelayStage};
pub use types::*;
