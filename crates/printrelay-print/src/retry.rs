// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy with exponential backoff for delivery attempts.
//
// Transports never retry on their own.  The dispatch layer asks this module
// what to do after a failed attempt: retry transient failures while attempts
// remain, give up on anything that needs a person or will never succeed.

use std::time::Duration;

use printrelay_core::error::classify_detail;
use printrelay_core::types::ErrorClass;
use tracing::{debug, info, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts allowed, the first one included.
    pub max_attempts: u32,
    /// Base delay between attempts (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry: the error needs a person or is permanent.
    GiveUp(ErrorClass),
    /// All attempts used.
    Exhausted,
}

/// Decide for a failure reported as free text (e.g. by a remote device).
pub fn should_retry_detail(detail: &str, attempts: u32, config: &RetryConfig) -> RetryDecision {
    decide(classify_detail(detail), attempts, config)
}

fn decide(class: ErrorClass, attempts: u32, config: &RetryConfig) -> RetryDecision {
    match class {
        ErrorClass::Permanent => {
            info!("permanent error, not retrying");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::UserAction => {
            info!("user action required, not retrying");
            RetryDecision::GiveUp(ErrorClass::UserAction)
        }
        ErrorClass::Transient => {
            if attempts >= config.max_attempts {
                warn!(attempts, max = config.max_attempts, "retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                let delay = compute_delay(attempts.saturating_sub(1), config);
                debug!(attempts, delay_ms = delay.as_millis() as u64, "scheduling retry");
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// delay = min(base * 2^n + jitter, max_delay), jitter in [0, base).
fn compute_delay(n: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << n.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, n));
    Duration::from_millis(total_ms.min(config.max_delay.as_millis() as u64))
}

// Deterministic spread; avoids pulling in a RNG for one number.
fn jitter(base_ms: u64, n: u32) -> u64 {
    let hash = (n as u64 + 1).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}
