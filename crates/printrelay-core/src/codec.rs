// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text-safe payload codec.
//
// ESC/POS streams are arbitrary bytes (including NUL and 0xFF), so every
// JSON-carrying boundary moves them as standard-alphabet padded base64.
// Decoding is strict: whitespace from line-wrapped senders is stripped, but
// any other non-alphabet byte is rejected rather than skipped.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{PrintRelayError, Result};

/// Encode raw bytes as padded standard base64.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode padded standard base64 back into the exact original bytes.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| PrintRelayError::InvalidPayload(e.to_string()))
}

/// Upper bound of the decoded size of `encoded_len` base64 characters.
///
/// Lets intake paths reject oversized bodies before decoding them.
pub fn decoded_len_estimate(encoded_len: usize) -> usize {
    encoded_len.div_ceil(4) * 3
}
