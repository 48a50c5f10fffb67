// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the counter staff who press "Print".
//
// Transport layers report raw errors; this mapping is applied only at the
// client boundary, where the order screen shows a message and a suggestion.

use crate::error::{PrintRelayError, RelayStage};

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Network blip or timeout; trying again usually works.
    Transient,
    /// Someone must do something (plug in the printer, set up a bridge, log in).
    ActionRequired,
    /// Retrying will not help.
    Permanent,
}

/// A human-readable error with a plain message and an actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Short summary (shown as the toast title).
    pub message: String,
    /// What to try (shown as the toast body).
    pub suggestion: String,
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable: severity == Severity::Transient,
            severity,
        }
    }
}

/// Convert a `PrintRelayError` into a message for the order screen.
pub fn humanize_error(err: &PrintRelayError) -> HumanError {
    use Severity::*;

    match err {
        PrintRelayError::Relay { stage, detail } => humanize_relay(*stage, detail),

        PrintRelayError::Serial(detail) => HumanError::new(
            "The USB printer reported a problem.",
            format!("Check the cable and that the printer has paper. ({detail})"),
            ActionRequired,
        ),

        PrintRelayError::ConnectionClosed => HumanError::new(
            "The printer was disconnected while printing.",
            "Plug the printer cable back in and print again.",
            ActionRequired,
        ),

        PrintRelayError::NotConnected => HumanError::new(
            "No printer is connected to the print bridge.",
            "Open the bridge and connect it to the printer's port, then try again.",
            ActionRequired,
        ),

        PrintRelayError::Unauthenticated => HumanError::new(
            "Your session has expired.",
            "Log in again, then print.",
            ActionRequired,
        ),

        PrintRelayError::Forbidden(_) => HumanError::new(
            "Your account is not allowed to print.",
            "Ask an administrator to give you attendant access.",
            ActionRequired,
        ),

        PrintRelayError::PayloadTooLarge { .. } => HumanError::new(
            "This document is too large to print.",
            "Try printing a shorter document.",
            Permanent,
        ),

        PrintRelayError::InvalidPayload(_) | PrintRelayError::Validation(_) => HumanError::new(
            "The document could not be prepared for printing.",
            "Reload the page and try again. If it keeps happening, please report it.",
            Permanent,
        ),

        PrintRelayError::Discovery(_) => HumanError::new(
            "We couldn't search the network for printers.",
            "Check the network address and that this device is on the shop Wi-Fi.",
            Transient,
        ),

        PrintRelayError::WriteInProgress | PrintRelayError::ConnectInProgress => HumanError::new(
            "The printer is busy with another document.",
            "Wait a moment and print again.",
            Transient,
        ),

        PrintRelayError::ClientBusy => HumanError::new(
            "A document is already being sent.",
            "Wait for it to finish.",
            Transient,
        ),

        PrintRelayError::JobNotFound(_) => HumanError::new(
            "That print job no longer exists.",
            "Print the document again.",
            Permanent,
        ),

        PrintRelayError::Http(detail) if detail.contains("print bridge") => HumanError::new(
            "No print bridge device is connected.",
            "Set up a print bridge device to receive print jobs.",
            ActionRequired,
        ),

        PrintRelayError::Http(_) => HumanError::new(
            "We couldn't reach the print service.",
            "Check the internet connection and try again.",
            Transient,
        ),

        PrintRelayError::Database(_) | PrintRelayError::Io(_) | PrintRelayError::Serialization(_) => {
            HumanError::new(
                "The print service had an internal problem.",
                "Try again. If this keeps happening, please report it.",
                Transient,
            )
        }

        PrintRelayError::Config(detail) => HumanError::new(
            "The print settings are invalid.",
            format!("Fix the configuration file. ({detail})"),
            Permanent,
        ),
    }
}

fn humanize_relay(stage: RelayStage, detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    match stage {
        RelayStage::Decode => HumanError::new(
            "The document could not be prepared for printing.",
            "Reload the page and try again.",
            Severity::Permanent,
        ),
        RelayStage::Connect if lower.contains("timed out") => HumanError::new(
            "The printer didn't respond in time.",
            "Check that the printer is on and on the same network, then try again.",
            Severity::Transient,
        ),
        RelayStage::Connect => HumanError::new(
            "We couldn't connect to the printer.",
            "Check the printer's IP address and port, and that it is turned on.",
            Severity::Transient,
        ),
        RelayStage::Write => HumanError::new(
            "The connection to the printer was interrupted.",
            "Print the document again.",
            Severity::Transient,
        ),
    }
}
