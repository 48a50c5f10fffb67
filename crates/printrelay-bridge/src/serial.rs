// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Serial endpoints: listing, opening with the fixed line configuration, and
// recognising I/O errors that mean the device went away.
//
// The connection state machine talks to a `SerialBackend` so it can be
// driven by an in-memory fake in tests; `SystemSerial` is the real one.

use std::io::{self, Write};
use std::time::Duration;

use serde::Serialize;
use serialport::{DataBits, FlowControl, Parity, SerialPortType, StopBits};
use tracing::debug;

use printrelay_core::error::{PrintRelayError, Result};

/// Line configuration applied to every open.  Not negotiable per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    /// Per-operation I/O timeout on the handle.
    pub timeout: Duration,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout: Duration::from_secs(5),
        }
    }
}

impl LineSettings {
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }
}

/// A serial endpoint offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialEndpoint {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

impl SerialEndpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            manufacturer: None,
            vendor_id: None,
            product_id: None,
        }
    }

    fn looks_like_usb(&self) -> bool {
        let upper = self.path.to_ascii_uppercase();
        upper.contains("USB") || upper.contains("ACM") || self.vendor_id.is_some()
    }
}

/// An open serial handle.  Only writing is needed.
pub trait SerialLink: Write + Send {}

impl<T: Write + Send> SerialLink for T {}

/// Source of serial endpoints.  Calls may block.
pub trait SerialBackend: Send + Sync + 'static {
    fn list(&self) -> Result<Vec<SerialEndpoint>>;
    fn open(&self, path: &str, settings: &LineSettings) -> Result<Box<dyn SerialLink>>;
}

/// The operating system's serial ports, via the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerial;

impl SerialBackend for SystemSerial {
    fn list(&self) -> Result<Vec<SerialEndpoint>> {
        let ports = serialport::available_ports()
            .map_err(|e| PrintRelayError::Serial(format!("listing ports: {e}")))?;

        Ok(ports
            .into_iter()
            .map(|port| {
                let mut endpoint = SerialEndpoint::new(port.port_name);
                if let SerialPortType::UsbPort(usb) = port.port_type {
                    endpoint.manufacturer = usb.manufacturer;
                    endpoint.vendor_id = Some(format!("{:04x}", usb.vid));
                    endpoint.product_id = Some(format!("{:04x}", usb.pid));
                }
                endpoint
            })
            .collect())
    }

    fn open(&self, path: &str, settings: &LineSettings) -> Result<Box<dyn SerialLink>> {
        debug!(path, baud = settings.baud_rate, "opening serial port");
        // 8N1, no flow control
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open()
            .map_err(|e| PrintRelayError::Serial(format!("{path}: {e}")))?;
        Ok(Box::new(port))
    }
}

/// Pick the endpoint to auto-connect to: the first USB-looking one, else the first.
pub fn pick_preferred_endpoint(endpoints: &[SerialEndpoint]) -> Option<&SerialEndpoint> {
    endpoints
        .iter()
        .find(|e| e.looks_like_usb())
        .or_else(|| endpoints.first())
}

/// Whether an I/O error means the device is gone rather than merely busy.
pub fn is_device_lost(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::NotFound
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_endpoint_is_preferred() {
        let endpoints = vec![
            SerialEndpoint::new("/dev/ttyS0"),
            SerialEndpoint::new("/dev/ttyS1"),
            SerialEndpoint::new("/dev/ttyACM0"),
        ];
        assert_eq!(pick_preferred_endpoint(&endpoints).unwrap().path, "/dev/ttyACM0");
    }

    #[test]
    fn vendor_id_counts_as_usb() {
        let mut adapter = SerialEndpoint::new("COM4");
        adapter.vendor_id = Some("0dd4".into());
        let endpoints = vec![SerialEndpoint::new("COM1"), adapter];
        assert_eq!(pick_preferred_endpoint(&endpoints).unwrap().path, "COM4");
    }

    #[test]
    fn falls_back_to_first_endpoint() {
        let endpoints = vec![SerialEndpoint::new("/dev/ttyS0"), SerialEndpoint::new("/dev/ttyS1")];
        assert_eq!(pick_preferred_endpoint(&endpoints).unwrap().path, "/dev/ttyS0");
        assert!(pick_preferred_endpoint(&[]).is_none());
    }

    #[test]
    fn lost_device_errors() {
        assert!(is_device_lost(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_device_lost(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_device_lost(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn endpoint_serializes_camel_case_without_empty_fields() {
        let mut endpoint = SerialEndpoint::new("/dev/ttyUSB0");
        endpoint.vendor_id = Some("0483".into());
        let json = serde_json::to_value(&endpoint).unwrap();
        assert_eq!(json["vendorId"], "0483");
        assert!(json.get("manufacturer").is_none());
    }
}
