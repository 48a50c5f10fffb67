// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintRelay client: the print history the order screen keeps, the
// transports that carry a job to a printer, and the controller tying the
// two together.

pub mod controller;
pub mod queue;
pub mod storage;
pub mod transport;

pub use controller::{ControllerState, ControllerTimings, PrintController, PrintOutcome, PrintRequest, PrintStatus};
pub use queue::{MAX_QUEUE_SIZE, PrintQueue};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use transport::{Delivery, PrintTransport, RemoteStatus, Transport, TransportClient};
