// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The bridge's single serial connection.
//
// State machine: disconnected -> connecting -> connected -> disconnected.
//
// Invariants:
//   - at most one open handle; `connect` closes the previous one first;
//   - at most one connect attempt and one write in flight; a second one is
//     rejected immediately (ConnectInProgress / WriteInProgress) so bytes
//     from two jobs never interleave on the wire;
//   - the write slot stays taken until the blocking write has really
//     finished, even when the caller was already told ConnectionClosed, and
//     `connect` is refused with WriteInProgress while it is taken;
//   - `write` outside `connected` fails with NotConnected without touching
//     the handle;
//   - a close event (unplug, device error) forces `disconnected` at once and
//     any write in flight on that session fails with ConnectionClosed.
//
// Blocking serial calls run on the blocking pool; the state itself sits
// behind a std mutex that is never held across an await.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use printrelay_core::error::{PrintRelayError, Result};
use printrelay_core::types::BridgeState;

use crate::serial::{LineSettings, SerialBackend, SerialEndpoint, SerialLink, is_device_lost};

type SharedLink = Arc<Mutex<Box<dyn SerialLink>>>;

/// One open handle and the token that fires when it is closed.
#[derive(Clone)]
struct Session {
    id: u64,
    path: String,
    link: SharedLink,
    closed: CancellationToken,
}

struct Inner {
    state: BridgeState,
    session: Option<Session>,
}

/// Snapshot of the connection for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub connected: bool,
    pub port: Option<String>,
}

/// Owner of the bridge's serial handle.
pub struct BridgeConnection {
    backend: Arc<dyn SerialBackend>,
    settings: LineSettings,
    inner: Mutex<Inner>,
    connect_slot: tokio::sync::Mutex<()>,
    write_slot: Arc<tokio::sync::Mutex<()>>,
    next_session: AtomicU64,
}

impl BridgeConnection {
    pub fn new(backend: Arc<dyn SerialBackend>, settings: LineSettings) -> Self {
        Self {
            backend,
            settings,
            inner: Mutex::new(Inner {
                state: BridgeState::Disconnected,
                session: None,
            }),
            connect_slot: tokio::sync::Mutex::new(()),
            write_slot: Arc::new(tokio::sync::Mutex::new(())),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn status(&self) -> BridgeStatus {
        let inner = self.inner.lock().expect("bridge state lock poisoned");
        BridgeStatus {
            state: inner.state,
            connected: inner.state == BridgeState::Connected,
            port: inner.session.as_ref().map(|s| s.path.clone()),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.inner.lock().expect("bridge state lock poisoned").state
    }

    /// Id and path of the open session, if any.
    pub fn active_session(&self) -> Option<(u64, String)> {
        let inner = self.inner.lock().expect("bridge state lock poisoned");
        inner.session.as_ref().map(|s| (s.id, s.path.clone()))
    }

    /// List the endpoints the backend can see.
    pub async fn list_endpoints(&self) -> Result<Vec<SerialEndpoint>> {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.list())
            .await
            .map_err(|e| PrintRelayError::Serial(format!("listing task failed: {e}")))?
    }

    /// Open `path`, replacing any open connection.
    ///
    /// On failure the state is `disconnected` and the backend's error is
    /// returned as is.
    #[instrument(skip(self))]
    pub async fn connect(&self, path: &str) -> Result<()> {
        let _slot = self
            .connect_slot
            .try_lock()
            .map_err(|_| PrintRelayError::ConnectInProgress)?;
        // Bytes from a write on the old handle may still be draining.
        let _draining = self
            .write_slot
            .try_lock()
            .map_err(|_| PrintRelayError::WriteInProgress)?;

        if self.close_active("replaced by a new connection") {
            info!("closed previous connection before reconnecting");
        }
        self.set_state(BridgeState::Connecting);

        let backend = Arc::clone(&self.backend);
        let settings = self.settings;
        let owned_path = path.to_string();
        let opened = tokio::task::spawn_blocking(move || backend.open(&owned_path, &settings))
            .await
            .map_err(|e| PrintRelayError::Serial(format!("open task failed: {e}")))
            .and_then(|r| r);

        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, "serial open failed");
                self.set_state(BridgeState::Disconnected);
                return Err(e);
            }
        };

        let session = Session {
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            path: path.to_string(),
            link: Arc::new(Mutex::new(link)),
            closed: CancellationToken::new(),
        };
        {
            let mut inner = self.inner.lock().expect("bridge state lock poisoned");
            inner.session = Some(session);
            inner.state = BridgeState::Connected;
        }
        info!("serial connection open");
        Ok(())
    }

    /// Write `bytes` to the printer and return the count written.
    ///
    /// No retry: I/O errors come back as they are.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn write(&self, bytes: Vec<u8>) -> Result<usize> {
        let session = {
            let inner = self.inner.lock().expect("bridge state lock poisoned");
            match (&inner.state, &inner.session) {
                (BridgeState::Connected, Some(session)) => session.clone(),
                _ => return Err(PrintRelayError::NotConnected),
            }
        };

        let slot = Arc::clone(&self.write_slot)
            .try_lock_owned()
            .map_err(|_| PrintRelayError::WriteInProgress)?;

        let link = Arc::clone(&session.link);
        let task = tokio::task::spawn_blocking(move || -> std::io::Result<usize> {
            let _slot = slot;
            let mut link = link.lock().expect("serial link lock poisoned");
            link.write_all(&bytes)?;
            link.flush()?;
            Ok(bytes.len())
        });

        tokio::select! {
            biased;
            _ = session.closed.cancelled() => {
                warn!(session = session.id, "connection closed during write");
                Err(PrintRelayError::ConnectionClosed)
            }
            joined = task => match joined {
                Ok(Ok(_)) if session.closed.is_cancelled() => Err(PrintRelayError::ConnectionClosed),
                Ok(Ok(written)) => {
                    info!(written, "print data written");
                    Ok(written)
                }
                Ok(Err(e)) => {
                    if is_device_lost(&e) {
                        self.handle_close(session.id, "device lost during write");
                    }
                    Err(PrintRelayError::Serial(e.to_string()))
                }
                Err(e) => Err(PrintRelayError::Serial(format!("write task failed: {e}"))),
            }
        }
    }

    /// Asynchronous close event for session `session_id`.
    ///
    /// Ignored when that session is no longer the active one.  Returns
    /// whether anything was closed.
    pub fn handle_close(&self, session_id: u64, reason: &str) -> bool {
        let mut inner = self.inner.lock().expect("bridge state lock poisoned");
        match &inner.session {
            Some(session) if session.id == session_id => {
                warn!(path = %session.path, reason, "serial connection closed");
                session.closed.cancel();
                inner.session = None;
                inner.state = BridgeState::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Close the active connection on request.  Returns whether one was open.
    pub fn disconnect(&self) -> bool {
        self.close_active("disconnect requested")
    }

    fn close_active(&self, reason: &str) -> bool {
        let mut inner = self.inner.lock().expect("bridge state lock poisoned");
        let closed = match inner.session.take() {
            Some(session) => {
                info!(path = %session.path, reason, "closing serial connection");
                session.closed.cancel();
                true
            }
            None => false,
        };
        inner.state = BridgeState::Disconnected;
        closed
    }

    fn set_state(&self, state: BridgeState) {
        self.inner.lock().expect("bridge state lock poisoned").state = state;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory serial backend shared by the bridge tests.

    use std::io::{self, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use printrelay_core::error::{PrintRelayError, Result};

    use crate::serial::{LineSettings, SerialBackend, SerialEndpoint, SerialLink};

    #[derive(Default)]
    pub struct FakeSerial {
        pub endpoints: Mutex<Vec<SerialEndpoint>>,
        pub wire: Arc<Mutex<Vec<u8>>>,
        pub writes: Arc<AtomicUsize>,
        pub write_delay: Mutex<Duration>,
        pub fail_with: Mutex<Option<io::ErrorKind>>,
        pub refuse_open: Mutex<bool>,
    }

    impl FakeSerial {
        pub fn with_ports(paths: &[&str]) -> Arc<Self> {
            let fake = Self::default();
            *fake.endpoints.lock().unwrap() = paths.iter().map(|p| SerialEndpoint::new(*p)).collect();
            Arc::new(fake)
        }

        pub fn wire(&self) -> Vec<u8> {
            self.wire.lock().unwrap().clone()
        }
    }

    struct FakeLink {
        wire: Arc<Mutex<Vec<u8>>>,
        writes: Arc<AtomicUsize>,
        delay: Duration,
        fail_with: Option<io::ErrorKind>,
    }

    impl Write for FakeLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if let Some(kind) = self.fail_with {
                return Err(io::Error::from(kind));
            }
            // Write in halves so interleaving would be visible on the wire.
            let half = buf.len().div_ceil(2);
            self.wire.lock().unwrap().extend_from_slice(&buf[..half]);
            std::thread::sleep(self.delay);
            self.wire.lock().unwrap().extend_from_slice(&buf[half..]);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialBackend for FakeSerial {
        fn list(&self) -> Result<Vec<SerialEndpoint>> {
            Ok(self.endpoints.lock().unwrap().clone())
        }

        fn open(&self, path: &str, _settings: &LineSettings) -> Result<Box<dyn SerialLink>> {
            let known = self.endpoints.lock().unwrap().iter().any(|e| e.path == path);
            if !known || *self.refuse_open.lock().unwrap() {
                return Err(PrintRelayError::Serial(format!(
                    "{path}: No such file or directory"
                )));
            }
            Ok(Box::new(FakeLink {
                wire: Arc::clone(&self.wire),
                writes: Arc::clone(&self.writes),
                delay: *self.write_delay.lock().unwrap(),
                fail_with: *self.fail_with.lock().unwrap(),
            }))
        }
    }
}
