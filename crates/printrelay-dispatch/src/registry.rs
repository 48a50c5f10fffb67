// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Presence of print-bridge devices.
//
// Devices heartbeat while they are up; a device counts as online until its
// last heartbeat is older than the TTL.  Presence is memory only: after a
// restart devices reappear with their next heartbeat.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info};

use printrelay_core::types::DeviceId;

#[derive(Debug, Clone)]
struct Presence {
    owner: String,
    last_seen: Instant,
}

/// Online devices per account, plus a wake-up signal per account for
/// devices waiting on new work.
pub struct DeviceRegistry {
    ttl: Duration,
    devices: Mutex<HashMap<DeviceId, Presence>>,
    wakers: Mutex<HashMap<String, Arc<Notify>>>,
}

impl DeviceRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            devices: Mutex::new(HashMap::new()),
            wakers: Mutex::new(HashMap::new()),
        }
    }

    /// Record a heartbeat from `device` on behalf of `owner`.
    pub fn heartbeat(&self, owner: &str, device: &DeviceId) {
        let mut devices = self.devices.lock().expect("device registry lock poisoned");
        let previous = devices.insert(
            device.clone(),
            Presence {
                owner: owner.to_string(),
                last_seen: Instant::now(),
            },
        );
        if previous.is_none() {
            info!(owner, device = %device, "print bridge device online");
        } else {
            debug!(device = %device, "heartbeat");
        }
    }

    /// The freshest online device of `owner`.
    pub fn online_device(&self, owner: &str) -> Option<DeviceId> {
        let devices = self.devices.lock().expect("device registry lock poisoned");
        devices
            .iter()
            .filter(|(_, p)| p.owner == owner && p.last_seen.elapsed() <= self.ttl)
            .max_by_key(|(_, p)| p.last_seen)
            .map(|(id, _)| id.clone())
    }

    pub fn is_online(&self, device: &DeviceId) -> bool {
        let devices = self.devices.lock().expect("device registry lock poisoned");
        devices
            .get(device)
            .is_some_and(|p| p.last_seen.elapsed() <= self.ttl)
    }

    /// Account a device heartbeated for, if it is known.
    pub fn owner_of(&self, device: &DeviceId) -> Option<String> {
        let devices = self.devices.lock().expect("device registry lock poisoned");
        devices.get(device).map(|p| p.owner.clone())
    }

    /// Drop devices whose presence expired, and the wake-up signals of
    /// accounts with no live device and nobody waiting.  Returns how many
    /// devices were dropped.
    pub fn prune(&self) -> usize {
        let mut devices = self.devices.lock().expect("device registry lock poisoned");
        let before = devices.len();
        devices.retain(|_, p| p.last_seen.elapsed() <= self.ttl);
        let dropped = before - devices.len();
        if dropped > 0 {
            debug!(dropped, "expired device presence");
        }

        let mut wakers = self.wakers.lock().expect("device waker lock poisoned");
        // A waiting claim holds its own clone of the signal.
        wakers.retain(|owner, notify| {
            Arc::strong_count(notify) > 1 || devices.values().any(|p| &p.owner == owner)
        });
        dropped
    }

    /// Signal that fires when new work is available for `owner`.
    pub fn waker(&self, owner: &str) -> Arc<Notify> {
        let mut wakers = self.wakers.lock().expect("device waker lock poisoned");
        Arc::clone(wakers.entry(owner.to_string()).or_default())
    }

    /// Wake every device of `owner` waiting for work.
    pub fn wake(&self, owner: &str) {
        let wakers = self.wakers.lock().expect("device waker lock poisoned");
        if let Some(notify) = wakers.get(owner) {
            notify.notify_waiters();
        }
    }

    #[cfg(test)]
    fn waker_count(&self) -> usize {
        self.wakers.lock().expect("device waker lock poisoned").len()
    }
}
