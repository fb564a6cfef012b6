// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{
    format::{FrameGeometry, FrameRate, PixelFormat},
    io::FrameResult,
    sync::lock,
};
use serde::Serialize;
use std::{collections::BTreeMap, fmt, sync::Arc, sync::Mutex};

/// Called with the new signal format after an input adopts it.
pub type FormatChangeCallback = dyn Fn(FrameGeometry, FrameRate, PixelFormat) + Send + Sync;

/// Called with a frame result and the number of frames processed so far in
/// the session.
pub type FrameResultCallback = dyn Fn(FrameResult, u64) + Send + Sync;

/// Called with the device index after a duplex profile change closed every
/// channel of the device.
pub type DeviceInvalidatedCallback = dyn Fn(u32) + Send + Sync;

/// Opaque handle returned on registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallbackId(u32);

impl CallbackId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for CallbackId {
    fn from(id: u32) -> Self {
        CallbackId(id)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entries<T: ?Sized> {
    next_id: u32,
    callbacks: BTreeMap<CallbackId, Arc<T>>,
}

/// Thread-safe `id -> callback` table.
///
/// Notification paths call [`CallbackRegistry::snapshot`] and invoke the
/// callbacks after the registry lock is released, so a callback may register
/// or unregister subscribers without deadlocking.
pub struct CallbackRegistry<T: ?Sized> {
    entries: Mutex<Entries<T>>,
}

impl<T: ?Sized> CallbackRegistry<T> {
    pub fn new() -> Self {
        CallbackRegistry {
            entries: Mutex::new(Entries {
                next_id: 1,
                callbacks: BTreeMap::new(),
            }),
        }
    }

    pub fn add(&self, callback: Arc<T>) -> CallbackId {
        let mut entries = lock(&self.entries);
        let id = CallbackId(entries.next_id);
        entries.next_id = entries.next_id.wrapping_add(1).max(1);
        entries.callbacks.insert(id, callback);
        id
    }

    /// Returns false when `id` was not registered.
    pub fn remove(&self, id: CallbackId) -> bool {
        lock(&self.entries).callbacks.remove(&id).is_some()
    }

    /// Callbacks in registration order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        lock(&self.entries).callbacks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).callbacks.clear();
    }
}

impl<T: ?Sized> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for CallbackRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("len", &self.len())
            .finish()
    }
}
