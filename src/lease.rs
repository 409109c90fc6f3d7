// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Operation leases.
//!
//! Applying tweaks and acquiring disk images both mutate directories in place,
//! so at most one of each may be in flight for a given key. Keys are device
//! identifiers for per-device directories, and target versions for the shared
//! image cache. A lease is released when dropped. Requests for a key that
//! already holds a lease are rejected rather than queued.
//!
//! # Scope
//!
//! Leases only exist inside one process. Components that must exclude each
//! other have to share the same [`DeviceLeases`] registry, which is why
//! [`crate::pipeline::TweakPipeline`] and [`crate::release::ReleaseAcquirer`]
//! accept one through `with_leases`. Separate processes working on the same
//! documents root are not serialized, so callers running more than one
//! process at a time must serialize them on their own.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

/// Registry of keys with an operation in flight.
///
/// Cloning the registry shares it, so every clone sees the same leases.
#[derive(Debug, Clone)]
pub struct DeviceLeases {
    operation: &'static str,
    held: Arc<Mutex<HashSet<String>>>,
}

impl DeviceLeases {
    /// Construct new lease registry for one kind of operation.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            held: Arc::default(),
        }
    }

    /// Take lease for key.
    ///
    /// # Errors
    ///
    /// - Return [`Busy`] if key already holds a lease in this registry.
    pub fn acquire(&self, key: impl Into<String>) -> Result<DeviceLease, Busy> {
        let key = key.into();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.clone()) {
            return Err(Busy {
                operation: self.operation,
                key,
            });
        }

        debug!("{} lease taken for {key}", self.operation);
        Ok(DeviceLease {
            operation: self.operation,
            key,
            held: Arc::clone(&self.held),
        })
    }

    /// Check if key currently holds a lease.
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Exclusive right to run an operation against one key.
#[derive(Debug)]
pub struct DeviceLease {
    operation: &'static str,
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl DeviceLease {
    /// Key the lease was taken for.
    pub fn key(&self) -> &str {
        self.key.as_str()
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        debug!("{} lease released for {}", self.operation, self.key);
    }
}

/// Operation already in flight for key.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{operation} already in progress for {key}")]
pub struct Busy {
    pub operation: &'static str,
    pub key: String,
}
