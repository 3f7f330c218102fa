//! Storage policy: pick exactly one backend per write, never leave a twin
//!
//! A write goes to the backend selected by its `Durability` and then deletes
//! the same key from the other backend. Reads check the durable backend
//! first, so a restarted process recovers a remembered session without
//! knowing in advance where it was written.
//!
//! Nothing here returns an error. Backend failures are logged and reported
//! through `Placement` (writes) or treated as a miss (reads).

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::backend::{Durability, KeyValueBackend, MemoryBackend};

/// Where a write actually landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Durable,
    /// Either requested, or the fallback after a failed durable write
    Ephemeral,
    /// Nothing could be written
    Skipped,
}

impl From<Durability> for Placement {
    fn from(durability: Durability) -> Self {
        match durability {
            Durability::Durable => Placement::Durable,
            Durability::Ephemeral => Placement::Ephemeral,
        }
    }
}

/// Durable/ephemeral backend pair with the write-one-clear-other rule.
#[derive(Clone)]
pub struct StoragePolicy {
    durable: Arc<dyn KeyValueBackend>,
    ephemeral: Arc<dyn KeyValueBackend>,
}

impl StoragePolicy {
    pub fn new(durable: Arc<dyn KeyValueBackend>, ephemeral: Arc<dyn KeyValueBackend>) -> Self {
        Self { durable, ephemeral }
    }

    /// Two independent memory backends. Nothing outlives the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), Arc::new(MemoryBackend::new()))
    }

    /// The backend a write with this durability targets.
    pub fn backend(&self, durability: Durability) -> &dyn KeyValueBackend {
        match durability {
            Durability::Durable => self.durable.as_ref(),
            Durability::Ephemeral => self.ephemeral.as_ref(),
        }
    }

    fn other(&self, durability: Durability) -> &dyn KeyValueBackend {
        match durability {
            Durability::Durable => self.ephemeral.as_ref(),
            Durability::Ephemeral => self.durable.as_ref(),
        }
    }

    /// Serialize `value` into the selected backend and clear `key` from the other.
    ///
    /// A failed durable write falls back to the ephemeral backend so the value
    /// is still readable for the rest of the process lifetime.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        durability: Durability,
    ) -> Placement {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                error!(key, error = %e, "failed to serialize value, nothing written");
                return Placement::Skipped;
            }
        };

        match self.backend(durability).set(key, &json) {
            Ok(()) => {
                clear(self.other(durability), key);
                debug!(key, backend = durability.label(), "value written");
                Placement::from(durability)
            }
            Err(e) if durability == Durability::Durable => {
                warn!(key, error = %e, "durable write failed, falling back to ephemeral storage");
                match self.ephemeral.set(key, &json) {
                    Ok(()) => {
                        clear(self.durable.as_ref(), key);
                        Placement::Ephemeral
                    }
                    Err(e) => {
                        error!(key, error = %e, "ephemeral fallback write failed");
                        Placement::Skipped
                    }
                }
            }
            Err(e) => {
                error!(key, error = %e, "ephemeral write failed");
                Placement::Skipped
            }
        }
    }

    /// Read and decode `key`, durable backend first.
    ///
    /// A backend error or an undecodable payload counts as a miss for that
    /// backend and the next one is tried.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        [Durability::Durable, Durability::Ephemeral]
            .into_iter()
            .find_map(|durability| self.read_from(durability, key))
    }

    fn read_from<T: DeserializeOwned>(&self, durability: Durability, key: &str) -> Option<T> {
        let raw = match self.backend(durability).get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, backend = durability.label(), error = %e, "backend read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, backend = durability.label(), error = %e, "stored value is not decodable");
                None
            }
        }
    }

    /// Which backend currently holds `key`, durable first.
    pub fn locate(&self, key: &str) -> Option<Durability> {
        [Durability::Durable, Durability::Ephemeral]
            .into_iter()
            .find(|d| matches!(self.backend(*d).get(key), Ok(Some(_))))
    }

    /// Delete `key` from both backends.
    pub fn remove(&self, key: &str) {
        clear(self.durable.as_ref(), key);
        clear(self.ephemeral.as_ref(), key);
    }
}

fn clear(backend: &dyn KeyValueBackend, key: &str) {
    if let Err(e) = backend.remove(key) {
        warn!(key, backend = backend.durability().label(), error = %e, "failed to clear key");
    }
}
