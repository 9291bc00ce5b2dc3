//! Time-bounded value cache
//!
//! Owns a single value plus the instant it was loaded. Callers ask for the
//! value with a TTL and supply the loader; a stale or missing value is
//! reloaded on the spot.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug)]
struct Entry<T> {
    value: T,
    loaded_at: Instant,
}

/// A single cached value with explicit invalidation
#[derive(Debug)]
pub struct TtlCache<T> {
    entry: Mutex<Option<Entry<T>>>,
}

impl<T> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TtlCache<T> {
    pub fn new() -> Self {
        Self {
            entry: Mutex::new(None),
        }
    }

    /// Drop the cached value so the next read reloads
    pub fn invalidate(&self) {
        if let Ok(mut entry) = self.entry.lock() {
            *entry = None;
        }
    }

    /// Whether a value is currently held (fresh or stale)
    pub fn is_populated(&self) -> bool {
        self.entry.lock().map(|e| e.is_some()).unwrap_or(false)
    }
}

impl<T: Clone> TtlCache<T> {
    /// Return the cached value if younger than `ttl`, otherwise reload it
    ///
    /// A failed reload leaves any previous value in place.
    pub fn get_or_refresh<F>(&self, ttl: Duration, refresh: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut entry = self
            .entry
            .lock()
            .map_err(|_| Error::InvalidData("Cache lock poisoned".into()))?;

        if let Some(current) = entry.as_ref() {
            if current.loaded_at.elapsed() < ttl {
                return Ok(current.value.clone());
            }
        }

        let value = refresh()?;
        *entry = Some(Entry {
            value: value.clone(),
            loaded_at: Instant::now(),
        });
        Ok(value)
    }
}
