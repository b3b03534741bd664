//! Named mutexes.
//!
//! A few resource kinds must not mutate siblings concurrently, e.g. two
//! profiles of the same cluster. Handlers serialize on a human-readable
//! key; the guard releases the key when dropped.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// A table of mutexes created on first use of each key.
#[derive(Debug, Default)]
pub struct MutexKv {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Holds a key of a [`MutexKv`] until dropped.
#[derive(Debug)]
pub struct KeyGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyGuard {
    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        debug!(key = %self.key, "unlocked");
    }
}

impl MutexKv {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        // The table only ever grows, so a poisoned lock still holds a valid map.
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Wait for `key` and hold it until the guard is dropped.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        debug!(key, "locking");
        let guard = self.get(key).lock_owned().await;
        debug!(key, "locked");
        KeyGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Take `key` if no one holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        let guard = self.get(key).try_lock_owned().ok()?;
        Some(KeyGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }
}

static GLOBAL: LazyLock<MutexKv> = LazyLock::new(MutexKv::new);

/// The process-wide table.
pub fn global() -> &'static MutexKv {
    &GLOBAL
}

/// Lock `key` in the process-wide table.
pub async fn lock(key: &str) -> KeyGuard {
    GLOBAL.lock(key).await
}
