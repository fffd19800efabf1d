//! Local reconciliation state.
//!
//! Maps an account key to the credential last provisioned for it. The map
//! lives only in memory; each cycle realigns it with the principals live on
//! the proxy before provisioning. A single async mutex guards it. The guard
//! is never held across a provisioning call: each key belongs to one worker
//! per cycle, so per-key check-then-set needs no wider lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

/// Key → credential entries.
pub type CacheEntries = HashMap<String, String>;

/// Shared handle to the reconciliation cache. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct LocalStateCache {
    inner: Arc<Mutex<CacheEntries>>,
}

impl LocalStateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the entries for a bulk update.
    pub async fn lock(&self) -> MutexGuard<'_, CacheEntries> {
        self.inner.lock().await
    }

    /// Credential recorded for `key`.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().await.get(key).cloned()
    }

    /// Record `credential` as provisioned for `key`.
    pub async fn insert(&self, key: String, credential: String) {
        self.inner.lock().await.insert(key, credential);
    }

    /// Forget `key`.
    pub async fn remove(&self, key: &str) -> Option<String> {
        self.inner.lock().await.remove(key)
    }

    /// Forget everything.
    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Sorted copy of the entries.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
