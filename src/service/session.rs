//! Long-lived session registry.
//!
//! Maps a session key to its handle, creating on first use and never
//! evicting. Handles are process-lifetime resources; nothing here closes
//! them.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};

use super::Result;

/// Create-on-miss map of session handles.
///
/// Concurrent first-use on one key constructs exactly one handle; every
/// caller observes the same instance once construction completes.
/// Construction failure propagates to the caller and leaves the key
/// unconstructed, so a later call retries from scratch.
pub struct SessionMap<K, V> {
    inner: RwLock<HashMap<K, Arc<OnceCell<Arc<V>>>>>,
}

impl<K, V> Default for SessionMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> SessionMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `key`, constructing it with `init` on first use.
    pub async fn get_or_create<F, Fut>(&self, key: K, init: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = {
            let map = self.inner.read().await;
            map.get(&key).cloned()
        };

        let cell = match cell {
            Some(cell) => cell,
            None => {
                let mut map = self.inner.write().await;
                map.entry(key)
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            }
        };

        // The cell serializes initialization per key; a failed init leaves it
        // empty and the next caller runs its own init.
        let handle = cell
            .get_or_try_init(|| async { init().await.map(Arc::new) })
            .await?;
        Ok(Arc::clone(handle))
    }
}
