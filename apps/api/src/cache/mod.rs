//! Response cache for transform outputs.
//!
//! Keyed by `resume_enhancer:cache:<class>:<fingerprint>`. The cache only ever
//! changes latency and cost: every backend failure is logged and treated as a
//! miss (reads) or a no-op (writes).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::models::enhancement::{OperationClass, TransformMode};
use crate::store::{SharedStore, KEY_NAMESPACE};

pub mod fingerprint;
pub mod handlers;

pub use fingerprint::fingerprint;

/// Default lifetime of a cached response.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
pub struct ResponseCache {
    backend: Option<Arc<dyn SharedStore>>,
    ttl: Duration,
}

impl ResponseCache {
    /// A cache that never hits and never stores anything.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn shared(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self {
            backend: Some(store),
            ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn get(
        &self,
        class: OperationClass,
        payload: &str,
        mode: TransformMode,
    ) -> Option<String> {
        let store = self.backend.as_ref()?;
        let key = cache_key(class, payload, mode);
        match store.get(&key).await {
            Ok(Some(text)) => {
                debug!("Cache hit for {key}");
                Some(text)
            }
            Ok(None) => {
                debug!("Cache miss for {key}");
                None
            }
            Err(e) => {
                warn!("Cache read failed for {key}, treating as miss: {e}");
                None
            }
        }
    }

    /// Stores `text` under the request's key. `ttl` overrides the configured lifetime.
    pub async fn put(
        &self,
        class: OperationClass,
        payload: &str,
        mode: TransformMode,
        text: &str,
        ttl: Option<Duration>,
    ) {
        let Some(store) = self.backend.as_ref() else {
            return;
        };
        let key = cache_key(class, payload, mode);
        let ttl = ttl.unwrap_or(self.ttl);
        match store.set_with_ttl(&key, text, ttl).await {
            Ok(()) => debug!("Cached response under {key} for {}s", ttl.as_secs()),
            Err(e) => warn!("Cache write failed for {key}, continuing without cache: {e}"),
        }
    }

    /// Removes every entry whose key starts with `resume_enhancer:cache:<prefix>`.
    /// An empty prefix clears the whole cache namespace.
    pub async fn invalidate(&self, prefix: &str) -> u64 {
        let Some(store) = self.backend.as_ref() else {
            return 0;
        };
        let full_prefix = format!("{}{prefix}", cache_namespace());
        match store.delete_prefix(&full_prefix).await {
            Ok(removed) => {
                debug!("Invalidated {removed} cache entries under {full_prefix}");
                removed
            }
            Err(e) => {
                warn!("Cache invalidation failed for {full_prefix}: {e}");
                0
            }
        }
    }
}

fn cache_namespace() -> String {
    format!("{KEY_NAMESPACE}:cache:")
}

pub fn cache_key(class: OperationClass, payload: &str, mode: TransformMode) -> String {
    format!(
        "{}{}:{}",
        cache_namespace(),
        class.as_str(),
        fingerprint(class, payload, mode)
    )
}
