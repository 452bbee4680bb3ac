//! In-process `SharedStore` for tests. Expiry follows the tokio clock so tests
//! can pause and advance time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{SharedStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a backend outage: every operation fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, (_, expires))| *expires > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, expires)) if *expires > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_online()?;
        let expires = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn increment(&self, key: &str, retain_for: Duration) -> Result<i64, StoreError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let current = match entries.get(key) {
            Some((value, expires)) if *expires > now => {
                value.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                    value: value.clone(),
                })?
            }
            _ => 0,
        };
        let next = current + 1;
        entries.insert(key.to_string(), (next.to_string(), now + retain_for));
        Ok(next)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut entries = self.entries.lock().unwrap();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        self.ensure_online()?;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}
