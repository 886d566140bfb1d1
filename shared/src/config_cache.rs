use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::ConfigError;

/// How long a cached tenant config is trusted without revalidation
pub const CONFIG_CACHE_TTL: Duration = Duration::from_secs(60);

/// Outcome of asking the remote for a (possibly conditional) config
#[derive(Debug, Clone, PartialEq)]
pub enum Revalidation<T> {
    /// The validator we sent is still current
    NotModified,
    Updated { value: T, validator: Option<String> },
    /// The remote has no config for this key
    Missing,
}

#[async_trait]
pub trait ConfigLoader<T>: Send + Sync {
    async fn load(&self, key: &str, validator: Option<&str>)
        -> Result<Revalidation<T>, ConfigError>;
}

/// One tenant's cached remote config. `value: None` marks a known-missing
/// upstream entry.
#[derive(Debug, Clone)]
pub struct CachedConfigEntry<T> {
    pub value: Option<T>,
    pub validator: Option<String>,
    pub inserted_at: Instant,
}

struct Slot<T> {
    /// Completed load attempts, bumped while the entry lock is held
    attempts: AtomicU64,
    entry: Mutex<Option<CachedConfigEntry<T>>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            entry: Mutex::new(None),
        }
    }
}

/// Process-wide, etag-validated config cache.
///
/// Each key owns its own async lock, so a revalidation for one tenant never
/// blocks lookups for another, and concurrent lookups for the same stale
/// tenant share a single load.
pub struct ConfigCache<T> {
    ttl: Duration,
    loader: Arc<dyn ConfigLoader<T>>,
    slots: DashMap<String, Arc<Slot<T>>>,
}

impl<T> ConfigCache<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(loader: Arc<dyn ConfigLoader<T>>, ttl: Duration) -> Self {
        Self {
            ttl,
            loader,
            slots: DashMap::new(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let slot = self.slot(key);
        let seen = slot.attempts.load(Ordering::Acquire);
        let mut entry = slot.entry.lock().await;

        // Someone finished a load while we were waiting; share their result
        if slot.attempts.load(Ordering::Acquire) != seen {
            return entry.as_ref().and_then(|e| e.value.clone());
        }

        if let Some(cached) = entry.as_ref() {
            if cached.inserted_at.elapsed() < self.ttl {
                return cached.value.clone();
            }
        }

        let validator = entry.as_ref().and_then(|e| e.validator.clone());
        let outcome = self.loader.load(key, validator.as_deref()).await;
        slot.attempts.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(Revalidation::NotModified) => match entry.as_mut() {
                Some(cached) => {
                    tracing::debug!("Config for {} not modified", key);
                    cached.inserted_at = Instant::now();
                    cached.value.clone()
                }
                None => None,
            },
            Ok(Revalidation::Updated { value, validator }) => {
                tracing::info!("Config for {} updated (etag: {:?})", key, validator);
                *entry = Some(CachedConfigEntry {
                    value: Some(value.clone()),
                    validator,
                    inserted_at: Instant::now(),
                });
                Some(value)
            }
            Ok(Revalidation::Missing) => {
                tracing::info!("No remote config for {}", key);
                *entry = Some(CachedConfigEntry {
                    value: None,
                    validator: None,
                    inserted_at: Instant::now(),
                });
                None
            }
            Err(e) => {
                // Serve whatever we had; the next lookup retries
                tracing::warn!("Failed to load config for {}: {}", key, e);
                entry.as_ref().and_then(|cached| cached.value.clone())
            }
        }
    }

    /// Snapshot of the cached entry without triggering a load
    #[cfg(test)]
    pub(crate) async fn peek(&self, key: &str) -> Option<CachedConfigEntry<T>> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        let entry = slot.entry.lock().await;
        entry.clone()
    }

    fn slot(&self, key: &str) -> Arc<Slot<T>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot::new()))
                .value(),
        )
    }
}
