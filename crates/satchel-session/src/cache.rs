//! Key-value cache used by the cache-backed stores.
//!
//! [`MemoryCache`] is an in-process LRU with per-entry TTL. Other caches plug
//! in through the [`Cache`] trait and are looked up by alias in a
//! [`CacheRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use satchel_config::{DEFAULT_CACHE_ALIAS, SatchelConfig};

use crate::SessionData;

/// Longest key accepted, in bytes.
pub const MAX_KEY_LENGTH: usize = 250;

/// Errors raised by a cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The key cannot be stored by this cache.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// The cache could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Operations the session stores need from a cache.
pub trait Cache: Send + Sync + fmt::Debug {
    /// Fetch a live entry.
    fn get(&self, key: &str) -> CacheResult<Option<SessionData>>;

    /// Store an entry, replacing any existing one. A zero TTL stores nothing.
    fn set(&self, key: &str, value: &SessionData, ttl: Duration) -> CacheResult<()>;

    /// Store an entry only if no live entry exists. Returns `false` only when a
    /// live entry is already present; a zero TTL claims the key but stores nothing.
    fn add(&self, key: &str, value: &SessionData, ttl: Duration) -> CacheResult<bool>;

    /// Remove an entry. Returns whether one was live.
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Whether a live entry exists.
    fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Reject keys a networked cache would refuse.
pub fn validate_key(key: &str) -> CacheResult<()> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CacheError::InvalidKey(format!("{:?} contains whitespace", key)));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: SessionData,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process LRU cache with per-entry TTL.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    capacity: NonZeroUsize,
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

impl MemoryCache {
    /// Create a cache holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    /// Number of entries held, live or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn live(entries: &mut LruCache<String, CacheEntry>, key: &str) -> Option<SessionData> {
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                trace!(key, "Cache entry expired");
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn put(
        entries: &mut LruCache<String, CacheEntry>,
        key: &str,
        value: &SessionData,
        ttl: Duration,
    ) {
        if ttl.is_zero() {
            entries.pop(key);
            return;
        }
        let entry = CacheEntry {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        };
        if let Some((evicted, _)) = entries.push(key.to_string(), entry)
            && evicted != key
        {
            debug!(evicted = %evicted, "Cache full, evicted least recently used entry");
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> CacheResult<Option<SessionData>> {
        validate_key(key)?;
        Ok(Self::live(&mut self.entries.lock(), key))
    }

    fn set(&self, key: &str, value: &SessionData, ttl: Duration) -> CacheResult<()> {
        validate_key(key)?;
        Self::put(&mut self.entries.lock(), key, value, ttl);
        Ok(())
    }

    fn add(&self, key: &str, value: &SessionData, ttl: Duration) -> CacheResult<bool> {
        validate_key(key)?;
        let mut entries = self.entries.lock();
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }
        Self::put(&mut entries, key, value, ttl);
        Ok(true)
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;
        let removed = self.entries.lock().pop(key);
        Ok(removed.is_some_and(|e| e.is_live(Instant::now())))
    }
}

/// Caches addressable by alias.
#[derive(Debug, Clone, Default)]
pub struct CacheRegistry {
    caches: HashMap<String, Arc<dyn Cache>>,
}

impl CacheRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one [`MemoryCache`] per configured alias, plus the default alias.
    pub fn from_config(config: &SatchelConfig) -> Self {
        let mut registry = Self::new();
        for (alias, settings) in &config.caches {
            registry.register(alias, Arc::new(MemoryCache::new(settings.max_entries)));
        }
        if !registry.caches.contains_key(DEFAULT_CACHE_ALIAS) {
            let settings = config.cache_settings(DEFAULT_CACHE_ALIAS).unwrap_or_default();
            registry.register(
                DEFAULT_CACHE_ALIAS,
                Arc::new(MemoryCache::new(settings.max_entries)),
            );
        }
        registry
    }

    /// Register or replace a cache.
    pub fn register(&mut self, alias: impl Into<String>, cache: Arc<dyn Cache>) {
        self.caches.insert(alias.into(), cache);
    }

    /// Look up a cache by alias.
    pub fn get(&self, alias: &str) -> crate::Result<Arc<dyn Cache>> {
        self.caches.get(alias).cloned().ok_or_else(|| {
            crate::SessionError::Config(format!("cache alias '{}' is not configured", alias))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn data(n: i64) -> SessionData {
        let mut d = SessionData::new();
        d.insert("n".to_string(), json!(n));
        d
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::new(10);
        cache.set("k", &data(1), MINUTE).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(data(1)));
        assert!(cache.contains("k").unwrap());

        assert!(cache.delete("k").unwrap());
        assert!(!cache.delete("k").unwrap());
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn test_add_does_not_overwrite() {
        let cache = MemoryCache::new(10);
        assert!(cache.add("k", &data(1), MINUTE).unwrap());
        assert!(!cache.add("k", &data(2), MINUTE).unwrap());
        assert_eq!(cache.get("k").unwrap(), Some(data(1)));
    }

    #[test]
    fn test_entries_expire() {
        let cache = MemoryCache::new(10);
        cache
            .set("k", &data(1), Duration::from_millis(20))
            .unwrap();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k").unwrap(), None);
        assert!(cache.add("k", &data(2), MINUTE).unwrap());
    }

    #[test]
    fn test_zero_ttl_stores_nothing() {
        let cache = MemoryCache::new(10);
        cache.set("k", &data(1), MINUTE).unwrap();
        cache.set("k", &data(2), Duration::ZERO).unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
        assert!(cache.add("k", &data(3), Duration::ZERO).unwrap());
        assert_eq!(cache.get("k").unwrap(), None);

        cache.set("k", &data(4), MINUTE).unwrap();
        assert!(!cache.add("k", &data(5), Duration::ZERO).unwrap());
        assert_eq!(cache.get("k").unwrap(), Some(data(4)));
    }

    #[test]
    fn test_lru_eviction() {
        let cache = MemoryCache::new(2);
        cache.set("a", &data(1), MINUTE).unwrap();
        cache.set("b", &data(2), MINUTE).unwrap();
        cache.get("a").unwrap();
        cache.set("c", &data(3), MINUTE).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a").unwrap());
        assert!(!cache.contains("b").unwrap());
    }

    #[test]
    fn test_invalid_keys() {
        let cache = MemoryCache::new(10);
        assert!(matches!(
            cache.get("has space"),
            Err(CacheError::InvalidKey(_))
        ));
        let long = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(cache.set(&long, &data(1), MINUTE).is_err());
    }

    #[test]
    fn test_registry_always_has_default() {
        let registry = CacheRegistry::from_config(&SatchelConfig::default());
        assert!(registry.get(DEFAULT_CACHE_ALIAS).is_ok());
        assert!(registry.get("sessions").is_err());
    }

    #[test]
    fn test_registry_from_config() {
        let config = SatchelConfig::from_toml(
            r#"
            [caches.sessions]
            max_entries = 5
            "#,
        )
        .unwrap();
        let registry = CacheRegistry::from_config(&config);
        assert!(registry.get("sessions").is_ok());
        assert!(registry.get(DEFAULT_CACHE_ALIAS).is_ok());
    }
}
