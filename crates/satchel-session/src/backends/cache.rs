//! Sessions held only in a cache.
//!
//! Entries vanish when the cache evicts or expires them, so this store trades
//! durability for speed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::SessionData;
use crate::backend::{LoadOutcome, SessionBackend, data_expiry_age};
use crate::cache::Cache;
use crate::codec::SessionCodec;
use crate::context::StoreContext;
use crate::error::{Result, SessionError};

/// Prefix of every cache key written by this store.
pub const KEY_PREFIX: &str = "satchel.sessions.cache";

/// Key-generation attempts before giving up.
pub const MAX_CREATE_ATTEMPTS: usize = 10_000;

/// Store keeping sessions in a [`Cache`].
#[derive(Debug)]
pub struct CacheStore {
    ctx: StoreContext,
    codec: SessionCodec,
    cache: Arc<dyn Cache>,
}

impl CacheStore {
    /// Create a store over `cache`.
    pub fn new(ctx: StoreContext, cache: Arc<dyn Cache>) -> Self {
        Self {
            codec: SessionCodec::new(&ctx, "CacheStore"),
            ctx,
            cache,
        }
    }

    /// Cache key for a backend key.
    pub fn cache_key(backend_key: &str) -> String {
        format!("{}{}", KEY_PREFIX, backend_key)
    }
}

impl SessionBackend for CacheStore {
    fn name(&self) -> &'static str {
        "CacheStore"
    }

    fn context(&self) -> &StoreContext {
        &self.ctx
    }

    fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    fn max_create_attempts(&self) -> Option<usize> {
        Some(MAX_CREATE_ATTEMPTS)
    }

    fn exists(&self, backend_key: &str) -> Result<bool> {
        Ok(self.cache.contains(&Self::cache_key(backend_key))?)
    }

    fn load_data(&self, backend_key: &str) -> Result<LoadOutcome> {
        match self.cache.get(&Self::cache_key(backend_key)) {
            Ok(Some(data)) => Ok(LoadOutcome::Loaded(data)),
            Ok(None) => Ok(LoadOutcome::Missing),
            Err(e) => {
                debug!(error = %e, "Session cache read failed");
                Ok(LoadOutcome::Missing)
            }
        }
    }

    fn save(&self, backend_key: &str, data: &SessionData, must_create: bool) -> Result<()> {
        let key = Self::cache_key(backend_key);
        let age = data_expiry_age(&self.ctx, data, Utc::now());

        // Already past its expiry: nothing worth keeping
        if age <= 0 {
            debug!(backend_key, "Session already expired, not cached");
            if !must_create {
                self.cache.delete(&key)?;
            }
            return Ok(());
        }
        let ttl = Duration::from_secs(age as u64);

        if must_create {
            if !self.cache.add(&key, data, ttl)? {
                return Err(SessionError::AlreadyExists);
            }
            return Ok(());
        }

        if !self.cache.contains(&key)? {
            return Err(SessionError::DoesNotExist);
        }
        self.cache.set(&key, data, ttl)?;
        Ok(())
    }

    fn delete(&self, backend_key: &str) -> Result<()> {
        self.cache.delete(&Self::cache_key(backend_key))?;
        Ok(())
    }

    fn clear_expired(&self) -> Result<usize> {
        // The cache expires entries itself
        Ok(0)
    }
}
