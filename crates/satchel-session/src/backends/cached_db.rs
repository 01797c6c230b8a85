//! Relational sessions behind a read-through cache.
//!
//! The table is authoritative. The cache only saves reads, so any cache
//! failure degrades to a miss.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::SessionData;
use crate::backend::{LoadOutcome, SessionBackend, data_expiry_age};
use crate::cache::Cache;
use crate::codec::SessionCodec;
use crate::context::StoreContext;
use crate::error::Result;
use crate::table::{SessionTable, SqliteSessionTable};

use super::db::DbStore;

/// Prefix of every cache key written by this store.
pub const KEY_PREFIX: &str = "satchel.sessions.cached_db";

fn ttl(seconds: i64) -> Duration {
    Duration::from_secs(seconds.max(0) as u64)
}

/// [`DbStore`] with a cache in front of reads.
pub struct CachedDbStore<T: SessionTable = SqliteSessionTable> {
    db: DbStore<T>,
    cache: Arc<dyn Cache>,
}

impl CachedDbStore<SqliteSessionTable> {
    /// Open a SQLite-backed store at `path`.
    pub fn open(ctx: StoreContext, path: impl AsRef<Path>, cache: Arc<dyn Cache>) -> Result<Self> {
        Ok(Self::new(ctx, SqliteSessionTable::open(path)?, cache))
    }

    /// Create a store over an in-memory SQLite table.
    pub fn open_in_memory(ctx: StoreContext, cache: Arc<dyn Cache>) -> Result<Self> {
        Ok(Self::new(ctx, SqliteSessionTable::open_in_memory()?, cache))
    }
}

impl<T: SessionTable> CachedDbStore<T> {
    /// Create a store over an existing table and cache.
    pub fn new(ctx: StoreContext, table: T, cache: Arc<dyn Cache>) -> Self {
        Self {
            db: DbStore::named(ctx, Arc::new(table), "CachedDbStore"),
            cache,
        }
    }

    /// The relational store underneath.
    pub fn db(&self) -> &DbStore<T> {
        &self.db
    }

    /// The cache in front.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Cache key for a backend key.
    pub fn cache_key(backend_key: &str) -> String {
        format!("{}{}", KEY_PREFIX, backend_key)
    }
}

impl<T: SessionTable> SessionBackend for CachedDbStore<T> {
    fn name(&self) -> &'static str {
        self.db.name()
    }

    fn context(&self) -> &StoreContext {
        self.db.context()
    }

    fn codec(&self) -> &SessionCodec {
        self.db.codec()
    }

    fn exists(&self, backend_key: &str) -> Result<bool> {
        let cached = self
            .cache
            .contains(&Self::cache_key(backend_key))
            .unwrap_or_else(|e| {
                debug!(error = %e, "Session cache lookup failed");
                false
            });
        Ok(cached || self.db.exists(backend_key)?)
    }

    fn load_data(&self, backend_key: &str) -> Result<LoadOutcome> {
        let cache_key = Self::cache_key(backend_key);
        match self.cache.get(&cache_key) {
            Ok(Some(data)) => return Ok(LoadOutcome::Loaded(data)),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Session cache read failed, falling back to database"),
        }

        let Some(row) = self.db.load_row(backend_key)? else {
            return Ok(LoadOutcome::Missing);
        };
        let data = self.db.codec().decode(&row.session_data);
        let remaining = (row.expire_date - Utc::now()).num_seconds();
        if let Err(e) = self.cache.set(&cache_key, &data, ttl(remaining)) {
            debug!(error = %e, "Session cache populate failed");
        }
        Ok(LoadOutcome::Loaded(data))
    }

    fn save(&self, backend_key: &str, data: &SessionData, must_create: bool) -> Result<()> {
        self.db.save(backend_key, data, must_create)?;
        let age = data_expiry_age(self.context(), data, Utc::now());
        if let Err(e) = self.cache.set(&Self::cache_key(backend_key), data, ttl(age)) {
            debug!(error = %e, "Session cache write failed");
        }
        Ok(())
    }

    fn delete(&self, backend_key: &str) -> Result<()> {
        self.db.delete(backend_key)?;
        if let Err(e) = self.cache.delete(&Self::cache_key(backend_key)) {
            debug!(error = %e, "Session cache evict failed");
        }
        Ok(())
    }

    fn clear_expired(&self) -> Result<usize> {
        self.db.clear_expired()
    }
}
