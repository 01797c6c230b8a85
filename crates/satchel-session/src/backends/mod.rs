//! Session storage backends.

mod cache;
mod cached_db;
mod db;
mod file;
mod signed_cookies;

use std::sync::Arc;

use satchel_config::{BackendKind, SatchelConfig};

pub use cache::CacheStore;
pub use cached_db::CachedDbStore;
pub use db::DbStore;
pub use file::FileStore;
pub use signed_cookies::SignedCookieStore;

use crate::backend::SessionBackend;
use crate::cache::CacheRegistry;
use crate::context::StoreContext;
use crate::error::Result;

/// Build the backend selected by `[storage]`.
pub fn open_backend(
    config: &SatchelConfig,
    ctx: StoreContext,
    caches: &CacheRegistry,
) -> Result<Arc<dyn SessionBackend>> {
    let storage = config.storage_config();
    let cache_alias = ctx.settings().cache_alias.clone();

    let store: Arc<dyn SessionBackend> = match storage.backend {
        BackendKind::Db => Arc::new(DbStore::open(ctx, storage.database_path())?),
        BackendKind::CachedDb => Arc::new(CachedDbStore::open(
            ctx,
            storage.database_path(),
            caches.get(&cache_alias)?,
        )?),
        BackendKind::File => Arc::new(FileStore::new(ctx)?),
        BackendKind::Cache => Arc::new(CacheStore::new(ctx, caches.get(&cache_alias)?)),
        BackendKind::SignedCookies => Arc::new(SignedCookieStore::new(ctx)),
    };

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_config::{SessionSettings, StorageConfig};
    use tempfile::TempDir;

    fn ctx(settings: SessionSettings) -> StoreContext {
        StoreContext::new(settings, "factory-secret").unwrap()
    }

    fn config(backend: BackendKind, dir: &TempDir) -> SatchelConfig {
        let mut config = SatchelConfig::new();
        config.storage = Some(StorageConfig {
            backend,
            database: Some(dir.path().join("sessions.db")),
        });
        config
    }

    #[test]
    fn test_open_each_backend() {
        let dir = TempDir::new().unwrap();
        let settings = SessionSettings {
            file_path: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let expected = [
            (BackendKind::Db, "DbStore"),
            (BackendKind::CachedDb, "CachedDbStore"),
            (BackendKind::File, "FileStore"),
            (BackendKind::Cache, "CacheStore"),
            (BackendKind::SignedCookies, "SignedCookieStore"),
        ];
        for (kind, name) in expected {
            let config = config(kind, &dir);
            let caches = CacheRegistry::from_config(&config);
            let store = open_backend(&config, ctx(settings.clone()), &caches).unwrap();
            assert_eq!(store.name(), name);
        }
    }

    #[test]
    fn test_unknown_cache_alias() {
        let dir = TempDir::new().unwrap();
        let settings = SessionSettings {
            cache_alias: "sessions".to_string(),
            ..Default::default()
        };
        let config = config(BackendKind::Cache, &dir);
        let caches = CacheRegistry::from_config(&config);
        assert!(open_backend(&config, ctx(settings), &caches).is_err());
    }
}
