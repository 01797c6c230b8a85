//! Sessions in a relational table.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::SessionData;
use crate::backend::{LoadOutcome, SessionBackend, data_expiry_date};
use crate::codec::SessionCodec;
use crate::context::StoreContext;
use crate::error::Result;
use crate::table::{SessionRow, SessionTable, SqliteSessionTable};

/// Store keeping one row per session in a [`SessionTable`].
pub struct DbStore<T: SessionTable = SqliteSessionTable> {
    ctx: StoreContext,
    codec: SessionCodec,
    table: Arc<T>,
    name: &'static str,
}

impl DbStore<SqliteSessionTable> {
    /// Open a SQLite-backed store at `path`.
    pub fn open(ctx: StoreContext, path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(ctx, SqliteSessionTable::open(path)?))
    }

    /// Create a store over an in-memory SQLite table.
    pub fn open_in_memory(ctx: StoreContext) -> Result<Self> {
        Ok(Self::new(ctx, SqliteSessionTable::open_in_memory()?))
    }
}

impl<T: SessionTable> DbStore<T> {
    /// Create a store over an existing table.
    pub fn new(ctx: StoreContext, table: T) -> Self {
        Self::named(ctx, Arc::new(table), "DbStore")
    }

    /// Create a store that signs under another backend's name.
    pub(crate) fn named(ctx: StoreContext, table: Arc<T>, name: &'static str) -> Self {
        info!(backend = name, "Relational session store ready");
        Self {
            codec: SessionCodec::new(&ctx, name),
            ctx,
            table,
            name,
        }
    }

    /// The underlying table.
    pub fn table(&self) -> &Arc<T> {
        &self.table
    }

    /// The live row for a backend key.
    pub fn load_row(&self, backend_key: &str) -> Result<Option<SessionRow>> {
        self.table.select_unexpired(backend_key, Utc::now())
    }
}

impl<T: SessionTable> SessionBackend for DbStore<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn context(&self) -> &StoreContext {
        &self.ctx
    }

    fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    fn exists(&self, backend_key: &str) -> Result<bool> {
        self.table.exists(backend_key)
    }

    fn load_data(&self, backend_key: &str) -> Result<LoadOutcome> {
        Ok(match self.load_row(backend_key)? {
            Some(row) => LoadOutcome::Loaded(self.codec.decode(&row.session_data)),
            None => LoadOutcome::Missing,
        })
    }

    fn save(&self, backend_key: &str, data: &SessionData, must_create: bool) -> Result<()> {
        let row = SessionRow {
            session_key: backend_key.to_string(),
            session_data: self.codec.encode(data)?,
            expire_date: data_expiry_date(&self.ctx, data, Utc::now()),
        };
        if must_create {
            self.table.insert(&row)
        } else {
            self.table.update(&row)
        }
    }

    fn delete(&self, backend_key: &str) -> Result<()> {
        self.table.delete(backend_key)?;
        Ok(())
    }

    fn clear_expired(&self) -> Result<usize> {
        let removed = self.table.delete_expired(Utc::now())?;
        debug!(backend = self.name, removed, "Cleared expired sessions");
        Ok(removed)
    }
}
