//! Server-side session storage.
//!
//! This crate provides a session lifecycle shared by several backends:
//! - [`DbStore`]: one row per session in SQLite
//! - [`CachedDbStore`]: the same table behind a read-through cache
//! - [`FileStore`]: one file per session
//! - [`CacheStore`]: cache only
//! - [`SignedCookieStore`]: no server state, the key is the signed payload
//!
//! Session data is a JSON attribute map, signed with a backend-specific salt
//! before it reaches storage. Keys may optionally be stored hashed.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use satchel_session::{DbStore, Session, StoreContext};
//!
//! let ctx = StoreContext::new(settings, secret)?;
//! let store = Arc::new(DbStore::open(ctx, "sessions.db")?);
//!
//! let mut session = Session::new(store, None);
//! session.set("user_id", 42)?;
//! session.save(false)?;
//! let cookie_value = session.session_key();
//! ```

pub mod backend;
pub mod backends;
pub mod cache;
pub mod codec;
pub mod context;
pub mod error;
pub mod expiry;
pub mod key;
pub mod serializer;
pub mod session;
pub mod signing;
pub mod table;

use std::collections::HashMap;

/// A session's attributes.
pub type SessionData = HashMap<String, serde_json::Value>;

pub use backend::{LoadOutcome, Persistence, SessionBackend};
pub use backends::{
    CacheStore, CachedDbStore, DbStore, FileStore, SignedCookieStore, open_backend,
};
pub use cache::{Cache, CacheError, CacheRegistry, MemoryCache};
pub use codec::{DecodeStrategy, SessionCodec};
pub use context::StoreContext;
pub use error::{Result, SessionError};
pub use expiry::{EXPIRY_KEY, Expiry, ExpiryQuery, ExpirySetting};
pub use key::KeyCodec;
pub use serializer::{JsonSerializer, Serializer};
pub use session::Session;
pub use signing::{SignatureError, Signer, TimestampSigner};
pub use table::{SessionRow, SessionTable, SqliteSessionTable};
