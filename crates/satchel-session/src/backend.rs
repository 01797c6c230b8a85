//! Storage primitives each backend provides to [`Session`](crate::Session).

use chrono::{DateTime, Utc};

use crate::SessionData;
use crate::codec::SessionCodec;
use crate::context::StoreContext;
use crate::error::{Result, SessionError};
use crate::expiry::{Expiry, expiry_age, expiry_date};
use crate::key::KeyCodec;

/// Result of reading a record.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The record decoded to these attributes.
    Loaded(SessionData),
    /// No live record exists for the key.
    Missing,
    /// The record exists but could not be trusted or decoded.
    Corrupted,
    /// The record exists but has expired.
    Expired,
}

/// Where session state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Server-side records addressed by a random key.
    Server,
    /// No server state. The key is the signed payload itself.
    Client,
}

/// A session storage backend.
///
/// Keys passed here are backend keys: already mapped through
/// [`KeyCodec::to_backend_key`].
pub trait SessionBackend: Send + Sync {
    /// Short type name, used in salts and messages.
    fn name(&self) -> &'static str;

    /// Shared settings and collaborators.
    fn context(&self) -> &StoreContext;

    /// Envelope bound to this backend's salt.
    fn codec(&self) -> &SessionCodec;

    /// Key policy used for sessions on this backend.
    fn key_codec(&self) -> KeyCodec {
        self.context().key_codec()
    }

    /// Where session state lives.
    fn persistence(&self) -> Persistence {
        Persistence::Server
    }

    /// Upper bound on key-generation attempts in `Session::create`.
    fn max_create_attempts(&self) -> Option<usize> {
        None
    }

    /// Whether a record exists for the key.
    fn exists(&self, backend_key: &str) -> Result<bool>;

    /// Read and decode a record.
    fn load_data(&self, backend_key: &str) -> Result<LoadOutcome>;

    /// Write a record.
    ///
    /// With `must_create` the write fails with [`SessionError::AlreadyExists`]
    /// if a record exists. Without it the write fails with
    /// [`SessionError::DoesNotExist`] if none does.
    fn save(&self, backend_key: &str, data: &SessionData, must_create: bool) -> Result<()>;

    /// Remove a record. A missing record is not an error.
    fn delete(&self, backend_key: &str) -> Result<()>;

    /// Remove expired records and return how many went.
    fn clear_expired(&self) -> Result<usize> {
        Err(SessionError::Unsupported(self.name()))
    }
}

/// Expiry instant for `data` saved at `now`.
pub fn data_expiry_date(ctx: &StoreContext, data: &SessionData, now: DateTime<Utc>) -> DateTime<Utc> {
    expiry_date(Expiry::from_data(data), now, ctx.cookie_age())
}

/// Seconds `data` stays live when saved at `now`.
pub fn data_expiry_age(ctx: &StoreContext, data: &SessionData, now: DateTime<Utc>) -> i64 {
    expiry_age(Expiry::from_data(data), now, ctx.cookie_age())
}
