//! Per-request session handle.
//!
//! A [`Session`] binds an optional key to a shared backend. Attributes load
//! lazily on first access; writes only mark the session modified until
//! [`Session::save`] persists them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::SessionData;
use crate::backend::{LoadOutcome, Persistence, SessionBackend};
use crate::error::{Result, SessionError};
use crate::expiry::{EXPIRY_KEY, Expiry, ExpiryQuery, ExpirySetting, expiry_age, expiry_date};
use crate::key::KeyCodec;

/// Attribute written by [`Session::set_test_cookie`].
pub const TEST_COOKIE_NAME: &str = "testcookie";

/// Value written by [`Session::set_test_cookie`].
pub const TEST_COOKIE_VALUE: &str = "worked";

/// A session bound to a backend.
pub struct Session<B: SessionBackend + ?Sized = dyn SessionBackend> {
    store: Arc<B>,
    keys: KeyCodec,
    session_key: Option<String>,
    cache: Option<SessionData>,
    accessed: bool,
    modified: bool,
}

impl<B: SessionBackend + ?Sized> std::fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.store.name())
            .field("has_key", &self.session_key.is_some())
            .field("loaded", &self.cache.is_some())
            .field("accessed", &self.accessed)
            .field("modified", &self.modified)
            .finish()
    }
}

impl<B: SessionBackend + ?Sized> Session<B> {
    /// Bind a session to `store`. An invalid key is dropped.
    pub fn new(store: Arc<B>, session_key: Option<&str>) -> Self {
        let keys = store.key_codec();
        let session_key = session_key
            .filter(|k| keys.validate(k))
            .map(str::to_string);
        Self {
            store,
            keys,
            session_key,
            cache: None,
            accessed: false,
            modified: false,
        }
    }

    /// The backend this session uses.
    pub fn store(&self) -> &Arc<B> {
        &self.store
    }

    /// The frontend key, if one is set.
    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    /// The storage key for the current frontend key.
    pub fn backend_key(&self) -> Option<String> {
        self.session_key
            .as_deref()
            .map(|k| self.keys.to_backend_key(k))
    }

    /// Whether attributes were read or written.
    pub fn is_accessed(&self) -> bool {
        self.accessed
    }

    /// Whether attributes changed since they were loaded.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Default session age in seconds.
    pub fn cookie_age(&self) -> i64 {
        self.store.context().cookie_age()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Attributes
    // ─────────────────────────────────────────────────────────────────────────

    fn data(&mut self, no_load: bool) -> Result<&mut SessionData> {
        self.accessed = true;
        if self.cache.is_none() {
            let loaded = if self.session_key.is_none() || no_load {
                SessionData::new()
            } else {
                self.load()?
            };
            self.cache = Some(loaded);
        }
        Ok(self.cache.get_or_insert_with(SessionData::new))
    }

    /// Value of an attribute.
    pub fn get(&mut self, key: &str) -> Result<Option<Value>> {
        Ok(self.data(false)?.get(key).cloned())
    }

    /// Value of an attribute, deserialized.
    pub fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Whether an attribute is set.
    pub fn contains(&mut self, key: &str) -> Result<bool> {
        Ok(self.data(false)?.contains_key(key))
    }

    /// Names of all attributes.
    pub fn keys(&mut self) -> Result<Vec<String>> {
        Ok(self.data(false)?.keys().cloned().collect())
    }

    /// Set an attribute.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.data(false)?.insert(key.into(), value.into());
        self.modified = true;
        Ok(())
    }

    /// Remove an attribute that must be present.
    pub fn remove(&mut self, key: &str) -> Result<Value> {
        let value = self
            .data(false)?
            .remove(key)
            .ok_or_else(|| SessionError::AttributeNotFound(key.to_string()))?;
        self.modified = true;
        Ok(value)
    }

    /// Remove an attribute if present.
    pub fn pop(&mut self, key: &str) -> Result<Option<Value>> {
        let value = self.data(false)?.remove(key);
        self.modified |= value.is_some();
        Ok(value)
    }

    /// Value of an attribute, setting it to `default` first if absent.
    pub fn set_default(&mut self, key: &str, default: impl Into<Value>) -> Result<Value> {
        if let Some(existing) = self.data(false)?.get(key) {
            return Ok(existing.clone());
        }
        let value = default.into();
        self.set(key, value.clone())?;
        Ok(value)
    }

    /// Merge attributes in.
    pub fn update(&mut self, attrs: impl IntoIterator<Item = (String, Value)>) -> Result<()> {
        self.data(false)?.extend(attrs);
        self.modified = true;
        Ok(())
    }

    /// Drop all attributes without loading them.
    pub fn clear(&mut self) {
        self.cache = Some(SessionData::new());
        self.accessed = true;
        self.modified = true;
    }

    /// Whether the session has neither a key nor attributes. Never loads.
    pub fn is_empty(&self) -> bool {
        self.session_key.is_none() && self.cache.as_ref().is_none_or(|c| c.is_empty())
    }

    /// Set the test attribute used to check that the client keeps cookies.
    pub fn set_test_cookie(&mut self) -> Result<()> {
        self.set(TEST_COOKIE_NAME, TEST_COOKIE_VALUE)
    }

    /// Whether the test attribute survived a round trip.
    pub fn test_cookie_worked(&mut self) -> Result<bool> {
        Ok(self.get(TEST_COOKIE_NAME)?.as_ref().and_then(Value::as_str) == Some(TEST_COOKIE_VALUE))
    }

    /// Remove the test attribute.
    pub fn delete_test_cookie(&mut self) -> Result<()> {
        self.remove(TEST_COOKIE_NAME).map(|_| ())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expiry
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_query(&mut self, query: ExpiryQuery) -> Result<(Option<Expiry>, DateTime<Utc>)> {
        let expiry = match query.expiry {
            Some(expiry) => expiry,
            None => self.get(EXPIRY_KEY)?.as_ref().and_then(Expiry::from_value),
        };
        Ok((expiry, query.modification.unwrap_or_else(Utc::now)))
    }

    /// Seconds until the session expires.
    pub fn get_expiry_age(&mut self, query: ExpiryQuery) -> Result<i64> {
        let (expiry, modification) = self.resolve_query(query)?;
        Ok(expiry_age(expiry, modification, self.cookie_age()))
    }

    /// When the session expires.
    pub fn get_expiry_date(&mut self, query: ExpiryQuery) -> Result<DateTime<Utc>> {
        let (expiry, modification) = self.resolve_query(query)?;
        Ok(expiry_date(expiry, modification, self.cookie_age()))
    }

    /// Override the expiry. `None` reverts to the configured policy.
    pub fn set_expiry(&mut self, setting: Option<ExpirySetting>) -> Result<()> {
        match setting {
            None => {
                self.pop(EXPIRY_KEY)?;
            }
            Some(setting) => {
                let expiry = setting.resolve(Utc::now());
                self.set(EXPIRY_KEY, expiry.to_value())?;
            }
        }
        Ok(())
    }

    /// Whether the session ends when the browser closes.
    pub fn get_expire_at_browser_close(&mut self) -> Result<bool> {
        match self.get(EXPIRY_KEY)? {
            None | Some(Value::Null) => Ok(self.store.context().settings().expire_at_browser_close),
            Some(value) => Ok(Expiry::from_value(&value).is_some_and(|e| e.is_browser_close())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    fn new_session_key(&self) -> Result<String> {
        let keys = self.keys;
        let store = &self.store;
        keys.new_frontend_key(|candidate| store.exists(&keys.to_backend_key(candidate)))
    }

    /// The current key, generating an unused one if none is set.
    pub fn get_or_create_session_key(&mut self) -> Result<String> {
        if let Some(key) = &self.session_key {
            return Ok(key.clone());
        }
        let key = self.new_session_key()?;
        self.session_key = Some(key.clone());
        Ok(key)
    }

    /// Whether a record exists for `key`, or for the current key.
    pub fn exists(&self, key: Option<&str>) -> Result<bool> {
        if self.store.persistence() == Persistence::Client {
            return Ok(false);
        }
        match key.or(self.session_key.as_deref()) {
            Some(key) => self.store.exists(&self.keys.to_backend_key(key)),
            None => Ok(false),
        }
    }

    /// Allocate a fresh key and persist an empty-or-current record under it.
    pub fn create(&mut self) -> Result<()> {
        if self.store.persistence() == Persistence::Client {
            self.modified = true;
            return Ok(());
        }

        let limit = self.store.max_create_attempts();
        let mut attempts = 0;
        loop {
            if let Some(limit) = limit
                && attempts >= limit
            {
                return Err(SessionError::CreateExhausted(limit));
            }
            attempts += 1;

            self.session_key = Some(self.new_session_key()?);
            match self.save(true) {
                Ok(()) => break,
                Err(SessionError::AlreadyExists) => {
                    trace!(backend = self.store.name(), "Session key taken, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        self.modified = true;
        debug!(backend = self.store.name(), attempts, "Session created");
        Ok(())
    }

    /// Persist the attributes.
    ///
    /// `must_create` demands a new record and skips loading existing data.
    pub fn save(&mut self, must_create: bool) -> Result<()> {
        if self.store.persistence() == Persistence::Client {
            let data = self.data(false)?.clone();
            self.session_key = Some(self.store.codec().encode(&data)?);
            self.modified = true;
            return Ok(());
        }

        let Some(key) = self.session_key.clone() else {
            return self.create();
        };
        let data = self.data(must_create)?.clone();
        self.store
            .save(&self.keys.to_backend_key(&key), &data, must_create)
    }

    /// Remove the record for `key`, or for the current key.
    pub fn delete(&mut self, key: Option<&str>) -> Result<()> {
        if self.store.persistence() == Persistence::Client {
            self.session_key = None;
            self.cache = Some(SessionData::new());
            self.modified = true;
            return Ok(());
        }

        let key = match key.or(self.session_key.as_deref()) {
            Some(key) => self.keys.to_backend_key(key),
            None => return Ok(()),
        };
        self.store.delete(&key)
    }

    /// Read the attributes for the current key.
    ///
    /// A missing record unsets the key. A corrupted or expired record is
    /// replaced by a fresh session.
    pub fn load(&mut self) -> Result<SessionData> {
        let Some(key) = self.session_key.clone() else {
            return Ok(SessionData::new());
        };
        let backend_key = self.keys.to_backend_key(&key);

        match self.store.load_data(&backend_key)? {
            LoadOutcome::Loaded(data) => Ok(data),
            LoadOutcome::Missing => {
                self.session_key = None;
                Ok(SessionData::new())
            }
            LoadOutcome::Corrupted => {
                debug!(backend = self.store.name(), "Session unreadable, recreating");
                self.create()?;
                Ok(SessionData::new())
            }
            LoadOutcome::Expired => {
                debug!(backend = self.store.name(), "Session expired, recreating");
                self.store.delete(&backend_key)?;
                self.create()?;
                Ok(SessionData::new())
            }
        }
    }

    /// Drop all attributes, delete the record and unset the key.
    pub fn flush(&mut self) -> Result<()> {
        self.clear();
        self.delete(None)?;
        self.session_key = None;
        Ok(())
    }

    /// Move the attributes to a fresh key and delete the old record.
    pub fn cycle_key(&mut self) -> Result<()> {
        if self.store.persistence() == Persistence::Client {
            return self.save(false);
        }

        let data = self.data(false)?.clone();
        let old_key = self.session_key.clone();
        self.create()?;
        self.cache = Some(data);
        if let Some(old_key) = old_key {
            self.delete(Some(&old_key))?;
        }
        Ok(())
    }

    /// Sweep expired records from the backend.
    pub fn clear_expired(&self) -> Result<usize> {
        self.store.clear_expired()
    }
}
