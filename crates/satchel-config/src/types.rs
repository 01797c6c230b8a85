//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [session]                # key handling, expiry policy, signing
//! [storage]                # which backend and where it keeps data
//! [caches.default]         # named cache instances
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Two weeks, in seconds.
pub const DEFAULT_COOKIE_AGE: i64 = 60 * 60 * 24 * 7 * 2;

/// Cookie name, also used as the file prefix of the file backend.
pub const DEFAULT_COOKIE_NAME: &str = "sessionid";

/// Alias of the cache used when none is configured.
pub const DEFAULT_CACHE_ALIAS: &str = "default";

/// Capacity of an in-process cache.
pub const DEFAULT_CACHE_ENTRIES: usize = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SatchelConfig {
    /// Session behaviour.
    pub session: Option<SessionSettings>,

    /// Storage backend selection.
    pub storage: Option<StorageConfig>,

    /// Named caches (`[caches.default]`, `[caches.sessions]`, ...).
    pub caches: HashMap<String, CacheSettings>,
}

impl SatchelConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: SatchelConfig) {
        if other.session.is_some() {
            self.session = other.session;
        }

        if other.storage.is_some() {
            self.storage = other.storage;
        }

        for (alias, cache) in other.caches {
            self.caches.insert(alias, cache);
        }
    }

    /// Effective session settings (defaults when the section is absent).
    pub fn session_settings(&self) -> SessionSettings {
        self.session.clone().unwrap_or_default()
    }

    /// Effective storage settings (defaults when the section is absent).
    pub fn storage_config(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    /// Settings for a cache alias.
    ///
    /// The default alias always resolves, even when not configured.
    pub fn cache_settings(&self, alias: &str) -> Result<CacheSettings> {
        match self.caches.get(alias) {
            Some(settings) => Ok(settings.clone()),
            None if alias == DEFAULT_CACHE_ALIAS => Ok(CacheSettings::default()),
            None => Err(ConfigError::CacheNotFound(alias.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Serializer used for session payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    /// `serde_json`.
    #[default]
    Json,
}

/// The `[session]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Default session age in seconds.
    pub cookie_age: i64,
    /// Cookie name; the file backend uses it as the file prefix.
    pub cookie_name: String,
    /// Cache alias used by the cache-backed stores.
    pub cache_alias: String,
    /// Directory for the file backend (system temp dir when unset).
    pub file_path: Option<PathBuf>,
    /// Issue hashed frontend keys (`sha256$<key>`).
    pub store_key_hash: bool,
    /// Reject frontend keys that lack the hash prefix.
    pub require_key_hash: bool,
    /// Payload serializer.
    pub serializer: SerializerKind,
    /// Default browser-close policy when a session has no override.
    pub expire_at_browser_close: bool,
    /// Accept payloads written in the legacy `hmac:payload` format.
    pub accept_legacy: bool,
    /// Signing secret. Prefer the `SATCHEL_SECRET_KEY` environment variable.
    pub secret_key: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_age: DEFAULT_COOKIE_AGE,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cache_alias: DEFAULT_CACHE_ALIAS.to_string(),
            file_path: None,
            store_key_hash: false,
            require_key_hash: false,
            serializer: SerializerKind::Json,
            expire_at_browser_close: false,
            accept_legacy: true,
            secret_key: None,
        }
    }
}

impl SessionSettings {
    /// Check that the settings are internally consistent.
    pub fn validate(&self) -> Result<()> {
        if self.cookie_age <= 0 {
            return Err(ConfigError::InvalidSetting {
                field: "session.cookie_age".to_string(),
                reason: "must be a positive number of seconds".to_string(),
            });
        }

        if self.cookie_name.is_empty()
            || !self
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidSetting {
                field: "session.cookie_name".to_string(),
                reason: "must be a non-empty ASCII token".to_string(),
            });
        }

        // Generated keys would fail validation and never settle.
        if self.require_key_hash && !self.store_key_hash {
            return Err(ConfigError::InvalidSetting {
                field: "session.require_key_hash".to_string(),
                reason: "requires session.store_key_hash = true".to_string(),
            });
        }

        Ok(())
    }

    /// Whether a secret key is written in plaintext in the config.
    pub fn has_plaintext_secret(&self) -> bool {
        self.secret_key.as_ref().is_some_and(|k| !k.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which session backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Relational table.
    #[default]
    Db,
    /// Relational table with a read-through cache.
    CachedDb,
    /// One file per session.
    File,
    /// Cache only.
    Cache,
    /// No server state; the key is the signed payload.
    SignedCookies,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Db => "db",
            BackendKind::CachedDb => "cached_db",
            BackendKind::File => "file",
            BackendKind::Cache => "cache",
            BackendKind::SignedCookies => "signed_cookies",
        };
        f.write_str(name)
    }
}

/// The `[storage]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection.
    pub backend: BackendKind,
    /// SQLite database path for the `db` and `cached_db` backends.
    pub database: Option<PathBuf>,
}

impl StorageConfig {
    /// Get the effective database path.
    ///
    /// Resolution order:
    /// 1. Configured `database` value
    /// 2. Default: `<data dir>/satchel/sessions.db`
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("satchel")
                .join("sessions.db")
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// A `[caches.<alias>]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum number of entries before LRU eviction.
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_ENTRIES,
        }
    }
}
