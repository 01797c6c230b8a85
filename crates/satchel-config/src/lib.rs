//! Configuration system for the Satchel session store.
//!
//! Provides TOML-based configuration with:
//! - Session behaviour (`[session]`): default age, key hashing, signing secret
//! - Backend selection (`[storage]`)
//! - Named caches (`[caches.<alias>]`)
//! - Config file layering (XDG user config + project-local overrides)
//! - Secret resolution (env var → config file)

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{ResolvedSecret, SECRET_KEY_ENV, SecretSource, resolve_secret_key};
pub use types::*;
