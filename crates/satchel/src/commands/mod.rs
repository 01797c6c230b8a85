//! CLI command handlers.

pub mod clear_expired;
pub mod config;
pub mod inspect;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{debug, warn};

use satchel_config::{LoadedConfig, SECRET_KEY_ENV, resolve_secret_key};
use satchel_session::{CacheRegistry, SessionBackend, StoreContext, open_backend};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load the explicit config file, or discover and merge the layers.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = match &self.config_path {
            Some(path) => LoadedConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => satchel_config::load_config(None)?,
        };
        for warning in &loaded.warnings {
            warn!("{}", warning);
        }
        Ok(loaded)
    }

    /// Open the configured session backend.
    pub fn open_store(&self) -> Result<Arc<dyn SessionBackend>> {
        let loaded = self.load_config()?;
        let config = &loaded.config;
        let settings = config.session_settings();

        let secret = resolve_secret_key(settings.secret_key.as_deref()).with_context(|| {
            format!(
                "no signing secret: set {} or session.secret_key",
                SECRET_KEY_ENV
            )
        })?;
        debug!(source = %secret.source, "Resolved signing secret");

        let store_ctx = StoreContext::new(settings, secret.value.as_bytes())?;
        let caches = CacheRegistry::from_config(config);
        let store = open_backend(config, store_ctx, &caches)?;
        debug!(backend = store.name(), "Opened session backend");
        Ok(store)
    }
}
