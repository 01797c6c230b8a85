//! Shared, validated configuration handed to every store.

use std::sync::Arc;

use satchel_config::SessionSettings;

use crate::error::{Result, SessionError};
use crate::key::KeyCodec;
use crate::serializer::{Serializer, serializer_for};
use crate::signing::{Signer, TimestampSigner};

/// Settings plus the signing and serialization collaborators.
///
/// Built once and cloned cheaply into each store.
#[derive(Debug, Clone)]
pub struct StoreContext {
    settings: Arc<SessionSettings>,
    signer: Arc<dyn Signer>,
    serializer: Arc<dyn Serializer>,
}

impl StoreContext {
    /// Build a context with the default signer and the configured serializer.
    pub fn new(settings: SessionSettings, secret_key: impl AsRef<[u8]>) -> Result<Self> {
        let secret_key = secret_key.as_ref();
        if secret_key.is_empty() {
            return Err(SessionError::Config(
                "a non-empty secret key is required to sign sessions".to_string(),
            ));
        }
        let serializer = serializer_for(settings.serializer);
        Self::with_parts(settings, Arc::new(TimestampSigner::new(secret_key)), serializer)
    }

    /// Build a context from explicit collaborators.
    pub fn with_parts(
        settings: SessionSettings,
        signer: Arc<dyn Signer>,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
            signer,
            serializer,
        })
    }

    /// The `[session]` settings.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Signing collaborator.
    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// Serialization collaborator.
    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    /// Default session age in seconds.
    pub fn cookie_age(&self) -> i64 {
        self.settings.cookie_age
    }

    /// Key policy described by the settings.
    pub fn key_codec(&self) -> KeyCodec {
        KeyCodec::from_settings(&self.settings)
    }
}
