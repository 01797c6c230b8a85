//! Session envelope: the signed transport form of an attribute map.
//!
//! Decoding walks an ordered list of [`DecodeStrategy`] values and keeps the
//! first success:
//!
//! 1. [`DecodeStrategy::Signed`]: the current signer format.
//! 2. [`DecodeStrategy::Legacy`]: `base64("<hex-hmac>:<serialized>")`, kept
//!    for sessions written before the signer format existed. Disabled by
//!    `accept_legacy = false`.
//!
//! Every salt is namespaced by the backend name, so a token minted by one
//! backend never decodes in another.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{debug, warn};

use crate::SessionData;
use crate::context::StoreContext;
use crate::error::{Result, SessionError};
use crate::serializer::Serializer;
use crate::signing::Signer;

/// Namespace shared by every salt.
pub const SALT_NAMESPACE: &str = "satchel.sessions";

/// Log target for tampering and corruption events.
pub const SECURITY_TARGET: &str = "satchel::security";

/// One way of turning a token back into an attribute map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Current signer format.
    Signed,
    /// Pre-signer `hmac:payload` format.
    Legacy,
}

const WITH_LEGACY: &[DecodeStrategy] = &[DecodeStrategy::Signed, DecodeStrategy::Legacy];
const SIGNED_ONLY: &[DecodeStrategy] = &[DecodeStrategy::Signed];

/// Encoder/decoder bound to one backend's salts.
#[derive(Debug, Clone)]
pub struct SessionCodec {
    salt: String,
    legacy_salt: String,
    signer: Arc<dyn Signer>,
    serializer: Arc<dyn Serializer>,
    accept_legacy: bool,
}

impl SessionCodec {
    /// Codec for the backend called `backend_name`.
    pub fn new(ctx: &StoreContext, backend_name: &str) -> Self {
        Self::with_salt(ctx, format!("{}.{}", SALT_NAMESPACE, backend_name))
            .with_legacy_salt(format!("{}.legacy.{}", SALT_NAMESPACE, backend_name))
    }

    /// Codec with an explicit signing salt.
    pub fn with_salt(ctx: &StoreContext, salt: impl Into<String>) -> Self {
        let salt = salt.into();
        Self {
            legacy_salt: format!("{}.legacy", salt),
            salt,
            signer: Arc::clone(ctx.signer()),
            serializer: Arc::clone(ctx.serializer()),
            accept_legacy: ctx.settings().accept_legacy,
        }
    }

    fn with_legacy_salt(mut self, legacy_salt: String) -> Self {
        self.legacy_salt = legacy_salt;
        self
    }

    /// Signing salt.
    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Strategies tried by [`SessionCodec::decode`], in order.
    pub fn strategies(&self) -> &'static [DecodeStrategy] {
        if self.accept_legacy {
            WITH_LEGACY
        } else {
            SIGNED_ONLY
        }
    }

    /// Serialize, compress and sign an attribute map.
    pub fn encode(&self, data: &SessionData) -> Result<String> {
        let payload = self.serializer.dumps(data)?;
        Ok(self.signer.sign(&payload, &self.salt, true))
    }

    /// Decode a token, degrading to an empty map on any failure.
    pub fn decode(&self, token: &str) -> SessionData {
        self.try_decode(token).unwrap_or_default()
    }

    /// Decode a token, reporting [`SessionError::Corrupted`] when every
    /// strategy fails.
    pub fn try_decode(&self, token: &str) -> Result<SessionData> {
        let mut last_error = None;
        for &strategy in self.strategies() {
            match self.decode_with(strategy, token) {
                Ok(data) => return Ok(data),
                Err(e) => {
                    debug!(?strategy, error = %e, "Session decode strategy failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| SessionError::Corrupted("no decode strategy".to_string())))
    }

    /// Decode a current-format token, rejecting it once older than `max_age`.
    pub fn decode_with_max_age(&self, token: &str, max_age: Duration) -> Result<SessionData> {
        let payload = self
            .signer
            .unsign(token, &self.salt, Some(max_age))
            .map_err(|e| SessionError::Corrupted(e.to_string()))?;
        self.serializer.loads(&payload)
    }

    /// Decode with a single strategy.
    pub fn decode_with(&self, strategy: DecodeStrategy, token: &str) -> Result<SessionData> {
        match strategy {
            DecodeStrategy::Signed => {
                let payload = self
                    .signer
                    .unsign(token, &self.salt, None)
                    .map_err(|e| SessionError::Corrupted(e.to_string()))?;
                self.serializer.loads(&payload)
            }
            DecodeStrategy::Legacy => self.decode_legacy(token),
        }
    }

    /// Encode in the legacy format.
    pub fn encode_legacy(&self, data: &SessionData) -> Result<String> {
        let serialized = self.serializer.dumps(data)?;
        let hash = hex::encode(self.signer.salted_hmac(&self.legacy_salt, &serialized));
        let mut raw = hash.into_bytes();
        raw.push(b':');
        raw.extend_from_slice(&serialized);
        Ok(STANDARD.encode(raw))
    }

    fn decode_legacy(&self, token: &str) -> Result<SessionData> {
        let raw = STANDARD
            .decode(token.as_bytes())
            .map_err(|e| SessionError::Corrupted(format!("legacy payload is not base64: {}", e)))?;

        let split = raw
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| SessionError::Corrupted("legacy payload has no hash".to_string()))?;
        let (hash, serialized) = (&raw[..split], &raw[split + 1..]);

        let tag = hex::decode(hash).unwrap_or_default();
        if !self
            .signer
            .verify_salted_hmac(&self.legacy_salt, serialized, &tag)
        {
            warn!(target: SECURITY_TARGET, salt = %self.legacy_salt, "Session data corrupted");
            return Err(SessionError::Corrupted("legacy hash mismatch".to_string()));
        }

        self.serializer.loads(serialized)
    }
}
