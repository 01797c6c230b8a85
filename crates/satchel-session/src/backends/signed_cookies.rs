//! Sessions carried entirely by the client.
//!
//! The session key is the signed, compressed attribute map. Nothing is stored
//! server side. Callers should keep the payload under about 4 KB, the usual
//! cookie limit; this is not enforced here.

use std::time::Duration;

use crate::SessionData;
use crate::backend::{LoadOutcome, Persistence, SessionBackend};
use crate::codec::{SALT_NAMESPACE, SessionCodec};
use crate::context::StoreContext;
use crate::error::Result;
use crate::key::KeyCodec;

/// Store whose keys are signed payloads.
#[derive(Debug)]
pub struct SignedCookieStore {
    ctx: StoreContext,
    codec: SessionCodec,
}

impl SignedCookieStore {
    /// Create a signed-cookie store.
    pub fn new(ctx: StoreContext) -> Self {
        Self {
            codec: SessionCodec::with_salt(&ctx, format!("{}.signed_cookies", SALT_NAMESPACE)),
            ctx,
        }
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.ctx.cookie_age().max(0) as u64)
    }
}

impl SessionBackend for SignedCookieStore {
    fn name(&self) -> &'static str {
        "SignedCookieStore"
    }

    fn context(&self) -> &StoreContext {
        &self.ctx
    }

    fn codec(&self) -> &SessionCodec {
        &self.codec
    }

    fn key_codec(&self) -> KeyCodec {
        KeyCodec::unhashed()
    }

    fn persistence(&self) -> Persistence {
        Persistence::Client
    }

    fn exists(&self, _backend_key: &str) -> Result<bool> {
        Ok(false)
    }

    fn load_data(&self, token: &str) -> Result<LoadOutcome> {
        Ok(match self.codec.decode_with_max_age(token, self.max_age()) {
            Ok(data) => LoadOutcome::Loaded(data),
            Err(_) => LoadOutcome::Corrupted,
        })
    }

    fn save(&self, _backend_key: &str, _data: &SessionData, _must_create: bool) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _backend_key: &str) -> Result<()> {
        Ok(())
    }

    fn clear_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
