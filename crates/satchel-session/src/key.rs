//! Session key generation, validation and hashing.
//!
//! A *frontend key* is what the client presents. When key hashing is
//! enabled it has the form `sha256$<plain>` and the *backend key* used for
//! storage lookups is the hex SHA-256 digest of `<plain>`. Otherwise the two
//! keys are identical.

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::trace;

use satchel_config::SessionSettings;

use crate::error::Result;

/// Characters allowed in generated keys.
///
/// Lowercase only: some backends store keys on case-insensitive filesystems.
pub const VALID_KEY_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated keys.
pub const KEY_LENGTH: usize = 32;

/// Minimum accepted key length.
pub const MIN_KEY_LENGTH: usize = 8;

/// Separates the algorithm name from the plain key. Not a valid key char.
pub const KEY_DELIMITER: char = '$';

/// Prefix marking a frontend key whose backend key is hashed.
pub const HASHED_KEY_PREFIX: &str = "sha256$";

/// Whether every character of `key` is in [`VALID_KEY_CHARS`].
pub fn is_valid_key_chars(key: &str) -> bool {
    key.bytes().all(|b| VALID_KEY_CHARS.contains(&b))
}

/// Key policy for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyCodec {
    store_hash: bool,
    require_hash: bool,
}

impl KeyCodec {
    /// Create a key codec.
    pub fn new(store_hash: bool, require_hash: bool) -> Self {
        Self {
            store_hash,
            require_hash,
        }
    }

    /// Key policy described by the `[session]` settings.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(settings.store_key_hash, settings.require_key_hash)
    }

    /// A codec that never issues or requires hashed keys.
    pub fn unhashed() -> Self {
        Self::default()
    }

    /// Whether newly issued keys are hashed.
    pub fn stores_hash(&self) -> bool {
        self.store_hash
    }

    /// Produce a random candidate key of [`KEY_LENGTH`] chars.
    pub fn generate_candidate_key() -> String {
        let mut rng = rand::rng();
        (0..KEY_LENGTH)
            .map(|_| VALID_KEY_CHARS[rng.random_range(0..VALID_KEY_CHARS.len())] as char)
            .collect()
    }

    /// Whether `key` is acceptable as a frontend key.
    pub fn validate(&self, key: &str) -> bool {
        let mut valid = !key.is_empty() && key.len() >= MIN_KEY_LENGTH;
        if self.require_hash {
            valid &= Self::has_hash_prefix(key);
        }
        valid
    }

    /// Whether `key` carries the hashing prefix.
    pub fn has_hash_prefix(key: &str) -> bool {
        key.starts_with(HASHED_KEY_PREFIX)
    }

    /// Map a frontend key to the key used for storage.
    ///
    /// Only prefixed keys are hashed. A digest never carries the prefix, so
    /// applying this to a backend key returns it unchanged.
    pub fn to_backend_key(&self, frontend_key: &str) -> String {
        match frontend_key.strip_prefix(HASHED_KEY_PREFIX) {
            Some(plain) => hex::encode(Sha256::digest(plain.as_bytes())),
            None => frontend_key.to_string(),
        }
    }

    /// Generate a frontend key that no record uses yet.
    ///
    /// `exists` is asked about frontend keys. With hashing enabled both the
    /// plain candidate and its hashed variant must be unused, and the hashed
    /// variant is returned.
    pub fn new_frontend_key<F>(&self, mut exists: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        loop {
            let plain = Self::generate_candidate_key();
            let mut candidates = vec![plain];
            if self.store_hash {
                let hashed = format!("{}{}", HASHED_KEY_PREFIX, candidates[0]);
                candidates.push(hashed);
            }

            let mut taken = false;
            for candidate in &candidates {
                if exists(candidate)? {
                    taken = true;
                    break;
                }
            }

            if !taken && let Some(key) = candidates.pop() {
                return Ok(key);
            }
            trace!("Generated session key collided, retrying");
        }
    }
}
