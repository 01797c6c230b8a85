//! Signing of session payloads.
//!
//! [`Signer`] is the seam the envelope depends on. [`TimestampSigner`] is the
//! default implementation:
//!
//! ```text
//! [.]<base64url(payload | zlib(payload))>:<unix-seconds>:<base64url(hmac)>
//! ```
//!
//! A leading `.` marks a compressed payload. The MAC is HMAC-SHA256 keyed by
//! `sha256(salt || secret)`, so tokens signed under one salt never verify
//! under another.

use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = ':';
const COMPRESSED_MARKER: char = '.';

/// Reasons a token fails to unsign.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The token is malformed or its MAC does not match.
    #[error("bad signature: {0}")]
    BadSignature(String),

    /// The MAC matches but the token is older than allowed.
    #[error("signature age {age}s exceeds {max_age}s")]
    Expired { age: u64, max_age: u64 },
}

/// Signing capability consumed by the session envelope.
pub trait Signer: Send + Sync + fmt::Debug {
    /// Sign `payload` under `salt`, optionally compressing it.
    fn sign(&self, payload: &[u8], salt: &str, compress: bool) -> String;

    /// Verify a token produced by [`Signer::sign`] and return its payload.
    fn unsign(
        &self,
        token: &str,
        salt: &str,
        max_age: Option<Duration>,
    ) -> Result<Vec<u8>, SignatureError>;

    /// Raw salted MAC over `value`.
    fn salted_hmac(&self, salt: &str, value: &[u8]) -> Vec<u8>;

    /// Constant-time check of `tag` against the salted MAC of `value`.
    fn verify_salted_hmac(&self, salt: &str, value: &[u8], tag: &[u8]) -> bool;
}

/// HMAC-SHA256 signer with an embedded timestamp.
#[derive(Clone)]
pub struct TimestampSigner {
    secret: Vec<u8>,
}

impl fmt::Debug for TimestampSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampSigner")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TimestampSigner {
    /// Create a signer from a secret key.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, salt: &str) -> HmacSha256 {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(&self.secret);
        let key = hasher.finalize();
        HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size")
    }

    fn signature_salt(salt: &str) -> String {
        format!("{}signer", salt)
    }

    fn compress(payload: &[u8]) -> Option<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).ok()?;
        let compressed = encoder.finish().ok()?;
        // Only worth it when the marker byte is paid for
        (compressed.len() + 1 < payload.len()).then_some(compressed)
    }

    fn decompress(data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| SignatureError::BadSignature(format!("decompression failed: {}", e)))?;
        Ok(out)
    }
}

impl Signer for TimestampSigner {
    fn sign(&self, payload: &[u8], salt: &str, compress: bool) -> String {
        let compressed = if compress {
            Self::compress(payload)
        } else {
            None
        };

        let body = match compressed {
            Some(data) => format!("{}{}", COMPRESSED_MARKER, URL_SAFE_NO_PAD.encode(data)),
            None => URL_SAFE_NO_PAD.encode(payload),
        };
        let value = format!("{}{}{}", body, SEPARATOR, Utc::now().timestamp());

        let mut mac = self.mac(&Self::signature_salt(salt));
        mac.update(value.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}{}{}", value, SEPARATOR, signature)
    }

    fn unsign(
        &self,
        token: &str,
        salt: &str,
        max_age: Option<Duration>,
    ) -> Result<Vec<u8>, SignatureError> {
        let (value, signature) = token
            .rsplit_once(SEPARATOR)
            .ok_or_else(|| SignatureError::BadSignature("no separator".to_string()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::BadSignature("signature is not base64".to_string()))?;

        let mut mac = self.mac(&Self::signature_salt(salt));
        mac.update(value.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| SignatureError::BadSignature("signature does not match".to_string()))?;

        let (body, timestamp) = value
            .rsplit_once(SEPARATOR)
            .ok_or_else(|| SignatureError::BadSignature("no timestamp".to_string()))?;
        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| SignatureError::BadSignature("malformed timestamp".to_string()))?;

        if let Some(max_age) = max_age {
            let age = Utc::now().timestamp().saturating_sub(timestamp).max(0) as u64;
            if age > max_age.as_secs() {
                return Err(SignatureError::Expired {
                    age,
                    max_age: max_age.as_secs(),
                });
            }
        }

        let (compressed, encoded) = match body.strip_prefix(COMPRESSED_MARKER) {
            Some(rest) => (true, rest),
            None => (false, body),
        };
        let data = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| SignatureError::BadSignature("payload is not base64".to_string()))?;

        if compressed {
            Self::decompress(&data)
        } else {
            Ok(data)
        }
    }

    fn salted_hmac(&self, salt: &str, value: &[u8]) -> Vec<u8> {
        let mut mac = self.mac(salt);
        mac.update(value);
        mac.finalize().into_bytes().to_vec()
    }

    fn verify_salted_hmac(&self, salt: &str, value: &[u8], tag: &[u8]) -> bool {
        let mut mac = self.mac(salt);
        mac.update(value);
        mac.verify_slice(tag).is_ok()
    }
}
