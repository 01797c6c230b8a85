//! Session expiry policy.
//!
//! A per-session override lives in the attribute map under [`EXPIRY_KEY`]:
//! an integer number of seconds, or an RFC 3339 timestamp. Zero seconds means
//! "expire when the browser closes".

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::SessionData;

/// Attribute holding the per-session expiry override.
pub const EXPIRY_KEY: &str = "_session_expiry";

/// A stored expiry override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Relative age in seconds. Zero marks a browser-close session.
    Seconds(i64),
    /// Absolute expiry time.
    At(DateTime<Utc>),
}

impl Expiry {
    /// Parse a stored override. Unrecognised values are ignored.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Expiry::Seconds),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| Expiry::At(dt.with_timezone(&Utc))),
            _ => None,
        }
    }

    /// Override stored in a session's attributes, if any.
    pub fn from_data(data: &SessionData) -> Option<Self> {
        data.get(EXPIRY_KEY).and_then(Self::from_value)
    }

    /// Storable form of this override.
    pub fn to_value(&self) -> Value {
        match self {
            Expiry::Seconds(n) => Value::from(*n),
            Expiry::At(at) => Value::String(at.to_rfc3339()),
        }
    }

    /// Whether this override means "expire at browser close".
    pub fn is_browser_close(&self) -> bool {
        matches!(self, Expiry::Seconds(0))
    }
}

/// Argument to `Session::set_expiry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirySetting {
    /// Expire after this many seconds of inactivity. Zero: at browser close.
    Seconds(i64),
    /// Expire after this duration, stored as an absolute time.
    After(Duration),
    /// Expire at this time.
    At(DateTime<Utc>),
}

impl ExpirySetting {
    /// The override to store, resolving relative durations against `now`.
    pub fn resolve(self, now: DateTime<Utc>) -> Expiry {
        match self {
            ExpirySetting::Seconds(n) => Expiry::Seconds(n),
            ExpirySetting::After(d) => Expiry::At(now + d),
            ExpirySetting::At(at) => Expiry::At(at),
        }
    }
}

/// Optional inputs to the expiry getters.
///
/// `modification` defaults to now. Leaving `expiry` unset reads the session's
/// stored override; setting it, even to `None`, takes precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryQuery {
    pub modification: Option<DateTime<Utc>>,
    pub expiry: Option<Option<Expiry>>,
}

impl ExpiryQuery {
    /// Query with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure from this modification time.
    pub fn modified_at(mut self, modification: DateTime<Utc>) -> Self {
        self.modification = Some(modification);
        self
    }

    /// Use this override instead of the stored one.
    pub fn with_expiry(mut self, expiry: Option<Expiry>) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

/// Seconds until expiry, measured from `modification`.
///
/// An absolute expiry yields the whole seconds between the two instants,
/// rounded toward negative infinity. A missing or zero override yields
/// `default_age`.
pub fn expiry_age(
    expiry: Option<Expiry>,
    modification: DateTime<Utc>,
    default_age: i64,
) -> i64 {
    match expiry {
        Some(Expiry::At(at)) => (at - modification).num_milliseconds().div_euclid(1000),
        Some(Expiry::Seconds(n)) if n != 0 => n,
        _ => default_age,
    }
}

/// Instant of expiry, measured from `modification`.
pub fn expiry_date(
    expiry: Option<Expiry>,
    modification: DateTime<Utc>,
    default_age: i64,
) -> DateTime<Utc> {
    match expiry {
        Some(Expiry::At(at)) => at,
        Some(Expiry::Seconds(n)) if n != 0 => modification + Duration::seconds(n),
        _ => modification + Duration::seconds(default_age),
    }
}
