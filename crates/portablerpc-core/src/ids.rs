//! Correlation ids linking a request to its result or error.
//!
//! Ids are positive integers. `0` is reserved: a method-bearing envelope
//! whose id is falsy is a notification, so a request must never carry it.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id of an outstanding request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(NonZeroU64);

impl RequestId {
    /// Create an id from a raw integer. Returns `None` for `0`.
    #[must_use]
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw integer value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Read an id from a JSON value. Only positive integers qualify.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        value.as_u64().and_then(Self::new)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RequestId> for u64 {
    fn from(id: RequestId) -> Self {
        id.get()
    }
}

/// Whether a JSON id counts as "present" for dispatch purposes.
///
/// Mirrors loose truthiness: `null`, `false`, `0`, `""` and NaN-like
/// values are falsy; everything else is truthy.
#[must_use]
pub fn is_truthy_id(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
