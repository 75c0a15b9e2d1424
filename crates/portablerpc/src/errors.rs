//! Connection and request error types.

use portablerpc_core::TransportError;
use serde_json::Value;
use thiserror::Error;

/// Synchronous failure of a connection operation.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection has been disposed.
    #[error("connection is disposed")]
    Disposed,
    /// Every correlation id has been handed out.
    #[error("correlation ids exhausted")]
    IdsExhausted,
    /// The transport refused the outbound envelope.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Typed parameters could not be converted to JSON.
    #[error("failed to encode params: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of an issued request that did not produce a result.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The peer answered with an error envelope; the payload is passed
    /// through verbatim.
    #[error("remote error: {0}")]
    Remote(Value),
    /// The pending entry was dropped before any response arrived, because
    /// the connection was disposed or dropped.
    #[error("request abandoned before a response arrived")]
    Abandoned,
    /// The result did not deserialize into the requested type.
    #[error("failed to decode result: {0}")]
    Decode(#[source] serde_json::Error),
}

impl RequestError {
    /// The peer's error payload, if this is a remote error.
    pub fn remote(&self) -> Option<&Value> {
        match self {
            Self::Remote(value) => Some(value),
            Self::Abandoned | Self::Decode(_) => None,
        }
    }
}
