//! Transport error type.

use thiserror::Error;

/// Why a transport could not accept an outbound envelope.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel has been closed by either side.
    #[error("transport is closed")]
    Closed,
    /// The outbound queue is at capacity.
    #[error("transport queue is full (capacity {capacity})")]
    Full {
        /// Configured queue capacity.
        capacity: usize,
    },
    /// Underlying I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The envelope could not be encoded for the wire.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
