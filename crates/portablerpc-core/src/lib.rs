//! # portablerpc-core
//!
//! Wire contract and transport capability for portablerpc:
//! - [`Envelope`]: request / result / error / notification shapes with the
//!   `"portablerpc": "v1"` marker, and the classification rule for raw JSON
//! - [`RequestId`]: positive correlation ids (`0` is reserved)
//! - [`Transport`] + [`MessageFanout`]: send/subscribe capability and the
//!   reusable subscriber list concrete transports compose
//! - [`Disposable`]: one-shot teardown handles

#![deny(unsafe_code)]

pub mod disposable;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod transport;

pub use disposable::{Disposable, DisposableStore};
pub use envelope::{Envelope, PROTOCOL_FIELD, PROTOCOL_VERSION};
pub use errors::TransportError;
pub use ids::RequestId;
pub use transport::{Listener, MessageFanout, Transport};
