//! # portablerpc
//!
//! Request/response and notification messaging over any bidirectional
//! message channel.
//!
//! - [`Connection`]: issue requests and notifications, register responders
//!   and observers, tear down
//! - [`PendingRequests`]: correlation of outbound requests with responses
//! - [`RequestHandler`] / [`NotificationHandler`]: handler capabilities,
//!   implemented for plain closures
//!
//! The wire format and [`Transport`] capability live in `portablerpc-core`
//! and are re-exported here. Concrete transports are in
//! `portablerpc-transport`.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod handler;
pub mod pending;
mod registry;

pub use connection::Connection;
pub use errors::{ConnectionError, RequestError};
pub use handler::{NotificationHandler, RequestHandler, TypedHandler, typed};
pub use pending::{PendingRequests, ResponseFuture, TypedResponse};

pub use portablerpc_core::{
    Disposable, DisposableStore, Envelope, Listener, MessageFanout, PROTOCOL_FIELD,
    PROTOCOL_VERSION, RequestId, Transport, TransportError,
};
