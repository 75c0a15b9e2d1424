//! The public protocol surface.
//!
//! A [`Connection`] sits on one [`Transport`] and owns a pending-request
//! table plus two handler registries:
//!
//! - outbound requests get an id from the table and resolve when the peer's
//!   `Result`/`Error` envelope comes back
//! - inbound requests go to the first `on_request` handler for their method;
//!   each runs on its own tokio task so a slow handler never blocks dispatch
//! - inbound notifications go synchronously to every `on_notification`
//!   handler for their method, in registration order; every `on_request`
//!   handler for the method also runs on its own task, with its outcome
//!   discarded and no envelope sent back
//!
//! Requests without a responder are dropped silently on this side; the peer's
//! call simply stays pending. There is no "method not found" reply.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use portablerpc_core::{Disposable, DisposableStore, Envelope, RequestId, Transport};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::ConnectionError;
use crate::handler::{NotificationHandler, RequestHandler};
use crate::pending::{PendingRequests, ResponseFuture, TypedResponse};
use crate::registry::Registrations;

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingRequests>,
    requests: Registrations<dyn RequestHandler>,
    notifications: Registrations<dyn NotificationHandler>,
    subscriptions: DisposableStore,
    /// Cancels in-flight request handlers on dispose.
    cancel: CancellationToken,
    disposed: AtomicBool,
}

/// One endpoint of the protocol. Cheap to clone; clones share state.
///
/// Dropping the last clone behaves like [`Connection::dispose`].
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Layer a connection over `transport` and start listening.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let pending = PendingRequests::attach(transport.as_ref());
        let inner = Arc::new_cyclic(|weak: &Weak<ConnectionInner>| {
            let weak = weak.clone();
            let subscription = transport.on_message(Arc::new(move |envelope: &Envelope| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch(envelope);
                }
            }));
            let subscriptions = DisposableStore::new();
            subscriptions.push(subscription);
            ConnectionInner {
                transport,
                pending,
                requests: Registrations::new(),
                notifications: Registrations::new(),
                subscriptions,
                cancel: CancellationToken::new(),
                disposed: AtomicBool::new(false),
            }
        });
        Self { inner }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Send a request and return a future for the peer's answer.
    ///
    /// Fails immediately on a disposed connection or when the transport
    /// refuses the envelope. The future has no timeout: it stays pending
    /// until the peer answers or the connection is disposed.
    pub fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<ResponseFuture, ConnectionError> {
        if self.is_disposed() {
            return Err(ConnectionError::Disposed);
        }
        let (id, response) = self.inner.pending.register()?;
        if let Err(error) = self
            .inner
            .transport
            .send_message(&Envelope::request(id, method, params))
        {
            self.inner.pending.cancel(id);
            warn!(%id, method, %error, "failed to send request");
            return Err(error.into());
        }
        trace!(%id, method, "request sent");
        Ok(response)
    }

    /// Typed [`Connection::send_request`]: serializes `params` and decodes
    /// the result into `R`.
    pub fn request<P, R>(&self, method: &str, params: &P) -> Result<TypedResponse<R>, ConnectionError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        Ok(self.send_request(method, params)?.typed())
    }

    /// Send a fire-and-forget notification. No pending entry is created.
    pub fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ConnectionError> {
        if self.is_disposed() {
            return Err(ConnectionError::Disposed);
        }
        if let Err(error) = self
            .inner
            .transport
            .send_message(&Envelope::notification(method, params))
        {
            warn!(method, %error, "failed to send notification");
            return Err(error.into());
        }
        trace!(method, "notification sent");
        Ok(())
    }

    /// Typed [`Connection::send_notification`].
    pub fn notify<P>(&self, method: &str, params: &P) -> Result<(), ConnectionError>
    where
        P: Serialize + ?Sized,
    {
        let params = serde_json::to_value(params)?;
        self.send_notification(method, Some(params))
    }

    // ── Registration ────────────────────────────────────────────────

    /// Register a responder for `method`.
    ///
    /// Only the earliest live responder for a method answers; later ones
    /// take over as earlier handles are disposed.
    pub fn on_request(&self, method: &str, handler: impl RequestHandler + 'static) -> Disposable {
        if self.is_disposed() {
            debug!(method, "connection disposed, ignoring request handler");
            return Disposable::noop();
        }
        self.inner.requests.add(method, Arc::new(handler))
    }

    /// Register a notification observer for `method`. Every live observer
    /// is called, in registration order.
    pub fn on_notification(
        &self,
        method: &str,
        handler: impl NotificationHandler + 'static,
    ) -> Disposable {
        if self.is_disposed() {
            debug!(method, "connection disposed, ignoring notification handler");
            return Disposable::noop();
        }
        self.inner.notifications.add(method, Arc::new(handler))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Tear the connection down.
    ///
    /// Unsubscribes from the transport, drops every handler, cancels
    /// in-flight request handlers (their responses are never sent) and
    /// abandons outstanding requests, whose futures complete with
    /// [`RequestError::Abandoned`](crate::RequestError::Abandoned).
    /// Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown();
        debug!("connection disposed");
    }

    /// Whether [`Connection::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Outstanding outbound requests.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("disposed", &self.is_disposed())
            .field("pending", &self.pending_count())
            .field("request_handlers", &self.inner.requests.count())
            .field("notification_handlers", &self.inner.notifications.count())
            .finish()
    }
}

impl ConnectionInner {
    fn dispatch(&self, envelope: &Envelope) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        match envelope {
            Envelope::Request { id, method, params } => {
                self.handle_request(*id, method, params.clone());
            }
            Envelope::Notification { method, params } => {
                let null = Value::Null;
                self.handle_notification(method, params.as_ref().unwrap_or(&null));
            }
            // The pending table settles these through its own subscription.
            Envelope::Result { .. } | Envelope::Error { .. } => {}
        }
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        let observers = self.notifications.all(method);
        let responders = self.requests.all(method);
        if observers.is_empty() && responders.is_empty() {
            debug!(method, "no handler registered for notification");
            return;
        }
        if !responders.is_empty() {
            self.spawn_notified_responders(method, params, responders);
        }
        for handler in observers {
            // A handler may dispose the connection mid-broadcast.
            if self.disposed.load(Ordering::Acquire) {
                break;
            }
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(params)));
            if let Err(payload) = outcome {
                warn!(
                    method,
                    panic = %panic_message(&*payload),
                    "notification handler panicked"
                );
            }
        }
    }

    /// Run every request handler for a notification's method. Outcomes are
    /// dropped: a notification never gets a reply.
    fn spawn_notified_responders(
        &self,
        method: &str,
        params: &Value,
        responders: Vec<Arc<dyn RequestHandler>>,
    ) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(method, "no tokio runtime to run request handlers for notification");
            return;
        };
        for handler in responders {
            let cancel = self.cancel.clone();
            let method = method.to_owned();
            let params = params.clone();
            drop(runtime.spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    outcome = AssertUnwindSafe(handler.handle(params)).catch_unwind() => {
                        if let Err(payload) = outcome {
                            warn!(method = %method, panic = %panic_message(&*payload), "request handler panicked on notification");
                        } else {
                            trace!(method = %method, "request handler finished notification");
                        }
                    }
                }
            }));
        }
    }

    fn handle_request(&self, id: RequestId, method: &str, params: Value) {
        let Some(handler) = self.requests.first(method) else {
            debug!(%id, method, "no request handler registered, dropping request");
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!(%id, method, "no tokio runtime to run request handler, dropping request");
            return;
        };

        let transport = self.transport.clone();
        let cancel = self.cancel.clone();
        let method = method.to_owned();
        drop(runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(%id, method = %method, "connection disposed, abandoning request handler");
                    return;
                }
                outcome = AssertUnwindSafe(handler.handle(params)).catch_unwind() => outcome,
            };

            let response = match outcome {
                Ok(Ok(result)) => Envelope::result(id, result),
                Ok(Err(error)) => Envelope::error(id, error),
                Err(payload) => {
                    let message = panic_message(&*payload);
                    warn!(%id, method = %method, panic = %message, "request handler panicked");
                    Envelope::error(id, Value::String(message))
                }
            };

            if cancel.is_cancelled() {
                debug!(%id, method = %method, "connection disposed, discarding response");
                return;
            }
            if let Err(error) = transport.send_message(&response) {
                warn!(%id, method = %method, %error, "failed to send response");
            }
        }));
    }

    fn shutdown(&self) {
        self.cancel.cancel();
        self.subscriptions.dispose_all();
        self.pending.dispose();
        self.requests.clear();
        self.notifications.clear();
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if !*self.disposed.get_mut() {
            *self.disposed.get_mut() = true;
            self.shutdown();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}
