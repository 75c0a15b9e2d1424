//! Pending-request table: correlates responses with waiting callers.
//!
//! The table subscribes to the transport on its own, independently of the
//! connection's dispatch listener, and settles callers when a `Result` or
//! `Error` envelope with a known id arrives. Responses for unknown ids are a
//! benign race (e.g. the caller gave up) and are dropped.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use portablerpc_core::{Disposable, Envelope, RequestId, Transport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{ConnectionError, RequestError};

type Outcome = Result<Value, Value>;

#[derive(Default)]
struct PendingState {
    next_id: u64,
    entries: HashMap<RequestId, oneshot::Sender<Outcome>>,
    disposed: bool,
}

/// Requests awaiting a response, keyed by correlation id.
pub struct PendingRequests {
    state: Mutex<PendingState>,
    subscription: Disposable,
}

impl PendingRequests {
    /// Create a table and subscribe it to `transport`.
    pub fn attach(transport: &dyn Transport) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = transport.on_message(Arc::new(move |envelope: &Envelope| {
                if let Some(table) = weak.upgrade() {
                    table.on_envelope(envelope);
                }
            }));
            Self {
                state: Mutex::new(PendingState::default()),
                subscription,
            }
        })
    }

    fn on_envelope(&self, envelope: &Envelope) {
        match envelope {
            Envelope::Result { id, result } => {
                let _ = self.settle(*id, Ok(result.clone()));
            }
            Envelope::Error { id, error } => {
                let _ = self.settle(*id, Err(error.clone()));
            }
            Envelope::Request { .. } | Envelope::Notification { .. } => {}
        }
    }

    /// Allocate the next id and a future that resolves with its response.
    ///
    /// Ids start at 1 and only increase.
    pub fn register(&self) -> Result<(RequestId, ResponseFuture), ConnectionError> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ConnectionError::Disposed);
        }
        let Some(id) = state.next_id.checked_add(1).and_then(RequestId::new) else {
            return Err(ConnectionError::IdsExhausted);
        };
        state.next_id = id.get();

        let (tx, rx) = oneshot::channel();
        let _ = state.entries.insert(id, tx);
        Ok((id, ResponseFuture { id, rx }))
    }

    /// Deliver an outcome to the caller waiting on `id`.
    ///
    /// Returns `false` if no such request is pending.
    pub fn settle(&self, id: RequestId, outcome: Outcome) -> bool {
        let sender = self.state.lock().entries.remove(&id);
        let Some(sender) = sender else {
            debug!(%id, "dropping response for unknown request id");
            return false;
        };
        if sender.send(outcome).is_err() {
            debug!(%id, "caller stopped waiting before the response arrived");
        }
        true
    }

    /// Forget a request without settling it (its future reports
    /// [`RequestError::Abandoned`]).
    pub fn cancel(&self, id: RequestId) {
        let _ = self.state.lock().entries.remove(&id);
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Whether [`PendingRequests::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Stop listening and drop every outstanding entry.
    ///
    /// Outstanding callers are not answered; their futures observe the
    /// dropped entry as [`RequestError::Abandoned`]. Later calls to
    /// [`PendingRequests::register`] fail with [`ConnectionError::Disposed`].
    pub fn dispose(&self) {
        let abandoned = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.entries)
        };
        self.subscription.dispose();
        debug!(abandoned = abandoned.len(), "pending request table disposed");
    }
}

impl Drop for PendingRequests {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PendingRequests")
            .field("next_id", &state.next_id)
            .field("pending", &state.entries.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// Resolves with the peer's answer to one request.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct ResponseFuture {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
}

impl ResponseFuture {
    /// Correlation id carried by the request.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Decode the result into `R` once it arrives.
    pub fn typed<R: DeserializeOwned>(self) -> TypedResponse<R> {
        TypedResponse {
            inner: self,
            _marker: PhantomData,
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Value, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(RequestError::Remote(error)),
            Err(_) => Err(RequestError::Abandoned),
        })
    }
}

/// [`ResponseFuture`] that deserializes the result.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct TypedResponse<R> {
    inner: ResponseFuture,
    _marker: PhantomData<fn() -> R>,
}

impl<R> TypedResponse<R> {
    /// Correlation id carried by the request.
    pub fn id(&self) -> RequestId {
        self.inner.id
    }
}

impl<R: DeserializeOwned> Future for TypedResponse<R> {
    type Output = Result<R, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|outcome| {
            outcome.and_then(|value| serde_json::from_value(value).map_err(RequestError::Decode))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use portablerpc_core::{Listener, MessageFanout, TransportError};
    use portablerpc_logging::test_utils::capture_logs;
    use serde_json::json;
    use tracing::Level;

    /// Records outbound envelopes; inbound ones are injected by the test.
    #[derive(Default)]
    struct ScriptedTransport {
        fanout: MessageFanout,
    }

    impl Transport for ScriptedTransport {
        fn send_message(&self, _envelope: &Envelope) -> Result<(), TransportError> {
            Ok(())
        }

        fn on_message(&self, listener: Listener) -> Disposable {
            self.fanout.subscribe(listener)
        }
    }

    fn id(raw: u64) -> RequestId {
        RequestId::new(raw).unwrap()
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let ids: Vec<u64> = (0..3)
            .map(|_| table.register().unwrap().0.get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn result_envelope_resolves_caller() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (rid, fut) = table.register().unwrap();
        assert_eq!(fut.id(), rid);
        assert_eq!(table.len(), 1);

        transport
            .fanout
            .fire_envelope(&Envelope::result(rid, json!({"x": 1})));
        assert_eq!(fut.await.unwrap(), json!({"x": 1}));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn error_envelope_rejects_caller_with_payload() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (rid, fut) = table.register().unwrap();

        let _ = transport.fanout.fire(&json!({"portablerpc": "v1", "id": rid.get(), "error": "boom"}));
        assert_matches!(fut.await, Err(RequestError::Remote(v)) if v == json!("boom"));
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_id_is_dropped_with_debug_log() {
        let (logs, _guard) = capture_logs();
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (_rid, _fut) = table.register().unwrap();

        transport
            .fanout
            .fire_envelope(&Envelope::result(id(99), json!(null)));
        assert_eq!(table.len(), 1);
        assert!(logs.has_event(Level::DEBUG, "unknown request id"));
    }

    #[test]
    fn settle_reports_whether_entry_existed() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (rid, _fut) = table.register().unwrap();
        assert!(table.settle(rid, Ok(json!(1))));
        assert!(!table.settle(rid, Ok(json!(1))));
    }

    #[tokio::test]
    async fn second_response_for_same_id_is_ignored() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (rid, fut) = table.register().unwrap();
        transport.fanout.fire_envelope(&Envelope::result(rid, json!("first")));
        transport.fanout.fire_envelope(&Envelope::error(rid, json!("second")));
        assert_eq!(fut.await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn requests_and_notifications_are_ignored() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (rid, _fut) = table.register().unwrap();
        transport
            .fanout
            .fire_envelope(&Envelope::request(rid, "echo", json!(1)));
        transport
            .fanout
            .fire_envelope(&Envelope::notification("echo", None));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn dispose_abandons_outstanding_and_refuses_new() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (_a, fut_a) = table.register().unwrap();
        let (_b, fut_b) = table.register().unwrap();

        table.dispose();
        assert!(table.is_disposed());
        assert!(table.is_empty());
        assert_eq!(transport.fanout.listener_count(), 0);
        assert_matches!(fut_a.await, Err(RequestError::Abandoned));
        assert_matches!(fut_b.await, Err(RequestError::Abandoned));
        assert_matches!(table.register(), Err(ConnectionError::Disposed));

        table.dispose();
    }

    #[tokio::test]
    async fn cancel_abandons_single_entry() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (a, fut_a) = table.register().unwrap();
        let (_b, _fut_b) = table.register().unwrap();
        table.cancel(a);
        assert_eq!(table.len(), 1);
        assert_matches!(fut_a.await, Err(RequestError::Abandoned));
    }

    #[test]
    fn dropping_table_unsubscribes() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        assert_eq!(transport.fanout.listener_count(), 1);
        drop(table);
        assert_eq!(transport.fanout.listener_count(), 0);
    }

    #[tokio::test]
    async fn typed_response_decodes() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Sum {
            value: i64,
        }

        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (rid, fut) = table.register().unwrap();
        let typed = fut.typed::<Sum>();
        assert_eq!(typed.id(), rid);
        transport
            .fanout
            .fire_envelope(&Envelope::result(rid, json!({"value": 5})));
        assert_eq!(typed.await.unwrap(), Sum { value: 5 });
    }

    #[tokio::test]
    async fn typed_response_reports_decode_failure() {
        let transport = ScriptedTransport::default();
        let table = PendingRequests::attach(&transport);
        let (rid, fut) = table.register().unwrap();
        transport
            .fanout
            .fire_envelope(&Envelope::result(rid, json!("not a number")));
        assert_matches!(fut.typed::<u32>().await, Err(RequestError::Decode(_)));
    }
}
