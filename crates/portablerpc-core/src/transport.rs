//! The transport capability a connection is layered over.
//!
//! A transport only needs to push envelopes out and tell subscribers about
//! envelopes coming in. [`MessageFanout`] handles the subscriber side so a
//! concrete transport implements `send_message` and forwards raw inbound
//! values to [`MessageFanout::fire`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::disposable::Disposable;
use crate::envelope::Envelope;
use crate::errors::Result;

/// Callback invoked for each inbound envelope.
pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Bidirectional message channel.
pub trait Transport: Send + Sync {
    /// Push one envelope onto the channel.
    fn send_message(&self, envelope: &Envelope) -> Result<()>;

    /// Subscribe to inbound envelopes. Any number of independent
    /// subscribers may exist; each handle removes only its own listener.
    fn on_message(&self, listener: Listener) -> Disposable;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send_message(&self, envelope: &Envelope) -> Result<()> {
        (**self).send_message(envelope)
    }

    fn on_message(&self, listener: Listener) -> Disposable {
        (**self).on_message(listener)
    }
}

#[derive(Default)]
struct FanoutInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

/// Subscriber bookkeeping shared by concrete transports.
///
/// Broadcast is synchronous and in subscription order. The listener list is
/// snapshotted before delivery, so listeners may subscribe or dispose while
/// being called; changes take effect from the next message.
#[derive(Clone, Default)]
pub struct MessageFanout {
    inner: Arc<FanoutInner>,
}

impl MessageFanout {
    /// Create a fan-out with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Disposing the handle removes exactly this listener.
    pub fn subscribe(&self, listener: Listener) -> Disposable {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, listener));
        let weak: Weak<FanoutInner> = Arc::downgrade(&self.inner);
        Disposable::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.lock().retain(|(lid, _)| *lid != id);
            }
        })
    }

    /// Classify a raw inbound value and broadcast it.
    ///
    /// Returns `false` (and notifies nobody) when the value is not one of
    /// our envelopes.
    pub fn fire(&self, raw: &Value) -> bool {
        let Some(envelope) = Envelope::from_value(raw) else {
            trace!("ignoring foreign message");
            return false;
        };
        self.fire_envelope(&envelope);
        true
    }

    /// Broadcast an already-classified envelope.
    pub fn fire_envelope(&self, envelope: &Envelope) {
        let snapshot: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        trace!(
            kind = envelope.kind(),
            listeners = snapshot.len(),
            "fan out envelope"
        );
        for listener in snapshot {
            listener(envelope);
        }
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl std::fmt::Debug for MessageFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageFanout")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}
