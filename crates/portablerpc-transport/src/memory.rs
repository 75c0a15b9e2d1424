//! Linked in-process endpoints, the moral equivalent of a worker's
//! `postMessage` channel.

use std::sync::atomic::{AtomicU64, Ordering};

use portablerpc_core::errors::Result;
use portablerpc_core::{Disposable, Envelope, Listener, MessageFanout, Transport, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One end of an in-memory channel created by [`MemoryTransport::pair`].
///
/// Outbound envelopes are converted to plain JSON values (so the peer sees
/// exactly what a serializing channel would carry) and queued on a bounded
/// channel. A pump task on the receiving side feeds them to subscribers.
pub struct MemoryTransport {
    fanout: MessageFanout,
    outbound: mpsc::Sender<Value>,
    capacity: usize,
    dropped_messages: AtomicU64,
    pump: JoinHandle<()>,
}

impl MemoryTransport {
    /// Create two linked endpoints, each with an inbound queue of
    /// `capacity` messages (at least 1).
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let capacity = capacity.max(1);
        let (to_left, left_inbox) = mpsc::channel(capacity);
        let (to_right, right_inbox) = mpsc::channel(capacity);
        let left = Self::endpoint("left", to_right, left_inbox, capacity);
        let right = Self::endpoint("right", to_left, right_inbox, capacity);
        (left, right)
    }

    fn endpoint(
        side: &'static str,
        outbound: mpsc::Sender<Value>,
        inbox: mpsc::Receiver<Value>,
        capacity: usize,
    ) -> Self {
        let fanout = MessageFanout::new();
        let pump = tokio::spawn(pump(side, fanout.clone(), inbox));
        Self {
            fanout,
            outbound,
            capacity,
            dropped_messages: AtomicU64::new(0),
            pump,
        }
    }

    /// Feed a raw value to this endpoint's subscribers as if the peer had
    /// sent it. Returns whether it was one of our envelopes.
    pub fn inject(&self, value: &Value) -> bool {
        self.fanout.fire(value)
    }

    /// Outbound messages refused because the peer's queue was full or gone.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Number of live subscribers on this endpoint.
    pub fn listener_count(&self) -> usize {
        self.fanout.listener_count()
    }
}

async fn pump(side: &'static str, fanout: MessageFanout, mut inbox: mpsc::Receiver<Value>) {
    while let Some(value) = inbox.recv().await {
        let _ = fanout.fire(&value);
    }
    debug!(side, "memory transport peer closed");
}

impl Transport for MemoryTransport {
    fn send_message(&self, envelope: &Envelope) -> Result<()> {
        let error = match self.outbound.try_send(envelope.to_value()) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(_)) => TransportError::Full {
                capacity: self.capacity,
            },
            Err(TrySendError::Closed(_)) => TransportError::Closed,
        };
        let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(kind = envelope.kind(), dropped, %error, "memory transport dropped message");
        Err(error)
    }

    fn on_message(&self, listener: Listener) -> Disposable {
        self.fanout.subscribe(listener)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("capacity", &self.capacity)
            .field("listeners", &self.listener_count())
            .field("dropped_messages", &self.dropped_messages())
            .finish_non_exhaustive()
    }
}
