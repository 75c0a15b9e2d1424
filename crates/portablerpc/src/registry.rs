//! Per-method handler registrations with per-entry removal handles.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use portablerpc_core::Disposable;

struct Slots<H: ?Sized> {
    next_id: u64,
    by_method: HashMap<String, Vec<(u64, Arc<H>)>>,
}

/// Handlers grouped by exact method name, kept in registration order.
///
/// Reads return clones of the `Arc`s so callers invoke handlers without
/// holding the lock.
pub(crate) struct Registrations<H: ?Sized> {
    slots: Arc<Mutex<Slots<H>>>,
}

impl<H: ?Sized + Send + Sync + 'static> Registrations<H> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                by_method: HashMap::new(),
            })),
        }
    }

    /// Append a handler for `method`. The returned handle removes exactly
    /// this entry.
    pub(crate) fn add(&self, method: &str, handler: Arc<H>) -> Disposable {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots
                .by_method
                .entry(method.to_owned())
                .or_default()
                .push((id, handler));
            id
        };
        let method = method.to_owned();
        let weak: Weak<Mutex<Slots<H>>> = Arc::downgrade(&self.slots);
        Disposable::from_fn(move || {
            let Some(slots) = weak.upgrade() else {
                return;
            };
            let mut slots = slots.lock();
            if let Some(entries) = slots.by_method.get_mut(&method) {
                entries.retain(|(eid, _)| *eid != id);
                if entries.is_empty() {
                    let _ = slots.by_method.remove(&method);
                }
            }
        })
    }

    /// Earliest live registration for `method`.
    pub(crate) fn first(&self, method: &str) -> Option<Arc<H>> {
        self.slots
            .lock()
            .by_method
            .get(method)
            .and_then(|entries| entries.first())
            .map(|(_, h)| h.clone())
    }

    /// Snapshot of every live registration for `method`, oldest first.
    pub(crate) fn all(&self, method: &str) -> Vec<Arc<H>> {
        self.slots
            .lock()
            .by_method
            .get(method)
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn clear(&self) {
        self.slots.lock().by_method.clear();
    }

    /// Live registrations across all methods.
    pub(crate) fn count(&self) -> usize {
        self.slots.lock().by_method.values().map(Vec::len).sum()
    }
}
