//! Handles that undo a registration exactly once.

use std::fmt;

use parking_lot::Mutex;

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle returned by every `on_*` registration.
///
/// Calling [`Disposable::dispose`] runs the teardown once; later calls are
/// no-ops. Dropping the handle without disposing leaves the registration in
/// place, so `let _ = conn.on_notification(..)` registers for the lifetime of
/// the connection.
#[must_use = "dropping a Disposable keeps the registration alive; call dispose() to remove it"]
pub struct Disposable {
    teardown: Mutex<Option<Teardown>>,
}

impl Disposable {
    /// Wrap a teardown closure.
    pub fn from_fn(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A handle with nothing to undo.
    pub fn noop() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Run the teardown if it has not run yet.
    pub fn dispose(&self) {
        // Take first so the closure runs outside the lock.
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Whether the teardown has already run (or there never was one).
    pub fn is_disposed(&self) -> bool {
        self.teardown.lock().is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Ordered set of handles torn down together.
#[derive(Debug, Default)]
pub struct DisposableStore {
    items: Mutex<Vec<Disposable>>,
}

impl DisposableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle.
    pub fn push(&self, disposable: Disposable) {
        self.items.lock().push(disposable);
    }

    /// Dispose every tracked handle in insertion order and forget them.
    pub fn dispose_all(&self) {
        let items = std::mem::take(&mut *self.items.lock());
        for item in &items {
            item.dispose();
        }
    }

    /// Number of tracked handles.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
