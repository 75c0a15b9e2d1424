//! In-memory `tracing` sink for asserting on log output in tests.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// One recorded log line.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// Severity it was emitted at.
    pub level: Level,
    /// Emitting module path.
    pub target: String,
    /// The `message` field, empty when the event had none.
    pub message: String,
    /// Every other field, as `(name, rendered value)` in emission order.
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    /// Rendered value of field `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value.as_str()))
    }
}

/// Shared buffer the capture layer writes into. Clones see the same events.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// True if some event's message contains `needle`, at any level.
    pub fn has_message(&self, needle: &str) -> bool {
        self.any(|event| event.message.contains(needle))
    }

    /// True if some event at exactly `level` has a message containing `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.any(|event| event.level == level && event.message.contains(needle))
    }

    /// How many events were emitted at `level`.
    pub fn count_at_level(&self, level: Level) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn any(&self, predicate: impl Fn(&CapturedEvent) -> bool) -> bool {
        self.events.lock().iter().any(predicate)
    }
}

/// Splits an event into its message and remaining fields.
#[derive(Default)]
struct Recorder {
    message: String,
    fields: Vec<(String, String)>,
}

impl Recorder {
    fn put(&mut self, field: &Field, rendered: String) {
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.push((field.name().to_owned(), rendered));
        }
    }
}

impl Visit for Recorder {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.to_string());
    }
}

struct CaptureLayer(CapturedLogs);

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut recorder = Recorder::default();
        event.record(&mut recorder);
        let metadata = event.metadata();
        self.0.events.lock().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_owned(),
            message: recorder.message,
            fields: recorder.fields,
        });
    }
}

/// Route every event on the current thread into a fresh [`CapturedLogs`].
///
/// Capture stops when the guard drops. Under a current-thread tokio runtime,
/// spawned tasks run on the same thread and are captured too.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(CaptureLayer(logs.clone()))
        .with(LevelFilter::TRACE)
        .set_default();
    (logs, guard)
}
