//! The worker side of the demo: answers `add` and announces `ready`.

use std::time::Duration;

use portablerpc::{Connection, ConnectionError};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Method the worker answers.
pub const ADD: &str = "add";
/// Notification the worker sends once its responder is registered.
pub const READY: &str = "ready";

const NOT_NUMBERS: &str = "Custom worker error: The parameters must be numbers!";
const OVERFLOW: &str = "Custom worker error: The sum does not fit in 64 bits!";

/// Start the worker after `delay`: register the `add` responder, then send
/// `ready`.
pub async fn run(connection: Connection, delay: Duration) -> Result<(), ConnectionError> {
    tokio::time::sleep(delay).await;

    let _add = connection.on_request(ADD, |params: Value| async move { add(&params) });
    debug!("worker registered add responder");

    connection.send_notification(READY, None).inspect_err(|error| {
        warn!(%error, "worker could not announce readiness");
    })
}

/// Add two decimal strings, `["2", "3"]` → `{"value": 5}`.
///
/// Each operand is read like a lenient integer parse: leading whitespace and
/// trailing garbage are ignored, so `" 12px"` reads as 12.
pub fn add(params: &Value) -> Result<Value, Value> {
    let operand = |index: usize| {
        params
            .get(index)
            .and_then(Value::as_str)
            .and_then(parse_leading_int)
    };
    let (Some(a), Some(b)) = (operand(0), operand(1)) else {
        return Err(json!({ "message": NOT_NUMBERS }));
    };
    a.checked_add(b)
        .map(|value| json!({ "value": value }))
        .ok_or_else(|| json!({ "message": OVERFLOW }))
}

fn parse_leading_int(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let sign_len = usize::from(text.starts_with(['-', '+']));
    let digits = text[sign_len..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len() - sign_len);
    text[..sign_len + digits].parse().ok()
}
