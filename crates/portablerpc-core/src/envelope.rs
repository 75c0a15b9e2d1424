//! Wire envelopes exchanged over a transport.
//!
//! Every envelope carries `"portablerpc": "v1"`. Values without that marker
//! are foreign traffic on a shared channel and are ignored, not rejected.
//!
//! ```json
//! { "portablerpc": "v1", "id": 1, "method": "add", "params": [1, 2] }
//! { "portablerpc": "v1", "id": 1, "result": { "value": 3 } }
//! { "portablerpc": "v1", "id": 1, "error": "boom" }
//! { "portablerpc": "v1", "method": "ready" }
//! ```

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::ids::{RequestId, is_truthy_id};

/// Name of the protocol marker field.
pub const PROTOCOL_FIELD: &str = "portablerpc";
/// Value of the protocol marker field understood by this implementation.
pub const PROTOCOL_VERSION: &str = "v1";

/// One classified protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// Method call expecting exactly one `Result` or `Error` back.
    Request {
        /// Correlation id chosen by the sender.
        id: RequestId,
        /// Method name (case-sensitive).
        method: String,
        /// Arbitrary JSON parameters.
        params: Value,
    },
    /// Successful completion of a request.
    Result {
        /// Id of the request being answered.
        id: RequestId,
        /// Arbitrary JSON result.
        result: Value,
    },
    /// Failed completion of a request. The payload shape is sender-defined.
    Error {
        /// Id of the request being answered.
        id: RequestId,
        /// Arbitrary JSON error value.
        error: Value,
    },
    /// Fire-and-forget method call.
    Notification {
        /// Method name (case-sensitive).
        method: String,
        /// Parameters; omitted on the wire when `None`.
        params: Option<Value>,
    },
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Build a result envelope.
    pub fn result(id: RequestId, result: Value) -> Self {
        Self::Result { id, result }
    }

    /// Build an error envelope.
    pub fn error(id: RequestId, error: Value) -> Self {
        Self::Error { id, error }
    }

    /// Build a notification envelope.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Classify a raw JSON value.
    ///
    /// Returns `None` for foreign or malformed traffic. Priority order:
    /// 1. `error` + `id` → [`Envelope::Error`]
    /// 2. `result` + `id` → [`Envelope::Result`]
    /// 3. `method` + truthy `id` → [`Envelope::Request`]
    /// 4. `method` + absent/falsy `id` → [`Envelope::Notification`]
    ///
    /// Field presence counts, not content: `"result": null` is a result.
    /// Response ids that are not positive integers cannot match anything we
    /// issued, so those envelopes are dropped. A truthy request id that is not
    /// a positive integer is malformed.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get(PROTOCOL_FIELD).and_then(Value::as_str) != Some(PROTOCOL_VERSION) {
            return None;
        }

        let raw_id = obj.get("id");
        if let Some(raw_id) = raw_id {
            if let Some(error) = obj.get("error") {
                return RequestId::from_json(raw_id).map(|id| Self::error(id, error.clone()));
            }
            if let Some(result) = obj.get("result") {
                return RequestId::from_json(raw_id).map(|id| Self::result(id, result.clone()));
            }
        }

        let method = obj.get("method")?.as_str()?.to_owned();
        let params = obj.get("params").cloned();
        match raw_id.filter(|v| is_truthy_id(v)) {
            None => Some(Self::Notification { method, params }),
            Some(raw_id) => RequestId::from_json(raw_id).map(|id| Self::Request {
                id,
                method,
                params: params.unwrap_or(Value::Null),
            }),
        }
    }

    /// Parse JSON text and classify it.
    ///
    /// The outer `Result` reports invalid JSON; the inner `Option` is `None`
    /// for valid JSON that is not one of our envelopes.
    pub fn from_json(text: &str) -> serde_json::Result<Option<Self>> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(&value))
    }

    /// Encode to the wire representation.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        let _ = obj.insert(PROTOCOL_FIELD.to_owned(), Value::from(PROTOCOL_VERSION));
        match self {
            Self::Request { id, method, params } => {
                let _ = obj.insert("id".into(), Value::from(id.get()));
                let _ = obj.insert("method".into(), Value::from(method.as_str()));
                let _ = obj.insert("params".into(), params.clone());
            }
            Self::Result { id, result } => {
                let _ = obj.insert("id".into(), Value::from(id.get()));
                let _ = obj.insert("result".into(), result.clone());
            }
            Self::Error { id, error } => {
                let _ = obj.insert("id".into(), Value::from(id.get()));
                let _ = obj.insert("error".into(), error.clone());
            }
            Self::Notification { method, params } => {
                let _ = obj.insert("method".into(), Value::from(method.as_str()));
                if let Some(params) = params {
                    let _ = obj.insert("params".into(), params.clone());
                }
            }
        }
        Value::Object(obj)
    }

    /// Method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Result { .. } | Self::Error { .. } => None,
        }
    }

    /// Correlation id, for everything except notifications.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Request { id, .. } | Self::Result { id, .. } | Self::Error { id, .. } => {
                Some(*id)
            }
            Self::Notification { .. } => None,
        }
    }

    /// Short variant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Notification { .. } => "notification",
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    fn id(raw: u64) -> RequestId {
        RequestId::new(raw).unwrap()
    }

    // ── Classification ──────────────────────────────────────────────

    #[test]
    fn classify_request() {
        let raw = json!({"portablerpc": "v1", "id": 1, "method": "echo", "params": {"x": 1}});
        assert_eq!(
            Envelope::from_value(&raw),
            Some(Envelope::request(id(1), "echo", json!({"x": 1})))
        );
    }

    #[test]
    fn classify_result() {
        let raw = json!({"portablerpc": "v1", "id": 4, "result": [1, 2]});
        assert_eq!(
            Envelope::from_value(&raw),
            Some(Envelope::result(id(4), json!([1, 2])))
        );
    }

    #[test]
    fn classify_null_result_is_still_result() {
        let raw = json!({"portablerpc": "v1", "id": 4, "result": null});
        assert_matches!(
            Envelope::from_value(&raw),
            Some(Envelope::Result { result: Value::Null, .. })
        );
    }

    #[test]
    fn classify_error() {
        let raw = json!({"portablerpc": "v1", "id": 2, "error": "boom"});
        assert_eq!(
            Envelope::from_value(&raw),
            Some(Envelope::error(id(2), json!("boom")))
        );
    }

    #[test]
    fn error_takes_priority_over_result_and_method() {
        let raw = json!({
            "portablerpc": "v1", "id": 2, "error": {"code": 1}, "result": 5, "method": "m"
        });
        assert_matches!(Envelope::from_value(&raw), Some(Envelope::Error { .. }));
    }

    #[test]
    fn result_takes_priority_over_method() {
        let raw = json!({"portablerpc": "v1", "id": 2, "result": 5, "method": "m"});
        assert_matches!(Envelope::from_value(&raw), Some(Envelope::Result { .. }));
    }

    #[test]
    fn classify_notification_without_id() {
        let raw = json!({"portablerpc": "v1", "method": "ready"});
        assert_eq!(
            Envelope::from_value(&raw),
            Some(Envelope::notification("ready", None))
        );
    }

    #[test]
    fn falsy_ids_make_notifications() {
        for falsy in [json!(0), json!(null), json!(false), json!("")] {
            let raw = json!({"portablerpc": "v1", "id": falsy, "method": "tick", "params": 1});
            assert_eq!(
                Envelope::from_value(&raw),
                Some(Envelope::notification("tick", Some(json!(1)))),
                "id {falsy} should classify as a notification"
            );
        }
    }

    #[test]
    fn request_without_params_gets_null() {
        let raw = json!({"portablerpc": "v1", "id": 3, "method": "ping"});
        assert_eq!(
            Envelope::from_value(&raw),
            Some(Envelope::request(id(3), "ping", Value::Null))
        );
    }

    #[test]
    fn truthy_non_integer_request_id_is_malformed() {
        let raw = json!({"portablerpc": "v1", "id": "abc", "method": "ping"});
        assert!(Envelope::from_value(&raw).is_none());
        let raw = json!({"portablerpc": "v1", "id": -4, "method": "ping"});
        assert!(Envelope::from_value(&raw).is_none());
    }

    #[test]
    fn response_with_unusable_id_is_dropped() {
        let raw = json!({"portablerpc": "v1", "id": "7", "result": 1});
        assert!(Envelope::from_value(&raw).is_none());
        let raw = json!({"portablerpc": "v1", "id": 0, "error": 1, "method": "m"});
        assert!(Envelope::from_value(&raw).is_none());
    }

    #[test]
    fn result_without_id_is_not_a_response() {
        let raw = json!({"portablerpc": "v1", "result": 1});
        assert!(Envelope::from_value(&raw).is_none());
    }

    // ── Foreign traffic ─────────────────────────────────────────────

    #[test]
    fn foreign_values_are_ignored() {
        let foreign = [
            json!(null),
            json!(42),
            json!("portablerpc"),
            json!([1, 2]),
            json!({"id": 1, "method": "echo"}),
            json!({"portablerpc": "v2", "id": 1, "method": "echo"}),
            json!({"portablerpc": 1, "id": 1, "method": "echo"}),
            json!({"portablerpc": "v1"}),
            json!({"portablerpc": "v1", "method": 5}),
        ];
        for value in foreign {
            assert!(Envelope::from_value(&value).is_none(), "{value} should be ignored");
        }
    }

    #[test]
    fn method_names_are_case_sensitive() {
        let raw = json!({"portablerpc": "v1", "method": "Echo"});
        assert_eq!(Envelope::from_value(&raw).unwrap().method(), Some("Echo"));
    }

    // ── Encoding ────────────────────────────────────────────────────

    #[test]
    fn wire_format_request() {
        let v = Envelope::request(id(1), "echo", json!({"x": 1})).to_value();
        assert_eq!(
            v,
            json!({"portablerpc": "v1", "id": 1, "method": "echo", "params": {"x": 1}})
        );
    }

    #[test]
    fn wire_format_result_and_error() {
        assert_eq!(
            Envelope::result(id(9), Value::Null).to_value(),
            json!({"portablerpc": "v1", "id": 9, "result": null})
        );
        assert_eq!(
            Envelope::error(id(9), json!({"message": "nope"})).to_value(),
            json!({"portablerpc": "v1", "id": 9, "error": {"message": "nope"}})
        );
    }

    #[test]
    fn notification_omits_missing_params() {
        let v = Envelope::notification("ready", None).to_value();
        assert_eq!(v, json!({"portablerpc": "v1", "method": "ready"}));
        assert!(v.get("id").is_none());
    }

    #[test]
    fn serialize_matches_to_value() {
        let env = Envelope::notification("log", Some(json!(["a"])));
        let text = serde_json::to_string(&env).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env.to_value());
    }

    #[test]
    fn from_json_distinguishes_invalid_and_foreign() {
        assert!(Envelope::from_json("{not json").is_err());
        assert_eq!(Envelope::from_json(r#"{"hello": 1}"#).unwrap(), None);
        assert_matches!(
            Envelope::from_json(r#"{"portablerpc":"v1","method":"ready"}"#),
            Ok(Some(Envelope::Notification { .. }))
        );
    }

    #[test]
    fn accessors() {
        let req = Envelope::request(id(5), "m", Value::Null);
        assert_eq!(req.method(), Some("m"));
        assert_eq!(req.id(), Some(id(5)));
        assert_eq!(req.kind(), "request");
        let res = Envelope::result(id(5), Value::Null);
        assert_eq!(res.method(), None);
        assert_eq!(Envelope::notification("n", None).id(), None);
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
        ]
    }

    fn json_value() -> impl Strategy<Value = Value> {
        json_leaf().prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                proptest::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn encoded_requests_classify_as_requests(
            raw_id in 1u64..=u64::MAX,
            method in "[a-zA-Z._]{0,16}",
            params in json_value(),
        ) {
            let env = Envelope::request(id(raw_id), method, params);
            prop_assert_eq!(Envelope::from_value(&env.to_value()), Some(env));
        }

        #[test]
        fn encoded_notifications_never_carry_an_id(
            method in "[a-zA-Z._]{0,16}",
            params in proptest::option::of(json_value()),
        ) {
            let env = Envelope::notification(method, params);
            let decoded = Envelope::from_value(&env.to_value());
            prop_assert_eq!(decoded.as_ref().and_then(Envelope::id), None);
            prop_assert_eq!(decoded, Some(env));
        }
    }
}
