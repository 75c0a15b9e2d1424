//! Handler traits for inbound requests and notifications.
//!
//! Closures implement both traits directly, so most callers never name them:
//!
//! ```ignore
//! connection.on_request("echo", |params: Value| async move { Ok(params) });
//! connection.on_notification("ready", |_: &Value| println!("peer is ready"));
//! ```

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// Answers inbound requests.
///
/// `Ok` becomes a result envelope, `Err` an error envelope. The method name
/// is not passed: it was already used to pick this handler.
///
/// A notification for the same method also runs the handler; its outcome is
/// then discarded.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the response for one request.
    async fn handle(&self, params: Value) -> Result<Value, Value>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, Value>> + Send + 'static,
{
    async fn handle(&self, params: Value) -> Result<Value, Value> {
        (self)(params).await
    }
}

/// Observes inbound notifications. Called synchronously on the delivering
/// thread; spawn if the work is long.
pub trait NotificationHandler: Send + Sync {
    /// React to one notification. `params` is `Null` when the sender
    /// omitted them.
    fn handle(&self, params: &Value);
}

impl<F> NotificationHandler for F
where
    F: Fn(&Value) + Send + Sync,
{
    fn handle(&self, params: &Value) {
        (self)(params);
    }
}

/// Request handler over typed parameters and results.
///
/// Parameters that do not deserialize into `P` are rejected with
/// `{"message": "invalid params: ..."}` without calling the inner closure.
/// Built with [`typed`].
pub struct TypedHandler<F, P, R, E> {
    func: F,
    _marker: PhantomData<fn(P) -> (R, E)>,
}

/// Wrap an async closure over typed params into a [`RequestHandler`].
pub fn typed<F, Fut, P, R, E>(func: F) -> TypedHandler<F, P, R, E>
where
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    P: DeserializeOwned + Send,
    R: Serialize,
    E: Serialize,
{
    TypedHandler {
        func,
        _marker: PhantomData,
    }
}

fn encode(value: impl Serialize) -> Result<Value, Value> {
    serde_json::to_value(value)
        .map_err(|e| json!({ "message": format!("failed to encode response: {e}") }))
}

#[async_trait]
impl<F, Fut, P, R, E> RequestHandler for TypedHandler<F, P, R, E>
where
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    P: DeserializeOwned + Send,
    R: Serialize,
    E: Serialize,
{
    async fn handle(&self, params: Value) -> Result<Value, Value> {
        let params: P = serde_json::from_value(params)
            .map_err(|e| json!({ "message": format!("invalid params: {e}") }))?;
        match (self.func)(params).await {
            Ok(result) => encode(result),
            Err(error) => Err(encode(error)?),
        }
    }
}
