//! Handler registry and the dispatch pipeline.
//!
//! [`JsonRpcDispatcher::handle_text`] turns one unit of inbound text into at
//! most one response: decode, validate the envelope, resolve the handler,
//! validate params, invoke, respond. Notifications never produce output.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::JsonRpcError;
use crate::handler::{BoxError, JsonRpcHandler};
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcMessage;
use crate::types::RequestId;
use crate::validate::{recover_id, validate_envelope};

/// JSON-RPC method registry and dispatcher
#[derive(Default)]
pub struct JsonRpcDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn JsonRpcHandler>>>,
}

impl JsonRpcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method, replacing any previous one.
    pub fn register_method<H>(&self, method: impl Into<String>, handler: H)
    where
        H: JsonRpcHandler + 'static,
    {
        self.register_arc(method, Arc::new(handler));
    }

    /// Register one handler under several method names
    pub fn register_methods<H, I, S>(&self, methods: I, handler: H)
    where
        H: JsonRpcHandler + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handler: Arc<dyn JsonRpcHandler> = Arc::new(handler);
        for method in methods {
            self.register_arc(method, handler.clone());
        }
    }

    pub fn register_arc(&self, method: impl Into<String>, handler: Arc<dyn JsonRpcHandler>) {
        let method = method.into();
        if self.handlers.write().insert(method.clone(), handler).is_some() {
            debug!(method = %method, "replaced existing handler");
        } else {
            debug!(method = %method, "registered handler");
        }
    }

    pub fn lookup(&self, method: &str) -> Option<Arc<dyn JsonRpcHandler>> {
        self.handlers.read().get(method).cloned()
    }

    /// Registered method names, sorted
    pub fn registered_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.read().keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Process one unit of raw text. Returns `None` when nothing must be sent
    /// back (notifications).
    pub async fn handle_text(&self, text: &str) -> Option<JsonRpcMessage> {
        self.handle_bytes(text.as_bytes()).await
    }

    /// Process one unit of raw bytes. Input that is not UTF-8 is a parse
    /// error like any other undecodable input.
    pub async fn handle_bytes(&self, bytes: &[u8]) -> Option<JsonRpcMessage> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(raw) => self.handle_value(raw).await,
            Err(e) => {
                debug!(error = %e, "failed to decode request");
                Some(JsonRpcError::parse_error(Some(Value::String(e.to_string()))).into())
            }
        }
    }

    /// Process an already decoded value.
    pub async fn handle_value(&self, raw: Value) -> Option<JsonRpcMessage> {
        let request = match validate_envelope(&raw) {
            Ok(request) => request,
            Err(violations) => {
                let id = recover_id(&raw);
                debug!(?id, count = violations.len(), "rejected request envelope");
                let data = serde_json::to_value(&violations).ok();
                return Some(JsonRpcError::invalid_request(id, data).into());
            }
        };

        let id = request.id.clone();
        let method = request.method.clone();
        let outcome = self.dispatch(request).await;

        match id {
            Some(id) => Some(match outcome {
                Ok(result) => JsonRpcMessage::success(id, result),
                Err(error) => JsonRpcMessage::error(error),
            }),
            None => {
                if let Err(error) = outcome {
                    debug!(method = %method, code = error.code(), "notification failed: {}", error.message);
                }
                None
            }
        }
    }

    /// Resolve, validate and invoke a validated request. Errors carry the
    /// request id.
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let JsonRpcRequest {
            method, params, id, ..
        } = request;

        let Some(handler) = self.lookup(&method) else {
            debug!(method = %method, "method not found");
            return Err(JsonRpcError::method_not_found(id, &method));
        };

        if let Err(violations) = handler.validate(params.as_ref()) {
            debug!(method = %method, count = violations.len(), "invalid params");
            let data = serde_json::to_value(&violations).ok();
            return Err(JsonRpcError::invalid_params(id, data));
        }

        debug!(method = %method, ?id, "invoking handler");
        match AssertUnwindSafe(handler.handle(&method, params)).catch_unwind().await {
            Ok(outcome) => outcome.map_err(|error| into_rpc_error(error, &method, id)),
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                warn!(method = %method, %reason, "handler panicked");
                Err(JsonRpcError::internal_error(
                    id,
                    Some(Value::String(format!("handler panicked: {reason}"))),
                ))
            }
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Typed RPC errors pass through unchanged; anything else becomes an
/// internal error carrying the original message.
fn into_rpc_error(error: BoxError, method: &str, id: Option<RequestId>) -> JsonRpcError {
    match error.downcast::<JsonRpcError>() {
        Ok(rpc_error) if rpc_error.id.is_none() => (*rpc_error).with_id(id),
        Ok(rpc_error) => *rpc_error,
        Err(opaque) => {
            warn!(method = %method, error = %opaque, "handler failed");
            JsonRpcError::internal_error(id, Some(Value::String(opaque.to_string())))
        }
    }
}
