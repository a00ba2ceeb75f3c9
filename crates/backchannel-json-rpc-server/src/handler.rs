use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::request::RequestParams;
use crate::schema::{ParamsSchema, ParamsViolation};

/// Error type handlers fail with.
///
/// Returning a [`crate::JsonRpcError`] through it keeps the error's code,
/// message and data; anything else is reported as an internal error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type HandlerResult<T = Value> = Result<T, BoxError>;

/// Trait for handling JSON-RPC method calls
#[async_trait]
pub trait JsonRpcHandler: Send + Sync {
    /// Check the shape of `params` before the call. Rejections become
    /// `Invalid params` errors carrying the returned diagnostics.
    fn validate(&self, params: Option<&RequestParams>) -> Result<(), Vec<ParamsViolation>> {
        let _ = params;
        Ok(())
    }

    /// Handle a JSON-RPC method call. `method` lets one handler serve several
    /// registered names.
    async fn handle(&self, method: &str, params: Option<RequestParams>) -> HandlerResult;
}

/// A handler built from a parameter schema and an async closure
pub struct FunctionHandler<F> {
    schema: ParamsSchema,
    handler_fn: F,
}

impl<F, Fut> FunctionHandler<F>
where
    F: Fn(Option<RequestParams>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    /// A handler that accepts any params.
    pub fn new(handler_fn: F) -> Self {
        Self {
            schema: ParamsSchema::any(),
            handler_fn,
        }
    }

    pub fn with_schema(mut self, schema: ParamsSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn schema(&self) -> &ParamsSchema {
        &self.schema
    }
}

#[async_trait]
impl<F, Fut> JsonRpcHandler for FunctionHandler<F>
where
    F: Fn(Option<RequestParams>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    fn validate(&self, params: Option<&RequestParams>) -> Result<(), Vec<ParamsViolation>> {
        self.schema.validate(params)
    }

    async fn handle(&self, _method: &str, params: Option<RequestParams>) -> HandlerResult {
        (self.handler_fn)(params).await
    }
}
