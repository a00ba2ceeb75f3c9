//! # JSON-RPC 2.0 Server Core
//!
//! A transport-agnostic JSON-RPC 2.0 server core. This crate validates request
//! envelopes, keeps the method registry and maps handler outcomes to response
//! envelopes. It contains no transport code: anything that can hand over a line
//! of text and write one back can drive it.
//!
//! ## Features
//! - Structural envelope validation with per-field diagnostics
//! - Last-registration-wins handler registry
//! - Per-handler parameter validation backed by JSON Schema
//! - Notifications never produce output, even on error
//!
//! ```rust
//! use backchannel_json_rpc_server::prelude::*;
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let dispatcher = JsonRpcDispatcher::new();
//! dispatcher.register_method(
//!     "sayHello",
//!     FunctionHandler::new(|params: Option<RequestParams>| async move {
//!         let name = params
//!             .as_ref()
//!             .and_then(|p| p.get("name"))
//!             .and_then(|v| v.as_str())
//!             .unwrap_or("stranger")
//!             .to_string();
//!         Ok(json!(format!("Hello, {name}!")))
//!     }),
//! );
//!
//! let reply = dispatcher
//!     .handle_text(r#"{"jsonrpc":"2.0","method":"sayHello","params":{"name":"A"},"id":1}"#)
//!     .await;
//! assert!(reply.is_some());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     futures::executor::block_on(f)
//! # }
//! ```

pub mod dispatch;
pub mod error;
pub mod handler;
pub mod prelude;
pub mod request;
pub mod response;
pub mod schema;
pub mod types;
pub mod validate;

// Re-export main types
pub use dispatch::JsonRpcDispatcher;
pub use error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use handler::{BoxError, FunctionHandler, HandlerResult, JsonRpcHandler};
pub use request::{JsonRpcRequest, RequestParams};
pub use response::{JsonRpcErrorResponse, JsonRpcMessage, JsonRpcResponse};
pub use schema::{ParamsSchema, ParamsSchemaError, ParamsViolation};
pub use types::{JsonRpcVersion, RequestId};
pub use validate::{EnvelopeViolation, recover_id, validate_envelope};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names with this prefix are reserved for the protocol itself.
pub const RESERVED_METHOD_PREFIX: &str = "rpc.";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
