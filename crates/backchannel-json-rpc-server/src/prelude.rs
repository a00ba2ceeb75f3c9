//! Commonly used types, for glob import.
//!
//! ```rust
//! use backchannel_json_rpc_server::prelude::*;
//! ```

pub use crate::dispatch::JsonRpcDispatcher;
pub use crate::error::{JsonRpcError, JsonRpcErrorCode};
pub use crate::handler::{BoxError, FunctionHandler, HandlerResult, JsonRpcHandler};
pub use crate::request::{JsonRpcRequest, RequestParams};
pub use crate::response::JsonRpcMessage;
pub use crate::schema::ParamsSchema;
pub use crate::types::RequestId;

pub use crate::error_codes::*;
