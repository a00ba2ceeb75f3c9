//! # Backchannel Server
//!
//! A JSON-RPC 2.0 service that drives an event-driven agent. Requests arrive
//! over stdio or a unix socket, are dispatched by
//! [`backchannel_json_rpc_server::JsonRpcDispatcher`], and business handlers
//! bridge the agent's asynchronous operations back into request/response
//! form with [`condition::await_condition`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backchannel_server::BackchannelServer;
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> backchannel_server::Result<()> {
//!     let server = BackchannelServer::builder()
//!         .socket("/tmp/backchannel.sock")
//!         .wait_timeout(Duration::from_secs(30))
//!         .build()?;
//!
//!     server.run().await
//! }
//! ```

pub mod agent;
pub mod builder;
pub mod condition;
pub mod context;
pub mod flag;
pub mod handlers;
pub mod server;
pub mod transport;

pub use agent::{Agent, AgentConfig, AgentError, AgentEvent, AgentFactory, EventBus, EventCategory, EventSource};
pub use builder::BackchannelServerBuilder;
pub use condition::{ConditionConfig, ConditionWait, Observed, WaitError, await_condition};
pub use context::ServerContext;
pub use flag::EventFlag;
pub use server::{BackchannelServer, Transport};

// Re-export foundational types
pub use backchannel_json_rpc_server as json_rpc;
pub use backchannel_json_rpc_server::{JsonRpcDispatcher, JsonRpcError, JsonRpcHandler};

/// Result type for server operations
pub type Result<T> = std::result::Result<T, BackchannelError>;

/// Server-level errors
#[derive(Debug, thiserror::Error)]
pub enum BackchannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("socket {path} is in use by another process")]
    SocketInUse { path: String },

    #[error("Handler schema error: {0}")]
    Schema(#[from] backchannel_json_rpc_server::ParamsSchemaError),
}
