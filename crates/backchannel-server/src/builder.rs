//! Backchannel Server Builder
//!
//! Collects transport, agent and handler configuration and wires the
//! dispatcher and server context together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backchannel_json_rpc_server::{JsonRpcDispatcher, JsonRpcHandler};
use tracing::debug;

use crate::agent::{Agent, AgentFactory, LoopbackFactory};
use crate::condition::DEFAULT_WAIT_TIMEOUT;
use crate::context::ServerContext;
use crate::handlers::register_default_handlers;
use crate::server::{BackchannelServer, Transport};
use crate::{BackchannelError, Result};

/// Builder for [`BackchannelServer`]
pub struct BackchannelServerBuilder {
    transport: Transport,
    wait_timeout: Duration,
    factory: Arc<dyn AgentFactory>,

    /// Agent installed before the first `initialize`
    agent: Option<Arc<dyn Agent>>,

    /// Extra handlers, registered after the defaults so they can replace them
    handlers: Vec<(String, Arc<dyn JsonRpcHandler>)>,
}

impl BackchannelServerBuilder {
    pub fn new() -> Self {
        Self {
            transport: Transport::Stdio,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            factory: Arc::new(LoopbackFactory),
            agent: None,
            handlers: Vec::new(),
        }
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn stdio(self) -> Self {
        self.transport(Transport::Stdio)
    }

    pub fn socket(self, path: impl Into<PathBuf>) -> Self {
        self.transport(Transport::Socket { path: path.into() })
    }

    /// Default timeout for condition waits
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Factory `initialize` uses to build the agent
    pub fn agent_factory<F: AgentFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Start with an agent already installed
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Register an additional method handler
    pub fn handler<H: JsonRpcHandler + 'static>(mut self, method: impl Into<String>, handler: H) -> Self {
        self.handlers.push((method.into(), Arc::new(handler)));
        self
    }

    pub fn build(self) -> Result<BackchannelServer> {
        if self.wait_timeout.is_zero() {
            return Err(BackchannelError::Config("wait timeout must be greater than zero".into()));
        }
        if let Transport::Socket { path } = &self.transport
            && path.as_os_str().is_empty()
        {
            return Err(BackchannelError::Config("socket path cannot be empty".into()));
        }

        let context = Arc::new(ServerContext::new(self.factory).with_wait_timeout(self.wait_timeout));
        if let Some(agent) = self.agent {
            context.install_agent(agent);
        }

        let dispatcher = Arc::new(JsonRpcDispatcher::new());
        register_default_handlers(&dispatcher, context.clone())?;
        for (method, handler) in self.handlers {
            dispatcher.register_arc(method, handler);
        }
        debug!(methods = ?dispatcher.registered_methods(), "dispatcher configured");

        Ok(BackchannelServer::new(dispatcher, context, self.transport))
    }
}

impl Default for BackchannelServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, LoopbackAgent};
    use backchannel_json_rpc_server::{FunctionHandler, RequestParams};
    use serde_json::{Value, json};

    #[test]
    fn test_default_build_registers_business_methods() {
        let server = BackchannelServer::builder().build().unwrap();
        assert_eq!(
            server.dispatcher().registered_methods(),
            vec!["initialize", "receiveInvitation", "sendPing"]
        );
        assert_eq!(server.transport(), &Transport::Stdio);
        assert_eq!(server.context().wait_timeout(), DEFAULT_WAIT_TIMEOUT);
        assert!(!server.context().is_initialized());
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        assert!(matches!(
            BackchannelServer::builder().wait_timeout(Duration::ZERO).build(),
            Err(BackchannelError::Config(_))
        ));
        assert!(matches!(
            BackchannelServer::builder().socket("").build(),
            Err(BackchannelError::Config(_))
        ));
    }

    #[test]
    fn test_preinstalled_agent() {
        let agent: Arc<dyn Agent> = Arc::new(LoopbackAgent::new(AgentConfig::default()));
        let server = BackchannelServer::builder().agent(agent).build().unwrap();
        assert!(server.context().is_initialized());
    }

    #[tokio::test]
    async fn test_extra_handler_can_replace_default() {
        let server = BackchannelServer::builder()
            .socket("/tmp/unused.sock")
            .handler(
                "initialize",
                FunctionHandler::new(|_params: Option<RequestParams>| async move { Ok(json!("stub")) }),
            )
            .build()
            .unwrap();

        let reply = server
            .dispatcher()
            .handle_text(r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#)
            .await
            .unwrap();
        assert_eq!(serde_json::to_value(reply).unwrap()["result"], Value::from("stub"));
    }
}
