//! The assembled server.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use backchannel_json_rpc_server::JsonRpcDispatcher;
use tracing::{info, warn};

use crate::builder::BackchannelServerBuilder;
use crate::context::ServerContext;
use crate::Result;
use crate::transport::{SocketListener, serve_stdio};

/// Where requests come from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Transport {
    /// Newline-delimited JSON on stdin/stdout
    #[default]
    Stdio,
    /// Newline-delimited JSON on a unix domain socket
    Socket { path: PathBuf },
}

pub struct BackchannelServer {
    dispatcher: Arc<JsonRpcDispatcher>,
    context: Arc<ServerContext>,
    transport: Transport,
}

impl BackchannelServer {
    pub fn builder() -> BackchannelServerBuilder {
        BackchannelServerBuilder::new()
    }

    pub(crate) fn new(
        dispatcher: Arc<JsonRpcDispatcher>,
        context: Arc<ServerContext>,
        transport: Transport,
    ) -> Self {
        Self {
            dispatcher,
            context,
            transport,
        }
    }

    pub fn dispatcher(&self) -> &Arc<JsonRpcDispatcher> {
        &self.dispatcher
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Serve until Ctrl-C, or until stdin closes in stdio mode.
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            methods = ?self.dispatcher.registered_methods(),
            wait_timeout_ms = self.context.wait_timeout().as_millis() as u64,
            "starting backchannel server"
        );

        match &self.transport {
            Transport::Stdio => {
                tokio::select! {
                    result = serve_stdio(self.dispatcher.clone()) => result?,
                    _ = shutdown => info!("shutdown requested"),
                }
            }
            Transport::Socket { path } => {
                let listener = SocketListener::bind(path.clone())?;
                listener.serve(self.dispatcher.clone(), shutdown).await?;
            }
        }

        info!("backchannel server stopped");
        Ok(())
    }
}
