//! Standard input/output transport. Stdout carries only protocol lines, so
//! logging must go to stderr.

use std::io;
use std::sync::Arc;

use backchannel_json_rpc_server::JsonRpcDispatcher;
use tracing::info;

use super::serve_lines;

/// Serve JSON-RPC on stdin/stdout until stdin is closed.
pub async fn serve_stdio(dispatcher: Arc<JsonRpcDispatcher>) -> io::Result<()> {
    info!("serving JSON-RPC on stdio");
    let result = serve_lines(dispatcher, tokio::io::stdin(), tokio::io::stdout()).await;
    info!("stdin closed, stdio transport stopped");
    result
}
