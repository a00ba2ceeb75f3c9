//! `backchannel`: serve the JSON-RPC backchannel on stdio (default) or a
//! unix socket.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use backchannel_server::BackchannelServer;
use backchannel_server::transport::socket::DEFAULT_SOCKET_PATH;
use clap::Parser;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serve on a unix socket instead of stdin/stdout
    #[arg(long)]
    socket: bool,

    /// Path of the listening socket
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket_path: PathBuf,

    /// Default timeout for condition waits, in milliseconds
    #[arg(long, default_value = "120000")]
    wait_timeout_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // stdout carries the protocol in stdio mode
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!(?cli, "starting backchannel");

    let builder = BackchannelServer::builder().wait_timeout(Duration::from_millis(cli.wait_timeout_ms));
    let builder = if cli.socket {
        builder.socket(&cli.socket_path)
    } else {
        builder.stdio()
    };

    let server = builder.build().context("invalid server configuration")?;
    server.run().await.context("backchannel server failed")?;
    Ok(())
}
