//! Unix domain socket transport.
//!
//! Each accepted connection is served with the same newline-delimited framing
//! as stdio. A socket file left behind by a dead process is removed on bind;
//! one that still accepts connections is reported as in use. The file is
//! removed again when the listener is dropped.

use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backchannel_json_rpc_server::JsonRpcDispatcher;
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use super::serve_lines;
use crate::{BackchannelError, Result};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/backchannel.sock";

pub struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
}

impl SocketListener {
    /// Bind to `path`. Must be called from within a tokio runtime.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        clear_stale_socket(&path)?;
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "listening on unix socket");
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves. Connections already
    /// accepted keep running on their own tasks.
    pub async fn serve<F>(&self, dispatcher: Arc<JsonRpcDispatcher>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(path = %self.path.display(), "socket transport shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        debug!("client connected");
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            match serve_lines(dispatcher, reader, writer).await {
                                Ok(()) => debug!("client disconnected"),
                                Err(e) => warn!(error = %e, "connection error"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                }
            }
        }
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
        }
    }
}

fn clear_stale_socket(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !metadata.file_type().is_socket() {
        return Err(BackchannelError::Config(format!(
            "{} exists and is not a socket",
            path.display()
        )));
    }

    match std::os::unix::net::UnixStream::connect(path) {
        Ok(_) => Err(BackchannelError::SocketInUse {
            path: path.display().to_string(),
        }),
        Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound) => {
            debug!(path = %path.display(), "removing stale socket file");
            fs::remove_file(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
