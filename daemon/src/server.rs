use shared::ipc::{Request, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::coordinator::SessionHandle;
use crate::rate_limit::CommandRateLimiter;

const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// One JSON request per connection: the client writes and half-closes, the
/// server answers and closes.
pub struct DaemonServer {
    socket_path: PathBuf,
    session: SessionHandle,
    limiter: Arc<CommandRateLimiter>,
    operation_timeout: Duration,
}

impl DaemonServer {
    pub fn new(
        socket_path: PathBuf,
        session: SessionHandle,
        limiter: Arc<CommandRateLimiter>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            socket_path,
            session,
            limiter,
            operation_timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn bind(&self) -> anyhow::Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Starting socket server at {}", self.socket_path.display());
        let listener = UnixListener::bind(&self.socket_path)?;
        debug!("Listener bound successfully");
        Ok(listener)
    }

    pub async fn serve(&self, listener: UnixListener) -> anyhow::Result<()> {
        loop {
            debug!("Waiting for connection...");
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("Connection accepted");
                    let session = self.session.clone();
                    let limiter = Arc::clone(&self.limiter);
                    let timeout = self.operation_timeout;
                    tokio::spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(session, limiter, timeout, stream).await
                        {
                            error!("Error handling connection: {}", e);
                        } else {
                            debug!("Connection handled successfully");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        session: SessionHandle,
        limiter: Arc<CommandRateLimiter>,
        timeout: Duration,
        mut stream: UnixStream,
    ) -> anyhow::Result<()> {
        let mut buffer = Vec::new();
        tokio::time::timeout(
            timeout,
            (&mut stream).take(MAX_REQUEST_BYTES).read_to_end(&mut buffer),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Timed out reading request"))??;

        if buffer.is_empty() {
            return Ok(());
        }

        let response = match serde_json::from_slice::<Request>(&buffer) {
            Ok(request) => {
                info!("Received request: {:?}", request);
                Self::respond(&session, &limiter, request).await
            }
            Err(e) => {
                warn!("Rejecting malformed request: {}", e);
                Response::Error(format!("Invalid request: {}", e))
            }
        };

        let response_json = serde_json::to_vec(&response)?;
        tokio::time::timeout(timeout, stream.write_all(&response_json))
            .await
            .map_err(|_| anyhow::anyhow!("Timed out writing response"))??;
        stream.shutdown().await?;

        debug!("Sent response: {:?}", response);
        Ok(())
    }

    async fn respond(
        session: &SessionHandle,
        limiter: &CommandRateLimiter,
        request: Request,
    ) -> Response {
        if matches!(request, Request::Press(_)) && !limiter.check() {
            warn!("Press rejected: rate limited");
            return Response::Error("rate limited".to_string());
        }
        match session.request(request).await {
            Ok(response) => response,
            Err(e) => Response::Error(e.to_string()),
        }
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
