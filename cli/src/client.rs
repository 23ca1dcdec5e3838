use shared::ipc::{IpcError, Request, Response};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};
use tracing::warn;

/// Timeout for socket operations (5 seconds)
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Get the Unix socket path for the daemon.
/// Uses XDG runtime directory if available, falls back to /tmp/repcued.sock
pub fn get_socket_path() -> PathBuf {
    if let Some(runtime_dir) = dirs::runtime_dir() {
        runtime_dir.join("repcued.sock")
    } else {
        PathBuf::from("/tmp/repcued.sock")
    }
}

pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new() -> Self {
        Self::with_socket(get_socket_path())
    }

    pub fn with_socket(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    pub async fn send_request(&self, request: Request) -> Result<Response, IpcError> {
        let mut stream = match timeout(SOCKET_TIMEOUT, UnixStream::connect(&self.socket_path)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IpcError::ConnectionRefused);
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(IpcError::ConnectionRefused);
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    "Connection timeout: failed to connect to daemon at {} within {:?}",
                    self.socket_path.display(),
                    SOCKET_TIMEOUT
                );
                return Err(IpcError::Timeout);
            }
        };

        let request_json = serde_json::to_vec(&request)?;

        // The daemon reads until EOF, so half-close after writing.
        let write = async {
            stream.write_all(&request_json).await?;
            stream.shutdown().await
        };
        match timeout(SOCKET_TIMEOUT, write).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Write timeout: failed to send request to daemon within {:?}",
                    SOCKET_TIMEOUT
                );
                return Err(IpcError::Timeout);
            }
        }

        let mut buffer = Vec::new();
        match timeout(SOCKET_TIMEOUT, stream.read_to_end(&mut buffer)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                warn!(
                    "Read timeout: failed to receive response from daemon within {:?}",
                    SOCKET_TIMEOUT
                );
                return Err(IpcError::Timeout);
            }
        }

        let response: Response = serde_json::from_slice(&buffer)?;
        Ok(response)
    }
}
