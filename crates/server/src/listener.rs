//! Unix socket listener for client connections
//!
//! `BqsListener` accepts `BqsClient` connections and answers each frame
//! through `BqsServer`. A connection carries any number of request/reply
//! exchanges in order.
//!
//! # Protocol
//!
//! Every frame starts with a 4-byte big-endian length that counts the whole
//! frame, head included (see `bqs_protocol::message`). A head outside the
//! accepted range ends the connection since the stream can no longer be
//! resynchronized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bqs_protocol::{BqsStatus, ProtocolError};
use bqs_protocol::message::{HEAD_SIZE, read_head};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bqs::BqsServer;
use crate::error::{Result, ServerError};

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/bqs.sock";

/// Listener configuration
#[derive(Debug, Clone)]
pub struct BqsListenerConfig {
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Initial read buffer size per connection
    pub read_buffer_size: usize,
}

impl Default for BqsListenerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_connections: 64,
            read_buffer_size: 64 * 1024,
        }
    }
}

impl BqsListenerConfig {
    /// Create config with custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }
}

/// Unix socket front end of the scheduler
pub struct BqsListener {
    config: BqsListenerConfig,
    server: Arc<BqsServer>,
    cancel: CancellationToken,
}

impl BqsListener {
    pub fn new(server: Arc<BqsServer>, config: BqsListenerConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            server,
            cancel,
        }
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Bind the socket and serve until cancelled
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await;
        Ok(())
    }

    /// Bind the socket now and serve in a background task
    ///
    /// Binding happens before this returns, so clients may connect as soon
    /// as the handle exists.
    pub fn spawn(self) -> Result<tokio::task::JoinHandle<Result<()>>> {
        let listener = self.bind()?;
        Ok(tokio::spawn(async move {
            self.serve(listener).await;
            Ok(())
        }))
    }

    fn bind(&self) -> Result<UnixListener> {
        let path = &self.config.socket_path;
        // stale socket from a previous run
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "bqs listener listening");
        Ok(listener)
    }

    async fn serve(&self, listener: UnixListener) {
        let permits = Arc::new(Semaphore::new(self.config.max_connections.max(1)));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                            warn!(max = self.config.max_connections, "connection limit reached, refusing client");
                            continue;
                        };
                        let server = Arc::clone(&self.server);
                        let cancel = self.cancel.clone();
                        let buffer_size = self.config.read_buffer_size;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, server, buffer_size, cancel).await {
                                debug!(error = %e, "connection error");
                            }
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept error");
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
            debug!(error = %e, "socket file not removed");
        }
        info!("bqs listener stopped");
    }
}

/// Serve request/reply exchanges until the peer closes
async fn handle_connection(
    mut stream: UnixStream,
    server: Arc<BqsServer>,
    buffer_size: usize,
    cancel: CancellationToken,
) -> Result<()> {
    debug!("client connected");
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        let mut head = [0u8; HEAD_SIZE];
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = stream.read_exact(&mut head) => match read {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }

        let len = read_head(&head).ok_or_else(|| {
            ServerError::Protocol(ProtocolError::malformed(format!(
                "frame length {} out of range",
                u32::from_be_bytes(head)
            )))
        })?;

        buf.clear();
        buf.resize(len, 0);
        buf[..HEAD_SIZE].copy_from_slice(&head);
        stream.read_exact(&mut buf[HEAD_SIZE..]).await?;

        let frame = buf.split().freeze();
        let reply = server
            .handle_frame(frame)
            .await
            .ok_or(ServerError::Status(BqsStatus::InnerError))?;
        stream.write_all(&reply).await?;
    }

    debug!("client disconnected");
    Ok(())
}

#[cfg(test)]
#[path = "listener_test.rs"]
mod tests;
