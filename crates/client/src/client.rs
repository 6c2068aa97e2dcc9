//! BQS client - request/response stub over the scheduler socket
//!
//! One request is in flight at a time. Large batches are split into pages
//! before they hit the wire, so the server never sees more than
//! `bind_page_size` pairs or `list_page_size` listing items per frame.

use std::io;
use std::path::Path;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use bqs_protocol::message::{HEAD_SIZE, read_head};
use bqs_protocol::{
    BindQueueItem, Body, BqsStatus, Message, MsgType, PagedMsg, ProtocolError, QueryItem,
    STATUS_OK, status_from_code,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Outcome of a paged bind or unbind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Items whose code is OK
    pub succeeded: usize,

    /// One status code per submitted item, in order
    pub results: Vec<i32>,
}

impl BatchResult {
    fn extend(&mut self, codes: Vec<i32>) {
        self.succeeded += codes.iter().filter(|&&code| code == STATUS_OK).count();
        self.results.extend(codes);
    }

    /// All items succeeded
    pub fn all_ok(&self) -> bool {
        self.succeeded == self.results.len()
    }
}

/// Which connect failure bucket an error falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectRetry {
    NotStarted,
    WouldBlock,
    TimedOut,
}

impl ConnectRetry {
    fn classify(err: &io::Error) -> Option<Self> {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => Some(Self::NotStarted),
            io::ErrorKind::WouldBlock => Some(Self::WouldBlock),
            io::ErrorKind::TimedOut => Some(Self::TimedOut),
            _ => None,
        }
    }

    fn budget(self, config: &ClientConfig) -> u32 {
        match self {
            Self::NotStarted => config.not_started_retries,
            Self::WouldBlock => config.would_block_retries,
            Self::TimedOut => config.timeout_retries,
        }
    }
}

/// Client for the scheduler socket
pub struct BqsClient {
    stream: UnixStream,
    read_buf: BytesMut,
    config: ClientConfig,
}

impl BqsClient {
    /// Connect with default settings to the given socket path
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::connect_with(ClientConfig::default().with_socket_path(path)).await
    }

    /// Connect, retrying while the server is not reachable yet
    pub async fn connect_with(config: ClientConfig) -> Result<Self> {
        let path = config.socket_path.clone();
        let mut attempts = 0u32;
        let mut not_started = 0u32;
        let mut would_block = 0u32;
        let mut timed_out = 0u32;

        loop {
            attempts += 1;
            let err = match UnixStream::connect(&path).await {
                Ok(stream) => {
                    debug!(path = %path.display(), attempts, "connected to queue scheduler");
                    return Ok(Self {
                        stream,
                        read_buf: BytesMut::with_capacity(64 * 1024),
                        config,
                    });
                }
                Err(e) => e,
            };

            let Some(kind) = ConnectRetry::classify(&err) else {
                return Err(ClientError::Connect {
                    path,
                    attempts,
                    source: err,
                });
            };
            let tries = match kind {
                ConnectRetry::NotStarted => &mut not_started,
                ConnectRetry::WouldBlock => &mut would_block,
                ConnectRetry::TimedOut => &mut timed_out,
            };
            *tries += 1;
            if *tries >= kind.budget(&config) {
                warn!(path = %path.display(), attempts, ?kind, "giving up connecting to queue scheduler");
                return Err(ClientError::Connect {
                    path,
                    attempts,
                    source: err,
                });
            }
            tokio::time::sleep(config.retry_delay).await;
        }
    }

    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Bind pairs, one request per page
    pub async fn bind_queue(&mut self, items: &[BindQueueItem]) -> Result<BatchResult> {
        if items.is_empty() {
            return Err(BqsStatus::ParamInvalid.into());
        }
        let mut batch = BatchResult::default();
        for page in items.chunks(self.config.bind_page_size.max(1)) {
            let reply = self.request(Message::bind(page.to_vec())).await?;
            batch.extend(Self::responses(MsgType::Bind, reply, page.len())?);
        }
        debug!(total = items.len(), succeeded = batch.succeeded, "bind_queue done");
        Ok(batch)
    }

    /// Unbind by keyed queries, one request per page
    pub async fn unbind_queue(&mut self, queries: &[QueryItem]) -> Result<BatchResult> {
        if queries.is_empty() {
            return Err(BqsStatus::ParamInvalid.into());
        }
        let mut batch = BatchResult::default();
        for page in queries.chunks(self.config.bind_page_size.max(1)) {
            let reply = self.request(Message::unbind(page.to_vec())).await?;
            batch.extend(Self::responses(MsgType::Unbind, reply, page.len())?);
        }
        debug!(total = queries.len(), succeeded = batch.succeeded, "unbind_queue done");
        Ok(batch)
    }

    /// Pairs matching a SRC or DST query
    pub async fn get_bind_queue(&mut self, query: QueryItem) -> Result<Vec<BindQueueItem>> {
        match self.request(Message::get_bind(query)).await? {
            Message {
                body: Body::BindQueues(items),
                ..
            } => Ok(items),
            reply => Err(Self::failure(MsgType::GetBind, reply)),
        }
    }

    /// One page of the bind listing
    pub async fn get_paged_bind_queue(&mut self, offset: u32, limit: u32) -> Result<PagedMsg> {
        match self.request(Message::get_all_bind(offset, limit)).await? {
            Message {
                body: Body::Paged(paged),
                ..
            } => Ok(paged),
            reply => Err(Self::failure(MsgType::GetAllBind, reply)),
        }
    }

    /// Every bound pair, fetched page by page
    ///
    /// Stops early without error if the offset would overflow.
    pub async fn get_all_bind_queue(&mut self) -> Result<Vec<BindQueueItem>> {
        let limit = self.config.list_page_size.max(1);
        let mut all = Vec::new();
        let mut offset = 0u32;

        loop {
            let page = self.get_paged_bind_queue(offset, limit).await?;
            let fetched = page.items.len();
            all.extend(page.items);
            if fetched == 0 {
                break;
            }
            let Some(next) = u32::try_from(fetched)
                .ok()
                .and_then(|n| offset.checked_add(n))
            else {
                warn!(offset, fetched, "bind listing offset overflow, stopping");
                break;
            };
            offset = next;
            if offset >= page.total {
                break;
            }
        }
        Ok(all)
    }

    /// Send one message and read its reply
    pub async fn request(&mut self, msg: Message) -> Result<Message> {
        let request_type = msg.msg_type;
        let frame = msg.encode()?;
        self.stream.write_all(&frame).await?;

        let reply = self.read_reply().await?;
        if reply.msg_type == MsgType::Unuse {
            return Err(BqsStatus::EasyCommError.into());
        }
        if reply.msg_type != request_type {
            return Err(ClientError::unexpected_reply(request_type, reply.msg_type));
        }
        Ok(reply)
    }

    async fn read_reply(&mut self) -> Result<Message> {
        let mut head = [0u8; HEAD_SIZE];
        match self.stream.read_exact(&mut head).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ClientError::Closed),
            Err(e) => return Err(e.into()),
        }
        let len = read_head(&head).ok_or_else(|| {
            ProtocolError::malformed(format!("invalid reply length {}", u32::from_be_bytes(head)))
        })?;

        self.read_buf.clear();
        self.read_buf.extend_from_slice(&head);
        self.read_buf.resize(len, 0);
        match self.stream.read_exact(&mut self.read_buf[HEAD_SIZE..]).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(ClientError::Closed),
            Err(e) => return Err(e.into()),
        }

        Ok(Message::decode(self.read_buf.split().freeze())?)
    }

    fn responses(request: MsgType, reply: Message, expected: usize) -> Result<Vec<i32>> {
        match reply.body {
            Body::Responses(codes) if codes.len() == expected => Ok(codes),
            Body::Responses(codes) if codes.len() == 1 => {
                // Whole-request failure carries a single code
                status_from_code(codes[0])?;
                Err(ClientError::ResultCount {
                    expected,
                    actual: 1,
                })
            }
            Body::Responses(codes) => Err(ClientError::ResultCount {
                expected,
                actual: codes.len(),
            }),
            body => Err(ClientError::unexpected_reply(request, body)),
        }
    }

    fn failure(request: MsgType, reply: Message) -> ClientError {
        match reply.body {
            Body::Responses(codes) if codes.len() == 1 => match status_from_code(codes[0]) {
                Err(status) => status.into(),
                Ok(()) => ClientError::unexpected_reply(request, Body::Responses(codes)),
            },
            body => ClientError::unexpected_reply(request, body),
        }
    }
}

impl std::fmt::Debug for BqsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BqsClient")
            .field("socket_path", &self.config.socket_path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
