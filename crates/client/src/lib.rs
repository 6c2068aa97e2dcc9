//! BQS Client - Request/response stub for the queue scheduler socket
//!
//! Marshals bind, unbind and listing requests into `Message` frames and
//! unmarshals the replies. Batches are paginated on the client side.
//!
//! # Example
//!
//! ```ignore
//! use bqs_client::BqsClient;
//! use bqs_protocol::BindQueueItem;
//!
//! let mut client = BqsClient::connect("/tmp/bqs.sock").await?;
//! let batch = client.bind_queue(&[BindQueueItem::new(5, 6)]).await?;
//! assert!(batch.all_ok());
//! ```

mod client;
mod config;
mod error;

pub use client::{BatchResult, BqsClient};
pub use config::{
    ClientConfig, DEFAULT_BIND_PAGE_SIZE, DEFAULT_LIST_PAGE_SIZE, DEFAULT_SOCKET_PATH,
};
pub use error::{ClientError, Result};
