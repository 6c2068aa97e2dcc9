//! BQS Server - Event dispatch and client front end for the queue scheduler
//!
//! Everything that touches the routing graph goes through one graph worker.
//! Two front ends feed it:
//!
//! - `RouterServer` - device and host scheduler events (bind-init, relation
//!   payloads, configuration commands, link status)
//! - `BqsServer` - client `Message` frames, served over a Unix socket by
//!   `BqsListener`
//!
//! # Architecture
//!
//! ```text
//! events ──► RouterServer ──┐
//!                           ├──► WorkerHandle ──► GraphWorker ──► SchedulerContext
//! socket ──► BqsListener ───┤                                      (BindRelation,
//!              BqsServer ───┘                                       ConfigInfoOperator)
//! ```
//!
//! `Scheduler` starts and stops the whole set.

pub mod bqs;
pub mod config_client;
mod error;
pub mod event;
pub mod listener;
mod metrics;
pub mod router;
pub mod scheduler;
pub mod worker;

pub use bqs::BqsServer;
pub use config_client::{ConfigClient, UpdateReply};
pub use error::{Result, ServerError};
pub use event::{DeployMode, QsEvent, QsResponse, SubEvent};
pub use listener::{BqsListener, BqsListenerConfig, DEFAULT_SOCKET_PATH};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use router::{Delivered, EventSender, RouterConfig, RouterServer, ThreadStatus};
pub use scheduler::{Scheduler, SchedulerParams};
pub use worker::{GraphWorker, WorkerHandle};
