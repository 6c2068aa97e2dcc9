//! BQS Operator - Configuration commands for the buffer queue scheduler
//!
//! Turns configuration buffers (routes, groups, profiling, HCCL protocol,
//! dynamic schedule, HCOM handles, queries) into operations on the routing
//! graph and writes the results back in place.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bqs_operator::{ConfigEventKind, ConfigInfoOperator, LocalCommService, SchedulerContext};
//! use bqs_protocol::config::{ConfigBody, ConfigCmd, ConfigInfo, Endpoint, Route, encode_update};
//! use bqs_routing::{BindRelation, LocalQueueService};
//!
//! let relation = BindRelation::new(Arc::new(LocalQueueService::new()));
//! let mut ctx = SchedulerContext::new(relation, Arc::new(LocalCommService::new()));
//!
//! let routes = vec![Route::new(Endpoint::queue(1), Endpoint::queue(2))];
//! let mut buf = encode_update(&ConfigInfo::new(ConfigCmd::BindRoute, 1), &ConfigBody::Routes(routes));
//! ConfigInfoOperator::new(&mut ctx, 0)
//!     .handle(ConfigEventKind::UpdateConfig, &mut buf)
//!     .unwrap();
//! assert_eq!(ctx.relation.count_binds(0), 1);
//! ```

pub mod comm_channel;
pub mod context;
pub mod convert;
pub mod hccl;
mod hcom;
mod operator;
pub mod profile;
mod query;
pub mod schedule;

pub use comm_channel::CommChannelManager;
pub use context::SchedulerContext;
pub use hccl::{CollectiveCommService, HcclProtocol, LocalCommService, MemoryRegion};
pub use operator::{ConfigEventKind, ConfigInfoOperator, ConfigPhase, UpdateCfgInfo};
pub use profile::{ProfileManager, ProfileSnapshot, ProfilingMode};
pub use query::ROUTE_STATUS_ACTIVE;
pub use schedule::{DynamicSchedManager, RootModelInfo, SchedQueue, SchedResponse, ScheduleConfig};

/// Most routes a single bind/unbind command may carry
pub const MAX_ROUTES_NUM: usize = 8000;
