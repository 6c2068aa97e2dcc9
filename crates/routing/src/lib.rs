//! BQS Routing - Bind-relation graph engine
//!
//! Holds the routing graph of the buffer queue scheduler: which endpoint
//! feeds which, in which resource domain, and which edges are currently
//! abnormal.
//!
//! # Design
//!
//! - Endpoints are interned once in an `EntityArena`; relations and groups
//!   store `EntityId`s, never copies.
//! - Each resource domain keeps forward and reverse adjacency maps that are
//!   always mirrors of each other, plus abnormal shadow maps disjoint from
//!   the live ones.
//! - Device-level registration goes through the `DeviceQueueService` trait,
//!   so the graph can run against a real driver or `LocalQueueService`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bqs_routing::{BindRelation, EntityInfo, LocalQueueService};
//!
//! let mut relation = BindRelation::new(Arc::new(LocalQueueService::new()));
//! let (a, b) = (EntityInfo::queue(1, 0), EntityInfo::queue(2, 0));
//! relation.bind(&a, &b, 0).unwrap();
//! relation.order(0);
//! assert_eq!(relation.dsts_of(&a, 0), vec![&b]);
//! ```

mod abnormal;
mod arena;
mod device;
mod domain;
mod entity;
mod group;
mod relation;

pub use arena::{EntityArena, EntityId};
pub use device::{DeviceQueueService, LocalQueueService, QueueAuth, QueueEvent};
pub use domain::{RelationStats, Role};
pub use entity::{ChannelInfo, EntityInfo, EntityKey, EntityType, GroupPolicy, QueueType};
pub use group::{GroupIdAllocator, MAX_GROUP_MEMBERS};
pub use relation::{BindRelation, DOMAIN_NUM, MAX_RELATION_NUM};
