//! Wire front controller
//!
//! `BqsServer` answers client `Message` frames. BIND and UNBIND batches are
//! applied by the graph worker with one result per item and the domain is
//! re-ordered afterwards. GET_BIND reads one endpoint's relations;
//! GET_ALL_BIND pages through a cached snapshot of every relation.
//!
//! # Replies
//!
//! | Request      | Reply body                                        |
//! |--------------|---------------------------------------------------|
//! | BIND         | `Responses` (one code per item)                   |
//! | UNBIND       | `Responses` (one code per query)                  |
//! | GET_BIND     | `BindQueues`, or `Responses([code])` on failure   |
//! | GET_ALL_BIND | `Paged` with `total` and at most `limit` items    |
//! | other        | `Responses([code])`                               |
//!
//! A frame that cannot be decoded is answered with an empty `Unuse` message.

use std::sync::Arc;

use bqs_operator::SchedulerContext;
use bqs_protocol::{
    BindQueueItem, Body, BqsStatus, Bytes, KeyType, Message, MsgType, PagedMsg, QueryItem,
    StatusResult, status_code,
};
use bqs_routing::{BindRelation, EntityInfo};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::metrics::ServerMetrics;
use crate::worker::WorkerHandle;

/// Domain served by the wire front end
const WIRE_DOMAIN: usize = 0;

/// Snapshot reused across GET_ALL_BIND pages
#[derive(Debug, Default)]
struct PagedCache {
    items: Vec<BindQueueItem>,
    last_offset: u32,
}

impl PagedCache {
    fn needs_refresh(&self, offset: u32) -> bool {
        offset == 0 || offset < self.last_offset || self.items.is_empty()
    }
}

/// Front controller for client messages
pub struct BqsServer {
    worker: WorkerHandle,
    metrics: Arc<ServerMetrics>,
    cache: Mutex<PagedCache>,
}

impl BqsServer {
    pub fn new(worker: WorkerHandle) -> Self {
        let metrics = Arc::clone(worker.metrics());
        Self {
            worker,
            metrics,
            cache: Mutex::new(PagedCache::default()),
        }
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Decode a frame, handle it and encode the reply
    ///
    /// Returns `None` only if the reply itself cannot be encoded.
    pub async fn handle_frame(&self, frame: Bytes) -> Option<Bytes> {
        let reply = match Message::decode(frame) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                warn!(error = %e, status = ?e.status(), "undecodable client frame");
                Message::new(MsgType::Unuse, Body::Empty)
            }
        };
        match reply.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, msg_type = ?reply.msg_type, "reply could not be encoded");
                None
            }
        }
    }

    /// Handle one decoded message
    pub async fn handle_message(&self, message: Message) -> Message {
        let msg_type = message.msg_type;
        match (msg_type, message.body) {
            (MsgType::Bind, Body::BindQueues(items)) => {
                self.metrics.record_bind();
                let results = self.bind(items).await;
                Message::new(msg_type, Body::Responses(results))
            }
            (MsgType::Unbind, Body::Queries(queries)) => {
                self.metrics.record_unbind();
                let results = self.unbind(queries).await;
                Message::new(msg_type, Body::Responses(results))
            }
            (MsgType::GetBind, Body::Query(query)) => {
                self.metrics.record_get_bind();
                match self.get_bind(query).await {
                    Ok(items) => Message::new(msg_type, Body::BindQueues(items)),
                    Err(status) => Message::new(msg_type, Body::Responses(vec![status.code()])),
                }
            }
            (MsgType::GetAllBind, Body::Paged(paged)) => {
                self.metrics.record_get_all_bind();
                match self.get_all_bind(paged.offset, paged.limit).await {
                    Ok(page) => Message::new(msg_type, Body::Paged(page)),
                    Err(status) => Message::new(msg_type, Body::Responses(vec![status.code()])),
                }
            }
            (msg_type, body) => {
                warn!(?msg_type, ?body, "message type and body do not match");
                self.metrics.record_rejected();
                Message::new(msg_type, Body::Responses(vec![BqsStatus::ParamInvalid.code()]))
            }
        }
    }

    /// Bind every pair; one status code per item
    pub async fn bind(&self, items: Vec<BindQueueItem>) -> Vec<i32> {
        let count = items.len();
        let result = self
            .worker
            .call(move |ctx| {
                let results: Vec<i32> = items.iter().map(|item| status_code(&bind_item(ctx, item))).collect();
                ctx.relation.order(WIRE_DOMAIN);
                results
            })
            .await;
        let results = result.unwrap_or_else(|status| vec![status.code(); count]);
        info!(
            count,
            succeeded = results.iter().filter(|code| **code == 0).count(),
            "bind batch processed"
        );
        results
    }

    /// Unbind by key type; one status code per query
    pub async fn unbind(&self, queries: Vec<QueryItem>) -> Vec<i32> {
        let count = queries.len();
        let result = self
            .worker
            .call(move |ctx| {
                let device_id = ctx.device_id();
                let results: Vec<i32> = queries
                    .iter()
                    .map(|query| status_code(&unbind_query(&mut ctx.relation, device_id, query)))
                    .collect();
                ctx.relation.order(WIRE_DOMAIN);
                results
            })
            .await;
        let results = result.unwrap_or_else(|status| vec![status.code(); count]);
        info!(
            count,
            succeeded = results.iter().filter(|code| **code == 0).count(),
            "unbind batch processed"
        );
        results
    }

    /// Relations of one endpoint, live first, then abnormal
    pub async fn get_bind(&self, query: QueryItem) -> StatusResult<Vec<BindQueueItem>> {
        let by_src = match query.key_type {
            KeyType::Src => true,
            KeyType::Dst => false,
            key_type => {
                warn!(?key_type, "get bind supports src or dst keys only");
                return Err(BqsStatus::ParamInvalid);
            }
        };
        let items = self
            .worker
            .call(move |ctx| endpoint_relations(ctx, &query.item, by_src))
            .await?;
        debug!(?query, found = items.len(), "get bind processed");
        Ok(items)
    }

    /// One page of every relation
    ///
    /// The snapshot is rebuilt when the offset is 0, moves backwards or the
    /// cache is empty; later pages reuse it.
    pub async fn get_all_bind(&self, offset: u32, limit: u32) -> StatusResult<PagedMsg> {
        let refresh = self.cache.lock().needs_refresh(offset);
        if refresh {
            let items = self.worker.call(|ctx| snapshot(&ctx.relation)).await?;
            debug!(total = items.len(), "relation snapshot refreshed");
            self.cache.lock().items = items;
        }

        let mut cache = self.cache.lock();
        cache.last_offset = offset;
        let total = cache.items.len();
        let start = (offset as usize).min(total);
        let end = start.saturating_add(limit as usize).min(total);
        Ok(PagedMsg {
            offset,
            limit,
            total: u32::try_from(total).map_err(|_| BqsStatus::InnerError)?,
            items: cache.items[start..end].to_vec(),
        })
    }
}

impl std::fmt::Debug for BqsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BqsServer")
            .field("worker", &self.worker)
            .field("cached", &self.cache.lock().items.len())
            .finish()
    }
}

// ============================================================================
// Worker-side helpers
// ============================================================================

fn bind_item(ctx: &mut SchedulerContext, item: &BindQueueItem) -> StatusResult {
    let device_id = ctx.device_id();
    for queue_id in [item.src_queue_id, item.dst_queue_id] {
        ctx.device()
            .attach_queue(device_id, queue_id)
            .inspect_err(|status| warn!(queue_id, ?status, "attach queue failed"))
            .map_err(|_| BqsStatus::DriverError)?;
    }
    let src = EntityInfo::queue(item.src_queue_id, device_id);
    let dst = EntityInfo::queue(item.dst_queue_id, device_id);
    ctx.relation.bind(&src, &dst, WIRE_DOMAIN)
}

fn unbind_query(relation: &mut BindRelation, device_id: u32, query: &QueryItem) -> StatusResult {
    let src = EntityInfo::queue(query.item.src_queue_id, device_id);
    let dst = EntityInfo::queue(query.item.dst_queue_id, device_id);
    match query.key_type {
        KeyType::Src => relation.unbind_by_src(&src, WIRE_DOMAIN).map(|removed| {
            debug!(src = %src, removed, "unbound by src");
        }),
        KeyType::Dst => relation.unbind_by_dst(&dst, WIRE_DOMAIN).map(|removed| {
            debug!(dst = %dst, removed, "unbound by dst");
        }),
        KeyType::SrcAndDst => relation.unbind(&src, &dst, WIRE_DOMAIN),
        KeyType::SrcOrDst => {
            warn!(?query, "unbind does not support src-or-dst keys");
            Err(BqsStatus::InnerError)
        }
    }
}

fn endpoint_relations(ctx: &SchedulerContext, item: &BindQueueItem, by_src: bool) -> Vec<BindQueueItem> {
    let relation = &ctx.relation;
    let device_id = ctx.device_id();
    if by_src {
        let src = EntityInfo::queue(item.src_queue_id, device_id);
        relation
            .dsts_of(&src, WIRE_DOMAIN)
            .into_iter()
            .chain(relation.abnormal_dsts_of(&src, WIRE_DOMAIN))
            .map(|dst| BindQueueItem::new(src.id, dst.id))
            .collect()
    } else {
        let dst = EntityInfo::queue(item.dst_queue_id, device_id);
        relation
            .srcs_of(&dst, WIRE_DOMAIN)
            .into_iter()
            .chain(relation.abnormal_srcs_of(&dst, WIRE_DOMAIN))
            .map(|src| BindQueueItem::new(src.id, dst.id))
            .collect()
    }
}

fn snapshot(relation: &BindRelation) -> Vec<BindQueueItem> {
    relation
        .edges(WIRE_DOMAIN)
        .into_iter()
        .chain(relation.abnormal_edges(WIRE_DOMAIN))
        .map(|(src, dst)| BindQueueItem::new(src.id, dst.id))
        .collect()
}

#[cfg(test)]
#[path = "bqs_test.rs"]
mod tests;
