//! Router server
//!
//! Entry point for every scheduler event. A background management task
//! prepares the router, then receives events one at a time and dispatches
//! them by sub-event:
//!
//! - bind-init records the client and creates its pipeline queue
//! - relation events (bind, unbind, detailed query) are pre-checked here and
//!   applied by the graph worker, which writes per-route results back into
//!   the payload
//! - count queries, configuration commands and link-status checks also run
//!   on the graph worker
//!
//! # Lifecycle
//!
//! ```text
//! NotInit ──init()──► InitSuccess ──notify_init_success()──► ready
//!    ▲          └───► InitFail
//!    └────────────────── destroy() ◄──────────────────────────┘
//! ```
//!
//! Events handled before `notify_init_success` are answered with `NotInit`.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bqs_operator::{ConfigEventKind, ConfigInfoOperator, SchedulerContext};
use bqs_protocol::route::{BIND_INIT_SIZE, ROUTE_QUERY_SIZE, write_query_results, write_route_status};
use bqs_protocol::{
    BindInit, BqsStatus, BytesMut, QueryType, QueueRoute, QueueRouteQuery, RelationEvent,
    RelationStatus, STATUS_OK, StatusResult, status_code,
};
use bqs_routing::{BindRelation, DOMAIN_NUM, DeviceQueueService, EntityInfo, EntityType, QueueAuth};
use crossfire::{AsyncRx, MAsyncTx};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ServerError};
use crate::event::{
    DeployMode, LINK_NOT_CONNECTED, MAX_QUEUE_ID_NUM, Operation, PIPELINE_QUEUE_NAME, QsEvent,
    QsResponse, RelationOp, SubEvent, is_aicpu,
};
use crate::metrics::ServerMetrics;
use crate::worker::WorkerHandle;

/// Default pipeline queue depth
pub const DEFAULT_PIPELINE_DEPTH: u32 = 2;

/// Default event channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default bound on the management task reaching a terminal state
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Route status written by bind: applied / not applied
const BIND_APPLIED: i32 = 1;
const BIND_NOT_APPLIED: i32 = 0;

/// Route status written by unbind: applied / not applied
const UNBIND_APPLIED: i32 = 0;
const UNBIND_NOT_APPLIED: i32 = 1;

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Device the scheduler serves
    pub device_id: u32,

    pub deploy_mode: DeployMode,

    /// Whether the secondary resource domain is active
    pub numa: bool,

    /// Devices per resource domain, required when `numa` is set
    pub dev_ids: Vec<u32>,

    /// Depth of each client's pipeline queue
    pub pipeline_depth: u32,

    pub init_timeout: Duration,

    pub event_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            deploy_mode: DeployMode::default(),
            numa: false,
            dev_ids: Vec::new(),
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// State of the management task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadStatus {
    #[default]
    NotInit,
    InitSuccess,
    InitFail,
}

/// Client recorded by bind-init
#[derive(Debug, Clone, Copy)]
struct PipelineState {
    queue_id: Option<u32>,
    src_pid: i32,
    src_version: u32,
    src_group_id: i32,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            queue_id: None,
            src_pid: -1,
            src_version: 0,
            src_group_id: -1,
        }
    }
}

/// Result of delivering an event through `EventSender`
#[derive(Debug)]
pub struct Delivered {
    /// `None` when the event was deliberately ignored
    pub response: Option<QsResponse>,
    /// Payload with results written back; `None` if it was not returned
    pub payload: Option<BytesMut>,
}

type Envelope = (QsEvent, oneshot::Sender<Delivered>);

/// Submission side of the router event loop
#[derive(Clone)]
pub struct EventSender {
    sender: MAsyncTx<Envelope>,
}

impl EventSender {
    /// Deliver an event and wait for it to be handled
    pub async fn submit(&self, event: QsEvent) -> Result<Delivered> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send((event, reply_tx))
            .await
            .map_err(|_| ServerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServerError::ChannelClosed)
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender").finish_non_exhaustive()
    }
}

struct Lifecycle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    sender: EventSender,
}

/// Outcome of one event before it becomes a `QsResponse`
#[derive(Debug, Clone, Copy)]
struct Reply {
    sub_event_id: u32,
    ret_code: i32,
    ret_value: u32,
    sync_event_head: u64,
}

impl Reply {
    fn new(sub_event_id: u32, ret_code: i32) -> Self {
        Self {
            sub_event_id,
            ret_code,
            ret_value: 0,
            sync_event_head: 0,
        }
    }

    fn status<T>(sub_event_id: u32, result: &StatusResult<T>) -> Self {
        Self::new(sub_event_id, status_code(result))
    }

    fn with_value(mut self, ret_value: u32) -> Self {
        self.ret_value = ret_value;
        self
    }

    fn with_sync_head(mut self, sync_event_head: u64) -> Self {
        self.sync_event_head = sync_event_head;
        self
    }

    fn into_response(self, aicpu: bool) -> QsResponse {
        let mut response = QsResponse::new(self.sub_event_id, self.ret_code, self.ret_value);
        if aicpu {
            response.sync_event_head = self.sync_event_head;
        }
        response
    }
}

/// Event dispatcher of the scheduler
pub struct RouterServer {
    config: RouterConfig,
    device: Arc<dyn DeviceQueueService>,
    worker: WorkerHandle,
    metrics: Arc<ServerMetrics>,
    pipeline: Mutex<PipelineState>,
    status: Mutex<ThreadStatus>,
    lifecycle: Mutex<Option<Lifecycle>>,
    ready: AtomicBool,
    calls_hccl: AtomicBool,
}

impl RouterServer {
    pub fn new(config: RouterConfig, device: Arc<dyn DeviceQueueService>, worker: WorkerHandle) -> Self {
        let metrics = Arc::clone(worker.metrics());
        Self {
            config,
            device,
            worker,
            metrics,
            pipeline: Mutex::new(PipelineState::default()),
            status: Mutex::new(ThreadStatus::NotInit),
            lifecycle: Mutex::new(None),
            ready: AtomicBool::new(false),
            calls_hccl: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    #[inline]
    pub fn status(&self) -> ThreadStatus {
        *self.status.lock()
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether an HCOM handle has been created through this router
    #[inline]
    pub fn calls_hccl(&self) -> bool {
        self.calls_hccl.load(Ordering::Relaxed)
    }

    /// Pipeline queue created by bind-init, if any
    pub fn pipeline_queue_id(&self) -> Option<u32> {
        self.pipeline.lock().queue_id
    }

    /// Pid recorded by bind-init, if any
    pub fn client_pid(&self) -> Option<i32> {
        let state = self.pipeline.lock();
        (state.src_pid != -1).then_some(state.src_pid)
    }

    /// Event group and major version recorded by bind-init
    pub fn client_group(&self) -> (i32, u32) {
        let state = self.pipeline.lock();
        (state.src_group_id, state.src_version)
    }

    /// Start the management task and wait until it is ready or failed
    ///
    /// Calling `init` again while running returns the existing sender.
    pub async fn init(self: &Arc<Self>) -> Result<EventSender> {
        let (sender, ready_rx) = {
            let mut lifecycle = self.lifecycle.lock();
            if let Some(existing) = lifecycle.as_ref() {
                warn!("router already initialized");
                return Ok(existing.sender.clone());
            }

            let (tx, rx) = crossfire::mpsc::bounded_async::<Envelope>(self.config.event_capacity.max(1));
            let cancel = CancellationToken::new();
            let (ready_tx, ready_rx) = oneshot::channel();
            let join = tokio::spawn(Arc::clone(self).manage_events(rx, cancel.clone(), ready_tx));
            let sender = EventSender { sender: tx };
            *lifecycle = Some(Lifecycle {
                cancel,
                join,
                sender: sender.clone(),
            });
            (sender, ready_rx)
        };

        let failure = match tokio::time::timeout(self.config.init_timeout, ready_rx).await {
            Ok(Ok(ThreadStatus::InitSuccess)) => {
                info!(device_id = self.config.device_id, "router init success");
                return Ok(sender);
            }
            Ok(Ok(status)) => {
                error!(?status, "router management task failed to start");
                BqsStatus::InnerError
            }
            Ok(Err(_)) => {
                error!("router management task exited before reporting");
                BqsStatus::InnerError
            }
            Err(_) => {
                error!(timeout = ?self.config.init_timeout, "router management task did not report in time");
                BqsStatus::Timeout
            }
        };

        if let Some(lifecycle) = self.lifecycle.lock().take() {
            lifecycle.cancel.cancel();
        }
        Err(ServerError::InitFailed(failure))
    }

    /// Allow events to be handled
    pub fn notify_init_success(&self) {
        info!("scheduler finished initializing, router ready to handle messages");
        self.ready.store(true, Ordering::Release);
    }

    /// Stop the management task and return to `NotInit`
    pub async fn destroy(&self) {
        let Some(lifecycle) = self.lifecycle.lock().take() else {
            return;
        };
        info!("router destroying");

        lifecycle.cancel.cancel();
        if let Err(e) = lifecycle.join.await {
            warn!(error = %e, "router management task ended abnormally");
        }

        self.ready.store(false, Ordering::Release);
        *self.status.lock() = ThreadStatus::NotInit;
        *self.pipeline.lock() = PipelineState::default();
        info!("router destroyed");
    }

    async fn manage_events(
        self: Arc<Self>,
        receiver: AsyncRx<Envelope>,
        cancel: CancellationToken,
        ready: oneshot::Sender<ThreadStatus>,
    ) {
        info!(
            device_id = self.config.device_id,
            deploy_mode = %self.config.deploy_mode,
            numa = self.config.numa,
            "router management task starting"
        );

        let status = self.prepare();
        *self.status.lock() = status;
        let _ = ready.send(status);
        if status != ThreadStatus::InitSuccess {
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = receiver.recv() => match envelope {
                    Ok((mut event, reply)) => {
                        let response = self.handle_bqs_msg(&mut event).await;
                        let delivered = Delivered {
                            response,
                            payload: event.payload.take(),
                        };
                        if reply.send(delivered).is_err() {
                            debug!(sub_event_id = event.sub_event_id, "event submitter went away");
                        }
                    }
                    Err(_) => break,
                }
            }
        }

        self.metrics.log_summary("router");
        info!("router management task stopped");
    }

    fn prepare(&self) -> ThreadStatus {
        if self.config.numa && self.config.dev_ids.len() < DOMAIN_NUM {
            error!(dev_ids = ?self.config.dev_ids, "numa requires one device per resource domain");
            return ThreadStatus::InitFail;
        }
        if self.config.pipeline_depth == 0 {
            error!("pipeline queue depth must be positive");
            return ThreadStatus::InitFail;
        }
        info!("router management task ready");
        ThreadStatus::InitSuccess
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Handle one event
    ///
    /// Returns `None` for events that are deliberately ignored (AICPU events
    /// in thread mode). Payload results are written back into
    /// `event.payload`; the payload is gone if the graph worker timed out.
    pub async fn handle_bqs_msg(&self, event: &mut QsEvent) -> Option<QsResponse> {
        let sub_event_id = event.sub_event_id;
        let aicpu = is_aicpu(sub_event_id);

        if !self.is_ready() {
            warn!(sub_event_id, "router is not ready to handle messages");
            self.metrics.record_rejected();
            return Some(Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::NotInit)).into_response(aicpu));
        }

        let Some(operation) = SubEvent::try_from(sub_event_id).ok().and_then(SubEvent::operation) else {
            info!(sub_event_id, "unsupported sub-event");
            self.metrics.record_rejected();
            return Some(Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::ParamInvalid)).into_response(aicpu));
        };

        if aicpu && self.config.deploy_mode == DeployMode::MultiThread {
            error!(sub_event_id, "thread mode does not support events from aicpu");
            self.metrics.record_rejected();
            return None;
        }

        let reply = match operation {
            Operation::BindInit => self.process_bind_init(sub_event_id, &event.msg),
            Operation::QueryNum => self.process_query_num(sub_event_id, &event.msg).await,
            Operation::RelationProcess => self.process_relation(sub_event_id, &mut event.payload).await,
            Operation::Config(kind) => self.process_config(sub_event_id, kind, &mut event.payload).await,
            Operation::QueryLinkStatus => self.process_link_status(sub_event_id).await,
            Operation::BindHostPid => {
                info!(sub_event_id, "bind host pid is not supported");
                Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::ParamInvalid))
            }
        };

        debug!(
            sub_event_id = reply.sub_event_id,
            ret_code = reply.ret_code,
            ret_value = reply.ret_value,
            aicpu,
            "event handled"
        );
        Some(reply.into_response(aicpu))
    }

    // ========================================================================
    // Bind init
    // ========================================================================

    fn process_bind_init(&self, sub_event_id: u32, msg: &[u8]) -> Reply {
        let (result, sync_event_head) = self.bind_init(msg);
        let ret_value = match (&result, self.pipeline_queue_id()) {
            (Ok(()), Some(queue_id)) => queue_id,
            _ => MAX_QUEUE_ID_NUM,
        };
        Reply::status(sub_event_id, &result)
            .with_value(ret_value)
            .with_sync_head(sync_event_head)
    }

    fn bind_init(&self, msg: &[u8]) -> (StatusResult, u64) {
        if msg.len() != BIND_INIT_SIZE {
            error!(len = msg.len(), "bind init message invalid");
            return (Err(BqsStatus::ParamInvalid), 0);
        }
        let init = match BindInit::parse(msg) {
            Ok(init) => init,
            Err(e) => return (Err(e.status()), 0),
        };

        let mut state = self.pipeline.lock();
        if let Some(queue_id) = state.queue_id
            && state.src_pid != -1
        {
            info!(queue_id, "pipeline queue already exists");
            return (Ok(()), init.sync_event_head);
        }

        state.src_pid = init.pid;
        state.src_version = init.major_version;
        state.src_group_id = init.group_id as i32;
        info!(
            pid = init.pid,
            group_id = init.group_id,
            version = init.major_version,
            "bind init received"
        );

        let result = self.create_pipeline_queue(init.pid).map(|queue_id| {
            state.queue_id = Some(queue_id);
        });
        (result, init.sync_event_head)
    }

    fn create_pipeline_queue(&self, pid: i32) -> StatusResult<u32> {
        let device_id = self.config.device_id;
        let name = format!("{PIPELINE_QUEUE_NAME}{pid}");
        let queue_id = self
            .device
            .create_queue(device_id, &name, self.config.pipeline_depth)
            .inspect_err(|status| error!(device_id, %name, ?status, "create pipeline queue failed"))?;
        self.device
            .attach_queue(device_id, queue_id)
            .inspect_err(|status| error!(queue_id, ?status, "attach pipeline queue failed"))?;
        if self.config.deploy_mode != DeployMode::MultiThread {
            self.device
                .grant_queue(device_id, queue_id, pid, QueueAuth::READ_WRITE)
                .inspect_err(|status| error!(queue_id, pid, ?status, "grant pipeline queue failed"))?;
        }
        info!(queue_id, pid, "pipeline queue created");
        Ok(queue_id)
    }

    // ========================================================================
    // Relation events
    // ========================================================================

    async fn process_query_num(&self, sub_event_id: u32, msg: &[u8]) -> Reply {
        self.metrics.record_get_bind();
        if msg.len() != ROUTE_QUERY_SIZE {
            error!(sub_event_id, len = msg.len(), "query message invalid");
            return Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::ParamInvalid));
        }
        let query = match QueueRouteQuery::parse(msg) {
            Ok(query) => query,
            Err(e) => return Reply::status(sub_event_id, &Err::<(), _>(e.status())),
        };

        let result = self
            .worker
            .call(move |ctx| query_relations(ctx, &query).len())
            .await;
        let reply = match result {
            Ok(count) => Reply::new(sub_event_id, STATUS_OK).with_value(u32::try_from(count).unwrap_or(u32::MAX)),
            Err(status) => Reply::new(sub_event_id, status.code()),
        };
        reply.with_sync_head(query.sync_event_head)
    }

    async fn process_relation(&self, sub_event_id: u32, payload: &mut Option<BytesMut>) -> Reply {
        let Some(pipeline_id) = self.pipeline_queue_id() else {
            error!(sub_event_id, "relation event before bind init");
            return Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::DriverError));
        };
        let Some(buf) = payload.take() else {
            error!(queue_id = pipeline_id, "no relation payload in pipeline queue");
            return Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::DriverError));
        };

        let head = match RelationEvent::peek_head(&buf) {
            Ok(head) => head,
            Err(e) => {
                error!(error = %e, "relation payload head unreadable");
                *payload = Some(buf);
                return Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::ParamInvalid));
            }
        };

        // the payload head names the actual operation
        let real_sub_event = head.sub_event_id;
        let op = SubEvent::try_from(real_sub_event)
            .ok()
            .and_then(SubEvent::relation_op);
        let reply = |result: &StatusResult| {
            Reply::status(real_sub_event, result)
                .with_value(pipeline_id)
                .with_sync_head(head.user_data)
        };

        let event = match RelationEvent::parse(&buf, op == Some(RelationOp::Query)) {
            Ok(event) => event,
            Err(e) => {
                error!(sub_event_id = real_sub_event, error = %e, "relation payload invalid");
                *payload = Some(buf);
                return reply(&Err(BqsStatus::ParamInvalid));
            }
        };

        let (buf, result) = match op {
            Some(RelationOp::Bind) => {
                self.metrics.record_bind();
                self.bind_routes(buf, event).await
            }
            Some(RelationOp::Unbind) => {
                self.metrics.record_unbind();
                self.unbind_routes(buf, event).await
            }
            Some(RelationOp::Query) => {
                self.metrics.record_get_bind();
                self.query_routes(buf, event).await
            }
            None => {
                error!(sub_event_id = real_sub_event, "unsupported sub-event in relation payload");
                (Some(buf), Err(BqsStatus::InnerError))
            }
        };
        *payload = buf;
        reply(&result)
    }

    async fn bind_routes(&self, mut buf: BytesMut, event: RelationEvent) -> (Option<BytesMut>, StatusResult) {
        let checks = self.check_routes(&event.routes, true);
        for (index, status) in checks.iter().enumerate() {
            write_route_status(&mut buf, false, index, *status);
        }
        if checks.iter().all(|status| *status != STATUS_OK) {
            return (Some(buf), Err(BqsStatus::QueueAuthError));
        }

        let routes = event.routes;
        self.run_on_worker(buf, move |ctx, buf| apply_binds(ctx, buf, &routes, &checks))
            .await
    }

    async fn unbind_routes(&self, mut buf: BytesMut, event: RelationEvent) -> (Option<BytesMut>, StatusResult) {
        let checks = self.check_routes(&event.routes, false);
        for (index, status) in checks.iter().enumerate() {
            write_route_status(&mut buf, false, index, *status);
        }
        if checks.iter().all(|status| *status != STATUS_OK) {
            return (Some(buf), Err(BqsStatus::QueueAuthError));
        }

        let routes = event.routes;
        self.run_on_worker(buf, move |ctx, buf| apply_unbinds(ctx, buf, &routes, &checks))
            .await
    }

    async fn query_routes(&self, buf: BytesMut, event: RelationEvent) -> (Option<BytesMut>, StatusResult) {
        let Some(query) = event.query else {
            return (Some(buf), Err(BqsStatus::InnerError));
        };
        let capacity = event.head.route_num as usize;

        self.run_on_worker(buf, move |ctx, buf| {
            let results = query_relations(ctx, &query);
            if results.len() != capacity {
                error!(
                    expected = capacity,
                    found = results.len(),
                    "query capacity differs from relation count"
                );
                return Err(BqsStatus::ParamInvalid);
            }
            write_query_results(buf, &results);
            Ok(())
        })
        .await
    }

    /// Event-side validation of each route; returns a status code per route
    fn check_routes(&self, routes: &[QueueRoute], bind: bool) -> Vec<i32> {
        routes
            .iter()
            .map(|route| {
                if route.src_id >= MAX_QUEUE_ID_NUM || route.dst_id >= MAX_QUEUE_ID_NUM {
                    error!(src = route.src_id, dst = route.dst_id, "queue id out of range");
                    return BqsStatus::QueueIdError.code();
                }
                if bind && let Err(status) = self.attach_and_check(route) {
                    error!(
                        src = route.src_id,
                        dst = route.dst_id,
                        ?status,
                        "attach queue and check authority failed"
                    );
                    return BqsStatus::QueueAuthError.code();
                }
                STATUS_OK
            })
            .collect()
    }

    /// Attach both queue endpoints; src needs read and dst write authority
    fn attach_and_check(&self, route: &QueueRoute) -> StatusResult {
        let device_id = self.config.device_id;
        let endpoints = [(route.src_id, route.src_type, true), (route.dst_id, route.dst_type, false)];
        for (queue_id, ty, read) in endpoints {
            if EntityType::from_code(ty) != EntityType::Queue {
                continue;
            }
            self.device.attach_queue(device_id, queue_id)?;
            let auth = self.device.queue_auth(device_id, queue_id)?;
            let granted = if read { auth.read } else { auth.write };
            if !granted {
                return Err(BqsStatus::QueueAuthError);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Config and link status
    // ========================================================================

    async fn process_config(
        &self,
        sub_event_id: u32,
        kind: ConfigEventKind,
        payload: &mut Option<BytesMut>,
    ) -> Reply {
        let (queue_id, version) = {
            let state = self.pipeline.lock();
            (state.queue_id, state.src_version)
        };
        if queue_id.is_none() {
            error!(sub_event_id, "config event before bind init");
            return Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::DriverError));
        }
        let Some(buf) = payload.take() else {
            error!(sub_event_id, "no config payload in pipeline queue");
            return Reply::status(sub_event_id, &Err::<(), _>(BqsStatus::DriverError));
        };

        self.metrics.record_config_event();
        let (buf, result) = self
            .run_on_worker(buf, move |ctx, buf| {
                ConfigInfoOperator::new(ctx, version).handle(kind, buf)
            })
            .await;
        if kind == ConfigEventKind::CreateHcomHandle {
            self.calls_hccl.store(true, Ordering::Relaxed);
        }
        *payload = buf;

        info!(?kind, result = ?result, "config event processed");
        Reply::status(sub_event_id, &result)
    }

    async fn process_link_status(&self, sub_event_id: u32) -> Reply {
        let result = self.worker.call(|ctx| link_connected(ctx)).await;
        let ret_code = match result.and_then(|connected| connected) {
            Ok(true) => STATUS_OK,
            Ok(false) => LINK_NOT_CONNECTED,
            Err(status) => status.code(),
        };
        Reply::new(sub_event_id, ret_code)
    }

    /// Run `f` on the worker with ownership of `buf`
    ///
    /// The buffer comes back with the result unless the worker failed to
    /// answer, in which case the outcome is unknown.
    async fn run_on_worker<F>(&self, buf: BytesMut, f: F) -> (Option<BytesMut>, StatusResult)
    where
        F: FnOnce(&mut SchedulerContext, &mut BytesMut) -> StatusResult + Send + 'static,
    {
        let job = move |ctx: &mut SchedulerContext| {
            let mut buf = buf;
            let result = f(ctx, &mut buf);
            (buf, result)
        };
        match self.worker.call(job).await {
            Ok((buf, result)) => (Some(buf), result),
            Err(status) => {
                warn!(?status, "payload not returned by graph worker");
                (None, Err(status))
            }
        }
    }
}

impl std::fmt::Debug for RouterServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterServer")
            .field("config", &self.config)
            .field("status", &self.status())
            .field("ready", &self.is_ready())
            .field("pipeline_queue_id", &self.pipeline_queue_id())
            .finish()
    }
}

// ============================================================================
// Worker-side helpers
// ============================================================================

fn route_entities(route: &QueueRoute, device_id: u32) -> (EntityInfo, EntityInfo) {
    (
        EntityInfo::new(route.src_id, device_id, EntityType::from_code(route.src_type)),
        EntityInfo::new(route.dst_id, device_id, EntityType::from_code(route.dst_type)),
    )
}

fn apply_binds(ctx: &mut SchedulerContext, buf: &mut BytesMut, routes: &[QueueRoute], checks: &[i32]) -> StatusResult {
    let device_id = ctx.device_id();
    let index = ctx.res_index_of(device_id);
    let mut ret = Ok(());

    for (i, (route, check)) in routes.iter().zip(checks).enumerate() {
        if *check != STATUS_OK {
            ret = Err(BqsStatus::QueueAuthError);
            write_route_status(buf, false, i, BIND_NOT_APPLIED);
            continue;
        }
        let (src, dst) = route_entities(route, device_id);
        let result = ctx.relation.bind(&src, &dst, index);
        match result {
            Err(BqsStatus::Retry) => continue,
            Err(status) => {
                ret = Err(status);
                write_route_status(buf, false, i, BIND_NOT_APPLIED);
            }
            Ok(()) => write_route_status(buf, false, i, BIND_APPLIED),
        }
        debug!(src = %src, dst = %dst, index, result = ?result, "bind route processed");
    }

    ctx.relation.order(index);
    ret
}

fn apply_unbinds(ctx: &mut SchedulerContext, buf: &mut BytesMut, routes: &[QueueRoute], checks: &[i32]) -> StatusResult {
    let device_id = ctx.device_id();
    let index = ctx.res_index_of(device_id);
    let mut ret = Ok(());

    for (i, (route, check)) in routes.iter().zip(checks).enumerate() {
        if *check != STATUS_OK {
            ret = Err(BqsStatus::QueueIdError);
            write_route_status(buf, false, i, UNBIND_NOT_APPLIED);
            continue;
        }
        let (src, dst) = route_entities(route, device_id);
        let result = ctx.relation.unbind(&src, &dst, index);
        match result {
            Err(BqsStatus::Retry) => continue,
            Err(status) => {
                ret = Err(status);
                write_route_status(buf, false, i, UNBIND_NOT_APPLIED);
            }
            Ok(()) => write_route_status(buf, false, i, UNBIND_APPLIED),
        }
        debug!(src = %src, dst = %dst, index, result = ?result, "unbind route processed");
    }

    ctx.relation.order(index);
    ret
}

fn link_connected(ctx: &SchedulerContext) -> StatusResult<bool> {
    let mut connected = ctx.relation.link_status(0)?;
    if connected && ctx.is_numa() {
        connected = ctx.relation.link_status(1)?;
    }
    Ok(connected)
}

fn route_of(src: &EntityInfo, dst: &EntityInfo, status: RelationStatus) -> QueueRoute {
    QueueRoute {
        src_id: src.id,
        dst_id: dst.id,
        status: status as i32,
        src_type: src.ty.code(),
        dst_type: dst.ty.code(),
    }
}

/// Relations of one endpoint: live ones first, then abnormal ones
fn relations_of(relation: &BindRelation, entity: &EntityInfo, by_src: bool, domains: Range<usize>) -> Vec<QueueRoute> {
    let oriented = |peer: &EntityInfo, status| {
        if by_src {
            route_of(entity, peer, status)
        } else {
            route_of(peer, entity, status)
        }
    };

    let mut routes = Vec::new();
    for index in domains.clone() {
        let peers = if by_src {
            relation.dsts_of(entity, index)
        } else {
            relation.srcs_of(entity, index)
        };
        routes.extend(peers.into_iter().map(|peer| oriented(peer, RelationStatus::Bind)));
    }
    for index in domains {
        let peers = if by_src {
            relation.abnormal_dsts_of(entity, index)
        } else {
            relation.abnormal_srcs_of(entity, index)
        };
        routes.extend(
            peers
                .into_iter()
                .map(|peer| oriented(peer, RelationStatus::AbnormalForQueueError)),
        );
    }

    if routes.is_empty() {
        warn!(id = entity.id, by_src, "no relation recorded for entity");
    }
    routes
}

/// Answer a relation query against the graph
pub(crate) fn query_relations(ctx: &SchedulerContext, query: &QueueRouteQuery) -> Vec<QueueRoute> {
    let relation = &ctx.relation;
    let device_id = ctx.device_id();
    let domains = 0..if ctx.is_numa() { DOMAIN_NUM } else { 1 };
    let src = EntityInfo::new(query.src_id, device_id, EntityType::from_code(query.src_type));
    let dst = EntityInfo::new(query.dst_id, device_id, EntityType::from_code(query.dst_type));

    match QueryType::from(query.query_type) {
        QueryType::Src => relations_of(relation, &src, true, domains),
        QueryType::Dst => relations_of(relation, &dst, false, domains),
        QueryType::SrcOrDst => {
            let routes = relations_of(relation, &src, true, domains.clone());
            if routes.is_empty() {
                relations_of(relation, &dst, false, domains)
            } else {
                routes
            }
        }
        QueryType::SrcAndDst => {
            let status = if domains.clone().any(|index| relation.has_edge(&src, &dst, index)) {
                Some(RelationStatus::Bind)
            } else if domains.clone().any(|index| relation.has_abnormal_edge(&src, &dst, index)) {
                Some(RelationStatus::AbnormalForQueueError)
            } else {
                None
            };
            status
                .map(|status| vec![route_of(&src, &dst, status)])
                .unwrap_or_default()
        }
        QueryType::AbnormalForQueueError => domains
            .flat_map(|index| relation.abnormal_edges(index))
            .map(|(s, d)| route_of(s, d, RelationStatus::AbnormalForQueueError))
            .collect(),
        QueryType::Other(query_type) => {
            error!(query_type, "unsupported query type");
            Vec::new()
        }
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
