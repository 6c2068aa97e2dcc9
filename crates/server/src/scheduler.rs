//! Scheduler assembly
//!
//! Starts the pieces of a running scheduler in order:
//!
//! 1. graph worker owning the `SchedulerContext`
//! 2. router management task
//! 3. socket listener (optional)
//! 4. router marked ready
//!
//! `shutdown` stops them in reverse and hands back the context.

use std::sync::Arc;
use std::time::Duration;

use bqs_operator::{CollectiveCommService, MemoryRegion, SchedulerContext};
use bqs_routing::{BindRelation, DeviceQueueService};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bqs::BqsServer;
use crate::config_client::ConfigClient;
use crate::error::Result;
use crate::listener::{BqsListener, BqsListenerConfig};
use crate::metrics::ServerMetrics;
use crate::router::{EventSender, RouterConfig, RouterServer};
use crate::worker::{self, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_TIMEOUT};

/// Everything needed to start a scheduler
#[derive(Debug, Clone)]
pub struct SchedulerParams {
    pub router: RouterConfig,

    /// Socket front end; `None` runs without one
    pub listener: Option<BqsListenerConfig>,

    /// Graph worker job channel capacity
    pub worker_capacity: usize,

    /// Bound on one graph worker round trip
    pub worker_timeout: Duration,

    /// Memory registered with every collective comm handle
    pub memory_regions: Vec<MemoryRegion>,

    /// Buffer events go through the collective comm path
    pub need_hccl: bool,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            listener: None,
            worker_capacity: DEFAULT_QUEUE_CAPACITY,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            memory_regions: Vec::new(),
            need_hccl: false,
        }
    }
}

/// A running scheduler
pub struct Scheduler {
    router: Arc<RouterServer>,
    front: Arc<BqsServer>,
    events: EventSender,
    metrics: Arc<ServerMetrics>,
    need_hccl: bool,
    cancel: CancellationToken,
    worker: JoinHandle<SchedulerContext>,
    listener: Option<JoinHandle<Result<()>>>,
}

impl Scheduler {
    /// Start every component and mark the router ready
    pub async fn start(
        params: SchedulerParams,
        device: Arc<dyn DeviceQueueService>,
        comm: Arc<dyn CollectiveCommService>,
    ) -> Result<Self> {
        let config = &params.router;
        info!(
            device_id = config.device_id,
            deploy_mode = %config.deploy_mode,
            numa = config.numa,
            need_hccl = params.need_hccl,
            "starting queue scheduler"
        );

        let relation = BindRelation::new(Arc::clone(&device)).with_numa(config.numa);
        let ctx = SchedulerContext::new(relation, comm)
            .with_device_id(config.device_id)
            .with_dev_ids(config.dev_ids.clone())
            .with_memory_regions(params.memory_regions.clone());

        let cancel = CancellationToken::new();
        let metrics = Arc::new(ServerMetrics::new());
        let (handle, worker) = worker::spawn(
            ctx,
            params.worker_capacity,
            params.worker_timeout,
            Arc::clone(&metrics),
            cancel.child_token(),
        );

        let router = Arc::new(RouterServer::new(params.router.clone(), device, handle.clone()));
        let events = match router.init().await {
            Ok(events) => events,
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        let front = Arc::new(BqsServer::new(handle));
        let listener = match params.listener {
            Some(listener_config) => {
                let spawned =
                    BqsListener::new(Arc::clone(&front), listener_config, cancel.child_token()).spawn();
                match spawned {
                    Ok(join) => Some(join),
                    Err(e) => {
                        router.destroy().await;
                        cancel.cancel();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        router.notify_init_success();
        Ok(Self {
            router,
            front,
            events,
            metrics,
            need_hccl: params.need_hccl,
            cancel,
            worker,
            listener,
        })
    }

    #[inline]
    pub fn router(&self) -> &Arc<RouterServer> {
        &self.router
    }

    /// Wire front controller, usable without the socket
    #[inline]
    pub fn front(&self) -> &Arc<BqsServer> {
        &self.front
    }

    #[inline]
    pub fn events(&self) -> &EventSender {
        &self.events
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub fn config_client(&self) -> ConfigClient {
        ConfigClient::new(self.events.clone())
    }

    /// Whether the collective comm library is in use
    pub fn calls_hccl(&self) -> bool {
        self.need_hccl || self.router.calls_hccl()
    }

    /// Token cancelled by `shutdown`
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every component and return the graph
    pub async fn shutdown(self) -> Option<SchedulerContext> {
        info!("queue scheduler shutting down");
        self.router.destroy().await;
        self.cancel.cancel();

        if let Some(listener) = self.listener {
            match listener.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "listener ended with error"),
                Err(e) => warn!(error = %e, "listener task failed"),
            }
        }

        let ctx = match self.worker.await {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!(error = %e, "graph worker task failed");
                None
            }
        };
        self.metrics.log_summary("scheduler");
        ctx
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("router", &self.router)
            .field("listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}
