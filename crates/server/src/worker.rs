//! Graph worker
//!
//! The routing graph has exactly one writer. `GraphWorker` owns the
//! `SchedulerContext` and runs submitted jobs one at a time; every other task
//! reaches the graph through a cloneable `WorkerHandle`.
//!
//! ```text
//! event task ──┐
//! front end  ──┼──► crossfire mpsc (bounded) ──► GraphWorker ──► SchedulerContext
//! config     ──┘         ▲                             │
//!                        └──────── oneshot reply ◄─────┘
//! ```
//!
//! A submission that does not complete within the handle timeout reports
//! `BqsStatus::Timeout`. The job itself may still run later; callers must
//! treat the outcome as unknown and query to confirm.

use std::sync::Arc;
use std::time::Duration;

use bqs_operator::SchedulerContext;
use bqs_protocol::{BqsStatus, StatusResult};
use crossfire::{AsyncRx, MAsyncTx};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::ServerMetrics;

/// Work item run against the scheduler context
pub type Job = Box<dyn FnOnce(&mut SchedulerContext) + Send>;

/// Default job channel capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default bound on a single submission
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(5);

/// Single owner of the routing graph
pub struct GraphWorker {
    ctx: SchedulerContext,
    metrics: Arc<ServerMetrics>,
}

impl GraphWorker {
    pub fn new(ctx: SchedulerContext, metrics: Arc<ServerMetrics>) -> Self {
        Self { ctx, metrics }
    }

    /// Run jobs until cancelled or every handle is dropped
    ///
    /// Returns the context so callers can inspect or persist it after
    /// shutdown.
    pub async fn run(mut self, receiver: AsyncRx<Job>, cancel: CancellationToken) -> SchedulerContext {
        tracing::info!(
            device_id = self.ctx.device_id(),
            numa = self.ctx.is_numa(),
            "graph worker starting"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = receiver.recv() => match job {
                    Ok(job) => {
                        self.metrics.record_relation_dequeue();
                        job(&mut self.ctx);
                    }
                    Err(_) => break,
                }
            }
        }

        tracing::info!(
            binds = self.ctx.relation.count_binds(0),
            backlog = self.metrics.snapshot().relation_backlog(),
            "graph worker shutting down"
        );
        self.ctx
    }
}

/// Cloneable submission side of the graph worker
#[derive(Clone)]
pub struct WorkerHandle {
    sender: MAsyncTx<Job>,
    timeout: Duration,
    metrics: Arc<ServerMetrics>,
}

impl WorkerHandle {
    /// Bound applied to each `call`
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Run `f` on the worker and wait for its result
    ///
    /// Fails with `InnerError` if the worker is gone and `Timeout` if the
    /// round trip exceeds the configured bound.
    pub async fn call<R, F>(&self, f: F) -> StatusResult<R>
    where
        F: FnOnce(&mut SchedulerContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |ctx| {
            // receiver dropped after a timeout; nothing to report to
            let _ = reply_tx.send(f(ctx));
        });

        let round_trip = async {
            self.sender
                .send(job)
                .await
                .map_err(|_| BqsStatus::InnerError)?;
            self.metrics.record_relation_enqueue();
            reply_rx.await.map_err(|_| BqsStatus::InnerError)
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => {
                if result.is_err() {
                    tracing::error!("graph worker unavailable");
                }
                result
            }
            Err(_) => {
                self.metrics.record_timeout();
                tracing::warn!(timeout = ?self.timeout, "graph worker did not answer in time");
                Err(BqsStatus::Timeout)
            }
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("timeout", &self.timeout)
            .field("backlog", &self.metrics.snapshot().relation_backlog())
            .finish()
    }
}

/// Spawn a worker owning `ctx`
///
/// The returned join handle yields the context once the worker stops.
pub fn spawn(
    ctx: SchedulerContext,
    capacity: usize,
    timeout: Duration,
    metrics: Arc<ServerMetrics>,
    cancel: CancellationToken,
) -> (WorkerHandle, JoinHandle<SchedulerContext>) {
    let (sender, receiver) = crossfire::mpsc::bounded_async::<Job>(capacity.max(1));
    let worker = GraphWorker::new(ctx, Arc::clone(&metrics));
    let join = tokio::spawn(worker.run(receiver, cancel));
    let handle = WorkerHandle {
        sender,
        timeout,
        metrics,
    };
    (handle, join)
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod tests;
