//! Dynamic schedule bookkeeping
//!
//! A root model registers a request/response queue pair for dynamic
//! scheduling. `DynamicSchedManager` keeps those registrations per resource
//! domain together with cached routing decisions and responses not yet
//! consumed; `ScheduleConfig` tracks whether scheduling for a root model is
//! stopped for redeployment.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use bqs_protocol::{BqsStatus, StatusResult};

/// Queue taking part in dynamic scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedQueue {
    pub queue_id: u32,
    pub device_id: u32,
    pub is_client: bool,
}

/// Dynamic schedule registration of one root model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootModelInfo {
    pub root_model_id: u32,
    pub request: SchedQueue,
    pub response: SchedQueue,
}

/// Response produced by the dynamic scheduler for a root model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedResponse {
    pub root_model_id: u32,
    pub model_uuid: u64,
}

/// Per-domain dynamic schedule state
#[derive(Debug, Default)]
pub struct DynamicSchedManager {
    root_models: BTreeMap<u32, RootModelInfo>,
    cached_routes: HashMap<u32, u64>,
    responses: HashMap<u32, Vec<SchedResponse>>,
}

impl DynamicSchedManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root model; registering the same id twice fails
    pub fn add_root_model(&mut self, info: RootModelInfo) -> StatusResult {
        if self.root_models.contains_key(&info.root_model_id) {
            return Err(BqsStatus::DynamicScheduleError);
        }
        info!(
            root_model = info.root_model_id,
            request_queue = info.request.queue_id,
            response_queue = info.response.queue_id,
            "registered root model for dynamic schedule"
        );
        self.root_models.insert(info.root_model_id, info);
        Ok(())
    }

    #[inline]
    pub fn root_model(&self, root_model_id: u32) -> Option<&RootModelInfo> {
        self.root_models.get(&root_model_id)
    }

    #[inline]
    pub fn root_model_count(&self) -> usize {
        self.root_models.len()
    }

    /// Remember the model instance chosen for a request key
    pub fn cache_route(&mut self, key: u32, model_uuid: u64) {
        self.cached_routes.insert(key, model_uuid);
    }

    #[inline]
    pub fn cached_route_count(&self) -> usize {
        self.cached_routes.len()
    }

    /// Forget every cached routing decision
    pub fn clear_cache_route_result(&mut self) {
        debug!(cached = self.cached_routes.len(), "clearing cached route results");
        self.cached_routes.clear();
    }

    pub fn push_response(&mut self, response: SchedResponse) {
        self.responses
            .entry(response.root_model_id)
            .or_default()
            .push(response);
    }

    /// Take the pending responses of a root model
    pub fn take_responses(&mut self, root_model_id: u32) -> Vec<SchedResponse> {
        self.responses.remove(&root_model_id).unwrap_or_default()
    }

    #[inline]
    pub fn pending_responses(&self, root_model_id: u32) -> usize {
        self.responses.get(&root_model_id).map_or(0, Vec::len)
    }
}

/// Stop/restart state of dynamically scheduled root models
#[derive(Debug, Default)]
pub struct ScheduleConfig {
    configs: BTreeMap<u32, (SchedQueue, SchedQueue)>,
    stopped: BTreeSet<u32>,
}

impl ScheduleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, root_model_id: u32, request: SchedQueue, response: SchedQueue) {
        self.configs.insert(root_model_id, (request, response));
    }

    /// Queues recorded for a root model
    pub fn queues(&self, root_model_id: u32) -> Option<(SchedQueue, SchedQueue)> {
        self.configs.get(&root_model_id).copied()
    }

    pub fn stop(&mut self, root_model_id: u32) {
        info!(root_model = root_model_id, "stop schedule");
        self.stopped.insert(root_model_id);
    }

    pub fn restart(&mut self, root_model_id: u32) {
        info!(root_model = root_model_id, "restart schedule");
        self.stopped.remove(&root_model_id);
    }

    #[inline]
    pub fn is_stopped(&self, root_model_id: u32) -> bool {
        self.stopped.contains(&root_model_id)
    }
}

#[cfg(test)]
#[path = "schedule_test.rs"]
mod tests;
