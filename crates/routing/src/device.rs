//! Device Queue Service seam
//!
//! The graph talks to the driver-level queue service only through
//! `DeviceQueueService`. `LocalQueueService` is a complete in-process
//! implementation used by the single-process deployment and by tests; it
//! keeps queue contents as counters and supports failure injection.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use bqs_protocol::{BqsStatus, StatusResult};

/// Queue event the scheduler can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEvent {
    /// A buffer was enqueued
    Enqueue,
    /// A full queue has room again
    FullToNotFull,
}

/// Access rights a process holds on a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueAuth {
    pub read: bool,
    pub write: bool,
}

impl QueueAuth {
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
    };
}

/// Driver-level queue operations the scheduler depends on
pub trait DeviceQueueService: Send + Sync {
    /// Create a queue and return its id
    fn create_queue(&self, device_id: u32, name: &str, depth: u32) -> StatusResult<u32>;

    /// Attach the scheduler to an existing queue
    fn attach_queue(&self, device_id: u32, queue_id: u32) -> StatusResult;

    /// Give a process read/write rights on a queue
    fn grant_queue(&self, device_id: u32, queue_id: u32, pid: i32, auth: QueueAuth) -> StatusResult;

    /// Rights the scheduler holds on a queue
    fn queue_auth(&self, device_id: u32, queue_id: u32) -> StatusResult<QueueAuth>;

    fn subscribe(&self, device_id: u32, queue_id: u32, event: QueueEvent) -> StatusResult;

    fn unsubscribe(&self, device_id: u32, queue_id: u32, event: QueueEvent) -> StatusResult;

    /// Drop every buffer in a queue
    fn clear_queue(&self, device_id: u32, queue_id: u32) -> StatusResult;

    /// Current number of buffers in a queue
    fn queue_len(&self, device_id: u32, queue_id: u32) -> StatusResult<u32>;

    /// Whether the comm channel behind `handle`/`tag` is connected
    fn channel_connected(&self, handle: u64, tag_id: u32) -> bool;
}

#[derive(Debug, Default)]
struct QueueState {
    name: String,
    depth: u32,
    len: u32,
    attached: bool,
    auth: QueueAuth,
    grants: HashMap<i32, QueueAuth>,
    subscriptions: HashSet<QueueEvent>,
}

#[derive(Debug, Default)]
struct LocalState {
    next_id: u32,
    queues: HashMap<(u32, u32), QueueState>,
    fail_attach: HashSet<u32>,
    fail_subscribe: HashSet<u32>,
    denied: HashMap<u32, QueueAuth>,
    disconnected: HashSet<(u64, u32)>,
}

/// In-process queue service
///
/// Queues referenced before being created are created implicitly on attach
/// with full rights, mirroring how externally created queues appear to the
/// scheduler.
#[derive(Debug)]
pub struct LocalQueueService {
    state: Mutex<LocalState>,
}

impl Default for LocalQueueService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalQueueService {
    /// Ids returned by `create_queue` start here to stay clear of client ids
    pub const FIRST_CREATED_ID: u32 = 60_000;

    pub fn new() -> Self {
        Self {
            state: Mutex::new(LocalState {
                next_id: Self::FIRST_CREATED_ID,
                ..LocalState::default()
            }),
        }
    }

    /// Make `attach_queue` fail for a queue id
    pub fn fail_attach(&self, queue_id: u32) {
        self.state.lock().fail_attach.insert(queue_id);
    }

    /// Make `subscribe` fail for a queue id
    pub fn fail_subscribe(&self, queue_id: u32) {
        self.state.lock().fail_subscribe.insert(queue_id);
    }

    /// Override the rights reported for a queue id
    pub fn set_auth(&self, queue_id: u32, auth: QueueAuth) {
        self.state.lock().denied.insert(queue_id, auth);
    }

    /// Mark a comm channel as connected or not
    pub fn set_channel_connected(&self, handle: u64, tag_id: u32, connected: bool) {
        let mut state = self.state.lock();
        if connected {
            state.disconnected.remove(&(handle, tag_id));
        } else {
            state.disconnected.insert((handle, tag_id));
        }
    }

    /// Put `count` buffers into a queue, stopping at its depth if it has one
    pub fn enqueue(&self, device_id: u32, queue_id: u32, count: u32) {
        let mut state = self.state.lock();
        let queue = state.queues.entry((device_id, queue_id)).or_default();
        queue.len = queue.len.saturating_add(count);
        if queue.depth > 0 {
            queue.len = queue.len.min(queue.depth);
        }
    }

    pub fn is_subscribed(&self, device_id: u32, queue_id: u32, event: QueueEvent) -> bool {
        self.state
            .lock()
            .queues
            .get(&(device_id, queue_id))
            .is_some_and(|q| q.subscriptions.contains(&event))
    }

    pub fn grant_of(&self, device_id: u32, queue_id: u32, pid: i32) -> Option<QueueAuth> {
        self.state
            .lock()
            .queues
            .get(&(device_id, queue_id))
            .and_then(|q| q.grants.get(&pid).copied())
    }

    pub fn queue_name(&self, device_id: u32, queue_id: u32) -> Option<String> {
        self.state
            .lock()
            .queues
            .get(&(device_id, queue_id))
            .map(|q| q.name.clone())
    }

    /// Total subscriptions across every queue
    pub fn subscription_count(&self) -> usize {
        self.state
            .lock()
            .queues
            .values()
            .map(|q| q.subscriptions.len())
            .sum()
    }
}

impl DeviceQueueService for LocalQueueService {
    fn create_queue(&self, device_id: u32, name: &str, depth: u32) -> StatusResult<u32> {
        if depth == 0 {
            return Err(BqsStatus::ParamInvalid);
        }
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id = state.next_id.checked_add(1).ok_or(BqsStatus::InnerError)?;
        state.queues.insert(
            (device_id, id),
            QueueState {
                name: name.to_string(),
                depth,
                attached: true,
                auth: QueueAuth::READ_WRITE,
                ..QueueState::default()
            },
        );
        Ok(id)
    }

    fn attach_queue(&self, device_id: u32, queue_id: u32) -> StatusResult {
        let mut state = self.state.lock();
        if state.fail_attach.contains(&queue_id) {
            return Err(BqsStatus::DriverError);
        }
        let auth = state
            .denied
            .get(&queue_id)
            .copied()
            .unwrap_or(QueueAuth::READ_WRITE);
        let queue = state.queues.entry((device_id, queue_id)).or_default();
        queue.attached = true;
        queue.auth = auth;
        Ok(())
    }

    fn grant_queue(&self, device_id: u32, queue_id: u32, pid: i32, auth: QueueAuth) -> StatusResult {
        let mut state = self.state.lock();
        let queue = state
            .queues
            .get_mut(&(device_id, queue_id))
            .ok_or(BqsStatus::DriverError)?;
        queue.grants.insert(pid, auth);
        Ok(())
    }

    fn queue_auth(&self, device_id: u32, queue_id: u32) -> StatusResult<QueueAuth> {
        let state = self.state.lock();
        if let Some(auth) = state.denied.get(&queue_id) {
            return Ok(*auth);
        }
        match state.queues.get(&(device_id, queue_id)) {
            Some(queue) if queue.attached => Ok(queue.auth),
            _ => Err(BqsStatus::DriverError),
        }
    }

    fn subscribe(&self, device_id: u32, queue_id: u32, event: QueueEvent) -> StatusResult {
        let mut state = self.state.lock();
        if state.fail_subscribe.contains(&queue_id) {
            return Err(BqsStatus::DriverError);
        }
        state
            .queues
            .entry((device_id, queue_id))
            .or_default()
            .subscriptions
            .insert(event);
        Ok(())
    }

    fn unsubscribe(&self, device_id: u32, queue_id: u32, event: QueueEvent) -> StatusResult {
        let mut state = self.state.lock();
        if let Some(queue) = state.queues.get_mut(&(device_id, queue_id)) {
            queue.subscriptions.remove(&event);
        }
        Ok(())
    }

    fn clear_queue(&self, device_id: u32, queue_id: u32) -> StatusResult {
        let mut state = self.state.lock();
        if let Some(queue) = state.queues.get_mut(&(device_id, queue_id)) {
            queue.len = 0;
        }
        Ok(())
    }

    fn queue_len(&self, device_id: u32, queue_id: u32) -> StatusResult<u32> {
        Ok(self
            .state
            .lock()
            .queues
            .get(&(device_id, queue_id))
            .map_or(0, |q| q.len))
    }

    fn channel_connected(&self, handle: u64, tag_id: u32) -> bool {
        !self.state.lock().disconnected.contains(&(handle, tag_id))
    }
}

#[cfg(test)]
#[path = "device_test.rs"]
mod tests;
