//! Collective communication seam
//!
//! Handles for inter-chip transfer come from a collective communication
//! library. The scheduler only needs to create and finalize communicators,
//! register the buffer pools it routes with them, and pass on the network
//! protocol selected by configuration.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use bqs_protocol::{BqsStatus, StatusResult};

/// Name under which the selected protocol is exported to collaborators
pub const HCCL_PROTOCOL_ENV: &str = "HCCL_NPU_NET_PROTOCOL";

/// Network protocol used by collective communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HcclProtocol {
    Rdma,
    Tcp,
}

impl HcclProtocol {
    /// Parse the configuration value (0 = RDMA, 1 = TCP)
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Rdma),
            1 => Some(Self::Tcp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rdma => "RDMA",
            Self::Tcp => "TCP",
        }
    }
}

/// Buffer pool registered with every communicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    pub addr: u64,
    pub size: u64,
}

/// Collective communication library
pub trait CollectiveCommService: Send + Sync {
    /// Create a communicator for `rank_id` from a rank table
    fn init_comm(&self, device_id: u32, rank_table: &[u8], rank_id: i32) -> StatusResult<u64>;

    fn finalize_comm(&self, handle: u64) -> StatusResult;

    fn register_memory(&self, handle: u64, region: MemoryRegion) -> StatusResult;

    fn unregister_memory(&self, handle: u64, addr: u64) -> StatusResult;

    /// Select the network protocol for communicators created afterwards
    fn set_protocol(&self, protocol: HcclProtocol) -> StatusResult;
}

#[derive(Debug, Default)]
struct CommState {
    next_handle: u64,
    comms: HashMap<u64, HashSet<u64>>,
    protocol: Option<HcclProtocol>,
    fail_init: bool,
    fail_register: bool,
    fail_finalize: bool,
}

/// In-process collective comm service
///
/// Handles are plain counters; registrations are tracked per handle so tests
/// can observe them. Failures can be injected per operation.
#[derive(Debug)]
pub struct LocalCommService {
    state: Mutex<CommState>,
}

impl Default for LocalCommService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCommService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CommState {
                next_handle: 0x1000,
                ..CommState::default()
            }),
        }
    }

    pub fn fail_init(&self, fail: bool) {
        self.state.lock().fail_init = fail;
    }

    pub fn fail_register(&self, fail: bool) {
        self.state.lock().fail_register = fail;
    }

    pub fn fail_finalize(&self, fail: bool) {
        self.state.lock().fail_finalize = fail;
    }

    /// Whether `handle` is a live communicator
    pub fn is_live(&self, handle: u64) -> bool {
        self.state.lock().comms.contains_key(&handle)
    }

    /// Number of regions registered on `handle`
    pub fn registered(&self, handle: u64) -> usize {
        self.state.lock().comms.get(&handle).map_or(0, HashSet::len)
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().comms.len()
    }

    pub fn protocol(&self) -> Option<HcclProtocol> {
        self.state.lock().protocol
    }
}

impl CollectiveCommService for LocalCommService {
    fn init_comm(&self, _device_id: u32, rank_table: &[u8], _rank_id: i32) -> StatusResult<u64> {
        let mut state = self.state.lock();
        if state.fail_init || rank_table.is_empty() {
            return Err(BqsStatus::HcclError);
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.comms.insert(handle, HashSet::new());
        Ok(handle)
    }

    fn finalize_comm(&self, handle: u64) -> StatusResult {
        let mut state = self.state.lock();
        if state.fail_finalize {
            return Err(BqsStatus::HcclError);
        }
        state
            .comms
            .remove(&handle)
            .map(|_| ())
            .ok_or(BqsStatus::HcclError)
    }

    fn register_memory(&self, handle: u64, region: MemoryRegion) -> StatusResult {
        let mut state = self.state.lock();
        if state.fail_register {
            return Err(BqsStatus::HcclError);
        }
        let regions = state.comms.get_mut(&handle).ok_or(BqsStatus::HcclError)?;
        regions.insert(region.addr);
        Ok(())
    }

    fn unregister_memory(&self, handle: u64, addr: u64) -> StatusResult {
        let mut state = self.state.lock();
        let regions = state.comms.get_mut(&handle).ok_or(BqsStatus::HcclError)?;
        if regions.remove(&addr) {
            Ok(())
        } else {
            Err(BqsStatus::HcclError)
        }
    }

    fn set_protocol(&self, protocol: HcclProtocol) -> StatusResult {
        self.state.lock().protocol = Some(protocol);
        Ok(())
    }
}
