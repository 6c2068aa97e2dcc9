//! Scheduler context
//!
//! Everything a configuration command may touch lives here: the bind
//! relation graph, the comm-channel registry, per-domain profile and dynamic
//! schedule state, and the collective comm service. One context is built at
//! startup and owned by the graph worker; it is never shared.

use std::sync::Arc;

use bqs_routing::{BindRelation, DOMAIN_NUM, DeviceQueueService};

use crate::comm_channel::CommChannelManager;
use crate::hccl::{CollectiveCommService, HcclProtocol, MemoryRegion};
use crate::profile::ProfileManager;
use crate::schedule::{DynamicSchedManager, ScheduleConfig};

pub struct SchedulerContext {
    pub relation: BindRelation,
    pub channels: CommChannelManager,
    pub profiles: [ProfileManager; DOMAIN_NUM],
    pub dynamic_sched: [DynamicSchedManager; DOMAIN_NUM],
    pub schedule_config: ScheduleConfig,
    pub comm: Arc<dyn CollectiveCommService>,
    pub hccl_protocol: Option<HcclProtocol>,
    device_id: u32,
    dev_ids: Vec<u32>,
    memory_regions: Vec<MemoryRegion>,
}

impl std::fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("relation", &self.relation)
            .field("channels", &self.channels.len())
            .field("device_id", &self.device_id)
            .field("dev_ids", &self.dev_ids)
            .finish()
    }
}

impl SchedulerContext {
    pub fn new(relation: BindRelation, comm: Arc<dyn CollectiveCommService>) -> Self {
        Self {
            relation,
            channels: CommChannelManager::new(),
            profiles: Default::default(),
            dynamic_sched: Default::default(),
            schedule_config: ScheduleConfig::new(),
            comm,
            hccl_protocol: None,
            device_id: 0,
            dev_ids: Vec::new(),
            memory_regions: Vec::new(),
        }
    }

    /// Device the scheduler runs on
    pub fn with_device_id(mut self, device_id: u32) -> Self {
        self.device_id = device_id;
        self
    }

    /// Devices served by each resource domain, in domain order
    pub fn with_dev_ids(mut self, dev_ids: Vec<u32>) -> Self {
        self.dev_ids = dev_ids;
        self
    }

    /// Buffer pools registered with every communicator
    pub fn with_memory_regions(mut self, regions: Vec<MemoryRegion>) -> Self {
        self.memory_regions = regions;
        self
    }

    #[inline]
    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    #[inline]
    pub fn is_numa(&self) -> bool {
        self.relation.is_numa()
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn DeviceQueueService> {
        self.relation.device()
    }

    #[inline]
    pub fn memory_regions(&self) -> &[MemoryRegion] {
        &self.memory_regions
    }

    /// Resource domain owning `device_id`
    ///
    /// Always 0 without NUMA; otherwise the position of the device in the
    /// configured device list, falling back to 0 for unknown devices.
    pub fn res_index_of(&self, device_id: u32) -> usize {
        if !self.is_numa() {
            return 0;
        }
        self.dev_ids
            .iter()
            .position(|d| *d == device_id)
            .filter(|index| *index < DOMAIN_NUM)
            .unwrap_or(0)
    }

    /// Zero the profile counters of every active domain
    pub fn reset_profiling(&self) {
        for index in self.relation.active_domains() {
            self.profiles[index].reset();
        }
    }
}
