//! Configuration command processing
//!
//! A configuration event carries a caller-owned buffer. The operator reads
//! the command out of it into an owned record (check and record), applies it
//! to the scheduler context once per resource domain (process), and writes
//! per-item and aggregate results back into the same buffer.
//!
//! ```text
//! parse_config_event ──► check_and_record ──► auth pass (bind only)
//!                                  │
//!          for each active domain  ▼
//!                        process_update_config(index) ──► write back
//! ```
//!
//! Queries and HCOM handle requests finish during parsing.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use bqs_protocol::config::{
    CFG_RET_SIZE, CONFIG_INFO_SIZE, ConfigCmd, ConfigInfo, DYNAMIC_SCHED_SIZE, DynamicSchedConfig,
    ENDPOINT_SIZE, Endpoint, ROUTE_SIZE, Route, cfg_ret_offset, read_u32_at, route_ret_offset,
    write_i32_at,
};
use bqs_protocol::{BqsStatus, StatusResult, status_code};
use bqs_routing::{EntityInfo, EntityType, MAX_GROUP_MEMBERS, QueueEvent, QueueType};

use crate::MAX_ROUTES_NUM;
use crate::context::SchedulerContext;
use crate::convert::{create_entity_info, is_host_res, res_device_id};
use crate::hccl::{HCCL_PROTOCOL_ENV, HcclProtocol};
use crate::schedule::{RootModelInfo, SchedQueue};

/// Offset of `ConfigInfo::group_id` in an update buffer
const CONFIG_INFO_GROUP_ID_OFFSET: usize = 8;

/// Configuration sub-event handled by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEventKind {
    UpdateConfig,
    QueryConfigNum,
    QueryConfig,
    CreateHcomHandle,
    DestroyHcomHandle,
}

/// Outcome of parsing a configuration event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPhase {
    /// Fully handled; nothing left to process
    Done,
    /// An update was recorded and waits for `process_update_config`
    Recorded,
}

/// One route of a bind/unbind command
#[derive(Debug)]
struct RouteRecord {
    /// `None` when an endpoint could not be converted
    pair: Option<(EntityInfo, EntityInfo)>,
    result: StatusResult,
}

#[derive(Debug)]
enum UpdatePayload {
    Routes(Vec<RouteRecord>),
    Members(Vec<EntityInfo>),
    DynamicSched(DynamicSchedConfig),
    RootModels(Vec<u32>),
    Empty,
}

/// Owned copy of an update command and its results
#[derive(Debug)]
pub struct UpdateCfgInfo {
    cmd: ConfigCmd,
    info: ConfigInfo,
    payload: UpdatePayload,
    status: StatusResult,
    group_id: Option<i32>,
}

impl UpdateCfgInfo {
    #[inline]
    pub fn cmd(&self) -> ConfigCmd {
        self.cmd
    }

    /// Per-route results of a bind/unbind command
    pub fn route_results(&self) -> Vec<StatusResult> {
        match &self.payload {
            UpdatePayload::Routes(records) => records.iter().map(|r| r.result).collect(),
            _ => Vec::new(),
        }
    }

    /// Aggregate result: the first failure of any item
    pub fn aggregate(&self) -> StatusResult {
        match &self.payload {
            UpdatePayload::Routes(records) => records
                .iter()
                .find_map(|r| r.result.err())
                .map_or(Ok(()), Err),
            _ => self.status,
        }
    }

    fn merge(&mut self, result: StatusResult) {
        if self.status.is_ok() {
            self.status = result;
        }
    }

    fn write_back(&self, buf: &mut [u8]) {
        if let UpdatePayload::Routes(records) = &self.payload {
            for (i, record) in records.iter().enumerate() {
                write_i32_at(buf, route_ret_offset(records.len(), i), status_code(&record.result));
            }
        }
        if let Some(group_id) = self.group_id {
            write_i32_at(buf, CONFIG_INFO_GROUP_ID_OFFSET, group_id);
        }
        write_i32_at(buf, cfg_ret_offset(buf.len()), status_code(&self.aggregate()));
    }
}

/// Applies one configuration event to the scheduler context
pub struct ConfigInfoOperator<'a> {
    pub(crate) ctx: &'a mut SchedulerContext,
    pub(crate) client_version: u32,
    update: Option<UpdateCfgInfo>,
}

impl<'a> ConfigInfoOperator<'a> {
    pub fn new(ctx: &'a mut SchedulerContext, client_version: u32) -> Self {
        Self {
            ctx,
            client_version,
            update: None,
        }
    }

    /// Parse and fully apply a configuration event
    ///
    /// Updates run once per active domain; the first failing domain decides
    /// the returned status.
    pub fn handle(&mut self, kind: ConfigEventKind, buf: &mut [u8]) -> StatusResult {
        if self.parse_config_event(kind, buf)? == ConfigPhase::Done {
            return Ok(());
        }
        let mut result = Ok(());
        for index in self.ctx.relation.active_domains() {
            let status = self.process_update_config(index, buf);
            if result.is_ok() {
                result = status;
            }
        }
        result
    }

    /// The recorded update, if any
    #[inline]
    pub fn update(&self) -> Option<&UpdateCfgInfo> {
        self.update.as_ref()
    }

    pub fn parse_config_event(&mut self, kind: ConfigEventKind, buf: &mut [u8]) -> StatusResult<ConfigPhase> {
        debug!(?kind, len = buf.len(), client_version = self.client_version, "parse config event");
        match kind {
            ConfigEventKind::UpdateConfig => {
                let update = match self.check_and_record(buf) {
                    Ok(update) => update,
                    Err(status) => {
                        if buf.len() >= CONFIG_INFO_SIZE + CFG_RET_SIZE {
                            write_i32_at(buf, cfg_ret_offset(buf.len()), status.code());
                        }
                        return Err(status);
                    }
                };
                self.update = Some(update);
                Ok(ConfigPhase::Recorded)
            }
            ConfigEventKind::QueryConfigNum => self.query_config(buf, true).map(|()| ConfigPhase::Done),
            ConfigEventKind::QueryConfig => self.query_config(buf, false).map(|()| ConfigPhase::Done),
            ConfigEventKind::CreateHcomHandle => self.create_hcom_handle(buf).map(|()| ConfigPhase::Done),
            ConfigEventKind::DestroyHcomHandle => self.destroy_hcom_handle(buf).map(|()| ConfigPhase::Done),
        }
    }

    // ========================================================================
    // Check and record
    // ========================================================================

    fn check_and_record(&mut self, buf: &[u8]) -> StatusResult<UpdateCfgInfo> {
        if buf.len() < CONFIG_INFO_SIZE {
            warn!(len = buf.len(), min = CONFIG_INFO_SIZE, "config buffer too short");
            return Err(BqsStatus::ParamInvalid);
        }
        let info = ConfigInfo::get(&mut &buf[..]).map_err(|_| BqsStatus::ParamInvalid)?;
        let cmd = ConfigCmd::try_from(info.cmd).map_err(|e| {
            warn!(cmd = info.cmd, error = %e, "unknown config command");
            BqsStatus::ParamInvalid
        })?;
        let num = info.num as usize;

        let payload = match cmd {
            ConfigCmd::BindRoute | ConfigCmd::UnbindRoute => self.record_routes(cmd, num, buf)?,
            ConfigCmd::AddGroup => self.record_group(num, buf)?,
            ConfigCmd::DelGroup | ConfigCmd::UpdateProfiling | ConfigCmd::UpdateHcclProtocol => {
                expect_len(buf, CONFIG_INFO_SIZE + CFG_RET_SIZE)?;
                UpdatePayload::Empty
            }
            ConfigCmd::InitDynamicSched => {
                expect_len(buf, CONFIG_INFO_SIZE + DYNAMIC_SCHED_SIZE + CFG_RET_SIZE)?;
                let config = DynamicSchedConfig::get(&mut &buf[CONFIG_INFO_SIZE..])
                    .map_err(|_| BqsStatus::ParamInvalid)?;
                UpdatePayload::DynamicSched(config)
            }
            ConfigCmd::StopSchedule | ConfigCmd::ClearAndRestartSchedule => {
                let body = num.checked_mul(4).ok_or(BqsStatus::ParamInvalid)?;
                expect_len(buf, CONFIG_INFO_SIZE + body + CFG_RET_SIZE)?;
                let ids = (0..num)
                    .map(|i| read_u32_at(buf, CONFIG_INFO_SIZE + i * 4).ok_or(BqsStatus::ParamInvalid))
                    .collect::<StatusResult<Vec<u32>>>()?;
                UpdatePayload::RootModels(ids)
            }
        };

        info!(?cmd, num, "recorded config command");
        Ok(UpdateCfgInfo {
            cmd,
            info,
            payload,
            status: Ok(()),
            group_id: None,
        })
    }

    fn record_routes(&mut self, cmd: ConfigCmd, num: usize, buf: &[u8]) -> StatusResult<UpdatePayload> {
        if num == 0 || num > MAX_ROUTES_NUM {
            warn!(num, max = MAX_ROUTES_NUM, "route count out of range");
            return Err(BqsStatus::ParamInvalid);
        }
        expect_len(buf, CONFIG_INFO_SIZE + num * ROUTE_SIZE + num * CFG_RET_SIZE)?;

        let mut cursor = &buf[CONFIG_INFO_SIZE..];
        let mut records = Vec::with_capacity(num);
        for i in 0..num {
            let route = Route::get(&mut cursor).map_err(|e| {
                warn!(index = i, error = %e, "malformed route");
                BqsStatus::ParamInvalid
            })?;
            let record = match self.convert_route(&route) {
                Ok(pair) => RouteRecord {
                    pair: Some(pair),
                    result: Ok(()),
                },
                Err(status) => {
                    warn!(index = i, result = ?status, "route endpoint conversion failed");
                    RouteRecord {
                        pair: None,
                        result: Err(status),
                    }
                }
            };
            records.push(record);
        }

        if cmd == ConfigCmd::BindRoute {
            for record in &mut records {
                if let (Some((src, dst)), Ok(())) = (&record.pair, record.result) {
                    record.result = self.check_route_auth(src, dst);
                }
            }
        }
        Ok(UpdatePayload::Routes(records))
    }

    fn convert_route(&mut self, route: &Route) -> StatusResult<(EntityInfo, EntityInfo)> {
        let src = create_entity_info(self.ctx, &route.src, self.client_version, false)?;
        let dst = create_entity_info(self.ctx, &route.dst, self.client_version, false)?;
        Ok((src, dst))
    }

    fn record_group(&mut self, num: usize, buf: &[u8]) -> StatusResult<UpdatePayload> {
        if num == 0 || num > MAX_GROUP_MEMBERS {
            warn!(num, max = MAX_GROUP_MEMBERS, "group size out of range");
            return Err(BqsStatus::ParamInvalid);
        }
        expect_len(buf, CONFIG_INFO_SIZE + num * ENDPOINT_SIZE + CFG_RET_SIZE)?;

        let mut cursor = &buf[CONFIG_INFO_SIZE..];
        let mut members: Vec<EntityInfo> = Vec::with_capacity(num);
        let mut seen = HashSet::with_capacity(num);
        for _ in 0..num {
            let endpoint = Endpoint::get(&mut cursor).map_err(|_| BqsStatus::ParamInvalid)?;
            let member = create_entity_info(self.ctx, &endpoint, self.client_version, false)?;
            if member.is_group() {
                warn!(member = %member, "nested groups are not supported");
                return Err(BqsStatus::ParamInvalid);
            }
            if !seen.insert((member.device_id, member.is_host, member.id, member.ty)) {
                warn!(member = %member, "duplicate group member");
                return Err(BqsStatus::ParamInvalid);
            }
            members.push(member);
        }

        for member in &members {
            if member.is_queue() && member.queue_type != QueueType::Client {
                self.attach(member)?;
            }
        }
        Ok(UpdatePayload::Members(members))
    }

    // ========================================================================
    // Authority checks
    // ========================================================================

    fn attach(&self, queue: &EntityInfo) -> StatusResult {
        self.ctx
            .device()
            .attach_queue(queue.device_id, queue.id)
            .map_err(|status| {
                warn!(queue = %queue, result = ?status, "attach queue failed");
                BqsStatus::DriverError
            })
    }

    /// Source needs read rights, destination write rights
    fn check_route_auth(&self, src: &EntityInfo, dst: &EntityInfo) -> StatusResult {
        self.check_entity_auth(src, true)?;
        self.check_entity_auth(dst, false)
    }

    fn check_entity_auth(&self, entity: &EntityInfo, read: bool) -> StatusResult {
        match entity.ty {
            EntityType::Queue => self.check_queue_auth(entity, read),
            EntityType::Group => {
                let members: Vec<EntityInfo> = self
                    .ctx
                    .relation
                    .group_members(entity.group_id())
                    .ok_or_else(|| {
                        warn!(group_id = entity.group_id(), "group not found");
                        BqsStatus::GroupNotExist
                    })?
                    .into_iter()
                    .filter(|member| member.is_queue())
                    .cloned()
                    .collect();
                members
                    .iter()
                    .try_for_each(|member| self.check_queue_auth(member, read))
            }
            EntityType::Tag | EntityType::Invalid => Ok(()),
        }
    }

    fn check_queue_auth(&self, queue: &EntityInfo, read: bool) -> StatusResult {
        if queue.queue_type == QueueType::Client {
            return Ok(());
        }
        self.attach(queue)?;
        let auth = self
            .ctx
            .device()
            .queue_auth(queue.device_id, queue.id)
            .map_err(|_| BqsStatus::DriverError)?;
        let granted = if read { auth.read } else { auth.write };
        if !granted {
            warn!(queue = %queue, read, "queue authority missing");
            return Err(BqsStatus::QueueAuthError);
        }
        Ok(())
    }

    // ========================================================================
    // Process
    // ========================================================================

    /// Apply the recorded update to domain `index` and write results back
    pub fn process_update_config(&mut self, index: usize, buf: &mut [u8]) -> StatusResult {
        let Some(mut update) = self.update.take() else {
            warn!(index, "no recorded config update to process");
            return Err(BqsStatus::ParamInvalid);
        };
        if !update.cmd.processed_by_all_res() && index != 0 {
            self.update = Some(update);
            return Ok(());
        }

        let result = match update.cmd {
            ConfigCmd::BindRoute | ConfigCmd::UnbindRoute => match &mut update.payload {
                UpdatePayload::Routes(records) => self.process_routes(update.cmd, records, index),
                _ => Err(BqsStatus::InnerError),
            },
            ConfigCmd::AddGroup => {
                let added = match &update.payload {
                    UpdatePayload::Members(members) => self.add_group(members),
                    _ => Err(BqsStatus::InnerError),
                };
                added.map(|group_id| update.group_id = Some(group_id))
            }
            ConfigCmd::DelGroup => self.delete_group(update.info.group_id),
            ConfigCmd::UpdateProfiling => self.update_profiling(update.info.value),
            ConfigCmd::UpdateHcclProtocol => self.update_hccl_protocol(update.info.value),
            ConfigCmd::InitDynamicSched => match &update.payload {
                UpdatePayload::DynamicSched(config) => self.init_dynamic_sched(config),
                _ => Err(BqsStatus::InnerError),
            },
            ConfigCmd::StopSchedule => match &update.payload {
                UpdatePayload::RootModels(ids) => self.stop_schedule(ids, index),
                _ => Err(BqsStatus::InnerError),
            },
            ConfigCmd::ClearAndRestartSchedule => match &update.payload {
                UpdatePayload::RootModels(ids) => self.restart_schedule(ids, index),
                _ => Err(BqsStatus::InnerError),
            },
        };

        update.merge(result);
        update.write_back(buf);
        info!(cmd = ?update.cmd, index, result = ?result, "processed config command");
        self.update = Some(update);
        result
    }

    fn process_routes(&mut self, cmd: ConfigCmd, records: &mut [RouteRecord], index: usize) -> StatusResult {
        let bind = cmd == ConfigCmd::BindRoute;
        let mut aggregate = Ok(());
        for record in records.iter_mut() {
            let Some((src, dst)) = &record.pair else {
                keep_first(&mut aggregate, record.result);
                continue;
            };
            if record.result.is_err() {
                keep_first(&mut aggregate, record.result);
                continue;
            }

            let target = if bind {
                self.ctx.res_index_of(src.device_id)
            } else {
                self.ctx
                    .relation
                    .bind_index_by_src(src)
                    .unwrap_or_else(|| self.ctx.res_index_of(src.device_id))
            };
            if target != index {
                continue;
            }

            let result = if bind {
                self.ctx.relation.bind(src, dst, index)
            } else {
                self.ctx.relation.unbind(src, dst, index)
            };
            if result == Err(BqsStatus::Retry) {
                debug!(src = %src, dst = %dst, index, "route belongs to an inactive domain");
                continue;
            }
            record.result = result;
            keep_first(&mut aggregate, result);
        }
        self.ctx.relation.order(index);
        aggregate
    }

    fn add_group(&mut self, members: &[EntityInfo]) -> StatusResult<i32> {
        let index = members
            .first()
            .map_or(0, |member| self.ctx.res_index_of(member.device_id));
        let group_id = self.ctx.relation.create_group(members, index)?;
        info!(group_id, members = members.len(), index, "added group");
        Ok(group_id)
    }

    fn delete_group(&mut self, group_id: i32) -> StatusResult {
        let removed = self.ctx.relation.delete_group(group_id)?;
        let channels = removed
            .iter()
            .filter_map(|member| member.channel)
            .filter(|channel| self.ctx.channels.delete(channel))
            .count();
        info!(group_id, members = removed.len(), channels, "deleted group");
        Ok(())
    }

    fn update_profiling(&mut self, value: u32) -> StatusResult {
        self.ctx.profiles[0].update_mode(value)?;
        if self.ctx.is_numa() {
            self.ctx.profiles[1].update_mode(value)?;
        }
        Ok(())
    }

    fn update_hccl_protocol(&mut self, value: u32) -> StatusResult {
        let protocol = HcclProtocol::from_value(value).ok_or_else(|| {
            warn!(value, "unknown hccl protocol");
            BqsStatus::ParamInvalid
        })?;
        self.ctx.comm.set_protocol(protocol).map_err(|status| {
            warn!(protocol = protocol.as_str(), result = ?status, "set hccl protocol failed");
            BqsStatus::InnerError
        })?;
        self.ctx.hccl_protocol = Some(protocol);
        info!(env = HCCL_PROTOCOL_ENV, protocol = protocol.as_str(), "updated hccl protocol");
        Ok(())
    }

    fn init_dynamic_sched(&mut self, config: &DynamicSchedConfig) -> StatusResult {
        let device_id = res_device_id(config.res_id).unwrap_or(self.ctx.device_id());
        let is_client = is_host_res(config.res_id);
        let request = SchedQueue {
            queue_id: config.request_queue_id,
            device_id,
            is_client,
        };
        let response = SchedQueue {
            queue_id: config.response_queue_id,
            device_id,
            is_client,
        };

        let device = self.ctx.device().clone();
        for queue in [request, response] {
            device.attach_queue(queue.device_id, queue.queue_id).map_err(|status| {
                warn!(queue = queue.queue_id, result = ?status, "attach dynamic schedule queue failed");
                BqsStatus::DriverError
            })?;
        }

        let index = self.ctx.res_index_of(device_id);
        self.ctx.dynamic_sched[index].add_root_model(RootModelInfo {
            root_model_id: config.root_model_id,
            request,
            response,
        })?;

        if !is_client {
            let subscriptions = [
                (request, QueueEvent::FullToNotFull),
                (response, QueueEvent::Enqueue),
            ];
            for (queue, event) in subscriptions {
                device.subscribe(queue.device_id, queue.queue_id, event).map_err(|status| {
                    warn!(queue = queue.queue_id, ?event, result = ?status, "subscribe failed");
                    BqsStatus::InnerError
                })?;
            }
        }

        self.ctx
            .schedule_config
            .record(config.root_model_id, request, response);
        Ok(())
    }

    fn stop_schedule(&mut self, root_models: &[u32], index: usize) -> StatusResult {
        for id in root_models {
            self.ctx.schedule_config.stop(*id);
        }
        self.ctx.dynamic_sched[index].clear_cache_route_result();
        let keys: HashSet<u32> = root_models.iter().copied().collect();
        let pending = self.ctx.relation.make_sure_output_completion(&keys, index)?;
        info!(index, root_models = root_models.len(), pending, "stopped schedule");
        Ok(())
    }

    fn restart_schedule(&mut self, root_models: &[u32], index: usize) -> StatusResult {
        let keys: HashSet<u32> = root_models.iter().copied().collect();
        self.ctx.relation.clear_input_queue(&keys, index)?;
        for id in root_models {
            let dropped = self.ctx.dynamic_sched[index].take_responses(*id);
            if !dropped.is_empty() {
                debug!(root_model = id, dropped = dropped.len(), "dropped pending responses");
            }
            self.ctx.schedule_config.restart(*id);
        }
        Ok(())
    }
}

fn keep_first(aggregate: &mut StatusResult, result: StatusResult) {
    if aggregate.is_ok() {
        *aggregate = result;
    }
}

fn expect_len(buf: &[u8], expected: usize) -> StatusResult {
    if buf.len() != expected {
        warn!(len = buf.len(), expected, "config buffer length mismatch");
        return Err(BqsStatus::ParamInvalid);
    }
    Ok(())
}

#[cfg(test)]
#[path = "operator_test.rs"]
mod tests;
