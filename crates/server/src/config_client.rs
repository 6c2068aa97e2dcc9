//! In-process configuration client
//!
//! `ConfigClient` builds configuration buffers, submits them to the router
//! as config events and reads the results the operator wrote back. It is the
//! host-side counterpart of `ConfigInfoOperator` for deployments where the
//! caller shares the scheduler's process.

use std::time::Duration;

use bqs_protocol::config::{
    CONFIG_INFO_SIZE, CONFIG_QUERY_SIZE, ConfigBody, ConfigCmd, ConfigInfo, ConfigQuery, Endpoint,
    Route, cfg_ret_offset, encode_hcom_create, encode_hcom_destroy, encode_query_data,
    encode_query_num, encode_update, hcom_handle_offset, query_count_offset, read_i32_at,
    read_u32_at, read_u64_at, route_ret_offset,
};
use bqs_protocol::{BqsStatus, BytesMut, StatusResult, status_from_code};
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::event::{LINK_NOT_CONNECTED, QsEvent, QsResponse, SubEvent};
use crate::router::EventSender;

/// Interval between link-status polls
pub const LINK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Results of an update command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReply {
    /// Outcome of the command as a whole
    pub status: StatusResult,
    /// Per-route results for route commands, empty otherwise
    pub results: Vec<i32>,
    /// Group id assigned by ADD_GROUP
    pub group_id: Option<i32>,
}

impl UpdateReply {
    /// Number of routes applied successfully
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|code| **code == 0).count()
    }
}

/// Submits configuration events to a running router
#[derive(Debug, Clone)]
pub struct ConfigClient {
    sender: EventSender,
    poll_interval: Duration,
}

impl ConfigClient {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender,
            poll_interval: LINK_POLL_INTERVAL,
        }
    }

    /// Override the link-status poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Apply an update command
    ///
    /// Route commands report a result per route even when the command as a
    /// whole failed.
    pub async fn update_config(&self, info: &ConfigInfo, body: &ConfigBody) -> Result<UpdateReply> {
        let (response, buf) = self.submit(SubEvent::UpdateConfig, encode_update(info, body)).await?;
        let buf = buf.ok_or(ServerError::Status(BqsStatus::Timeout))?;

        let results = match body {
            ConfigBody::Routes(routes) => (0..routes.len())
                .map(|i| read_i32_at(&buf, route_ret_offset(routes.len(), i)).unwrap_or(BqsStatus::InnerError.code()))
                .collect(),
            _ => Vec::new(),
        };
        let group_id = (info.cmd == ConfigCmd::AddGroup as u32 && response.is_ok())
            .then(|| ConfigInfo::get(&mut &buf[..CONFIG_INFO_SIZE]).ok())
            .flatten()
            .map(|info| info.group_id);

        let reply = UpdateReply {
            status: status_from_code(response.ret_code),
            results,
            group_id,
        };
        info!(
            cmd = info.cmd,
            status = ?reply.status,
            succeeded = reply.succeeded(),
            "config update submitted"
        );
        Ok(reply)
    }

    /// Bind routes, returning one result per route
    pub async fn bind_routes(&self, routes: Vec<Route>) -> Result<UpdateReply> {
        let info = ConfigInfo::new(ConfigCmd::BindRoute, count_of(routes.len())?);
        self.update_config(&info, &ConfigBody::Routes(routes)).await
    }

    /// Unbind routes, returning one result per route
    pub async fn unbind_routes(&self, routes: Vec<Route>) -> Result<UpdateReply> {
        let info = ConfigInfo::new(ConfigCmd::UnbindRoute, count_of(routes.len())?);
        self.update_config(&info, &ConfigBody::Routes(routes)).await
    }

    /// Create a group and return its id
    pub async fn add_group(&self, members: Vec<Endpoint>) -> Result<i32> {
        let info = ConfigInfo::new(ConfigCmd::AddGroup, count_of(members.len())?);
        let reply = self.update_config(&info, &ConfigBody::Endpoints(members)).await?;
        reply.status?;
        reply.group_id.ok_or(ServerError::Status(BqsStatus::InnerError))
    }

    pub async fn delete_group(&self, group_id: i32) -> Result<()> {
        let mut info = ConfigInfo::new(ConfigCmd::DelGroup, 0);
        info.group_id = group_id;
        let reply = self.update_config(&info, &ConfigBody::Empty).await?;
        Ok(reply.status?)
    }

    /// Number of records a query currently matches
    pub async fn query_config_num(&self, query: &ConfigQuery) -> Result<u32> {
        let buf = self.submit_checked(SubEvent::QueryConfigNum, encode_query_num(query)).await?;
        status_from_code(read_i32_at(&buf, cfg_ret_offset(buf.len())).unwrap_or(BqsStatus::InnerError.code()))?;
        read_u32_at(&buf, query_count_offset()).ok_or(ServerError::Status(BqsStatus::InnerError))
    }

    /// Routes matching a route query; `query.count` must be the live count
    pub async fn query_routes(&self, query: &ConfigQuery) -> Result<Vec<Route>> {
        let buf = self.query_data(query).await?;
        let mut cursor = &buf[CONFIG_QUERY_SIZE + CONFIG_INFO_SIZE..];
        (0..query.count)
            .map(|_| Route::get(&mut cursor).map_err(ServerError::from))
            .collect()
    }

    /// Members of a group; `query.count` must be the live member count
    pub async fn query_group(&self, query: &ConfigQuery) -> Result<Vec<Endpoint>> {
        let buf = self.query_data(query).await?;
        let mut cursor = &buf[CONFIG_QUERY_SIZE + CONFIG_INFO_SIZE..];
        (0..query.count)
            .map(|_| Endpoint::get(&mut cursor).map_err(ServerError::from))
            .collect()
    }

    async fn query_data(&self, query: &ConfigQuery) -> Result<BytesMut> {
        self.submit_checked(SubEvent::QueryConfig, encode_query_data(query)).await
    }

    /// Create a collective comm handle from a rank table
    pub async fn create_hcom_handle(&self, rank_id: i32, rank_table: &[u8]) -> Result<u64> {
        let payload = encode_hcom_create(rank_id, rank_table)?;
        let buf = self.submit_checked(SubEvent::DgwCreateHcomHandle, payload).await?;
        status_from_code(read_i32_at(&buf, cfg_ret_offset(buf.len())).unwrap_or(BqsStatus::InnerError.code()))?;
        let handle = read_u64_at(&buf, hcom_handle_offset()).ok_or(ServerError::Status(BqsStatus::InnerError))?;
        info!(handle, rank_id, "hcom handle created");
        Ok(handle)
    }

    pub async fn destroy_hcom_handle(&self, handle: u64) -> Result<()> {
        let buf = self
            .submit_checked(SubEvent::DgwDestroyHcomHandle, encode_hcom_destroy(handle))
            .await?;
        status_from_code(read_i32_at(&buf, cfg_ret_offset(buf.len())).unwrap_or(BqsStatus::InnerError.code()))?;
        info!(handle, "hcom handle destroyed");
        Ok(())
    }

    /// Wait until every comm channel reports connected
    ///
    /// Polls the link status every `poll_interval`; fails with `Timeout`
    /// once `timeout` has passed.
    pub async fn wait_config_effect(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let delivered = self.sender.submit(QsEvent::new(SubEvent::QueryLinkStatusV2.id())).await?;
            let response = delivered.response.ok_or(ServerError::Status(BqsStatus::InnerError))?;
            match response.ret_code {
                0 => {
                    info!("config took effect, every link connected");
                    return Ok(());
                }
                LINK_NOT_CONNECTED => debug!("links not connected yet"),
                code => {
                    status_from_code(code)?;
                }
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                warn!(?timeout, "links still not connected");
                return Err(ServerError::Status(BqsStatus::Timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn submit(&self, sub_event: SubEvent, payload: BytesMut) -> Result<(QsResponse, Option<BytesMut>)> {
        let event = QsEvent::new(sub_event.id()).with_payload(payload);
        let delivered = self.sender.submit(event).await?;
        let response = delivered.response.ok_or(ServerError::Status(BqsStatus::InnerError))?;
        Ok((response, delivered.payload))
    }

    /// Submit and fail on a non-zero event code
    async fn submit_checked(&self, sub_event: SubEvent, payload: BytesMut) -> Result<BytesMut> {
        let (response, buf) = self.submit(sub_event, payload).await?;
        status_from_code(response.ret_code)?;
        buf.ok_or(ServerError::Status(BqsStatus::Timeout))
    }
}

fn count_of(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| ServerError::Status(BqsStatus::ParamInvalid))
}

#[cfg(test)]
#[path = "config_client_test.rs"]
mod tests;
