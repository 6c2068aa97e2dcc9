//! Configuration queries
//!
//! Callers first ask for the number of matching records (QUERY_CONFIG_NUM),
//! then submit a buffer sized for exactly that many (QUERY_CONFIG). A data
//! query whose declared count no longer matches the graph fails with
//! `ParamInvalid` and the caller starts over.

use bytes::BytesMut;
use tracing::{debug, warn};

use bqs_protocol::config::{
    CFG_RET_SIZE, CONFIG_INFO_SIZE, CONFIG_QUERY_SIZE, ConfigQuery, ENDPOINT_SIZE, Endpoint, EndpointType,
    QueryMode, ROUTE_SIZE, Route, query_count_offset, query_data_len, write_i32_at, write_u32_at,
};
use bqs_protocol::{BqsStatus, STATUS_OK, StatusResult};
use bqs_routing::EntityInfo;

use crate::convert::{create_entity_info, entity_to_endpoint};
use crate::operator::ConfigInfoOperator;

/// Route status reported for queried live routes
pub const ROUTE_STATUS_ACTIVE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selector {
    Src,
    Dst,
    SrcDst,
    All,
    Group,
}

impl TryFrom<u32> for Selector {
    type Error = BqsStatus;

    fn try_from(mode: u32) -> StatusResult<Self> {
        match mode {
            m if m == QueryMode::Src as u32 => Ok(Self::Src),
            m if m == QueryMode::Dst as u32 => Ok(Self::Dst),
            m if m == QueryMode::SrcDst as u32 => Ok(Self::SrcDst),
            m if m == QueryMode::All as u32 => Ok(Self::All),
            m if m == QueryMode::Group as u32 => Ok(Self::Group),
            _ => Err(BqsStatus::ParamInvalid),
        }
    }
}

/// Records found by a query
enum Found {
    Routes(Vec<Route>),
    Endpoints(Vec<Endpoint>),
}

impl Found {
    fn len(&self) -> usize {
        match self {
            Self::Routes(routes) => routes.len(),
            Self::Endpoints(endpoints) => endpoints.len(),
        }
    }
}

impl ConfigInfoOperator<'_> {
    pub(crate) fn query_config(&mut self, buf: &mut [u8], only_num: bool) -> StatusResult {
        if buf.len() < CONFIG_QUERY_SIZE {
            warn!(len = buf.len(), min = CONFIG_QUERY_SIZE, "query buffer too short");
            return Err(BqsStatus::ParamInvalid);
        }
        let query = ConfigQuery::get(&mut &buf[..]).map_err(|_| BqsStatus::ParamInvalid)?;
        let selector = Selector::try_from(query.mode).inspect_err(|_| {
            warn!(mode = query.mode, "unknown query mode");
        })?;
        let record = if selector == Selector::Group {
            ENDPOINT_SIZE
        } else {
            ROUTE_SIZE
        };
        let expected = if only_num {
            CONFIG_QUERY_SIZE + CFG_RET_SIZE
        } else {
            query_data_len(query.count as usize, record)
        };
        if buf.len() != expected {
            warn!(len = buf.len(), expected, only_num, "query buffer length mismatch");
            return Err(BqsStatus::ParamInvalid);
        }

        let found = self.find(&query, selector)?;
        let count = u32::try_from(found.len()).map_err(|_| BqsStatus::InnerError)?;
        let ret_offset = buf.len() - CFG_RET_SIZE;
        debug!(?selector, count, only_num, "config query");

        if only_num {
            write_u32_at(buf, query_count_offset(), count);
            let ret = if selector == Selector::Group && count == 0 {
                BqsStatus::GroupNotExist.code()
            } else {
                STATUS_OK
            };
            write_i32_at(buf, ret_offset, ret);
            return Ok(());
        }

        if count != query.count {
            warn!(declared = query.count, actual = count, "query count changed since count query");
            write_i32_at(buf, ret_offset, BqsStatus::ParamInvalid.code());
            return Err(BqsStatus::ParamInvalid);
        }

        let mut records = BytesMut::with_capacity(found.len() * record);
        match &found {
            Found::Routes(routes) => routes.iter().for_each(|route| route.put(&mut records)),
            Found::Endpoints(endpoints) => endpoints.iter().for_each(|endpoint| endpoint.put(&mut records)),
        }
        let start = CONFIG_QUERY_SIZE + CONFIG_INFO_SIZE;
        buf[start..start + records.len()].copy_from_slice(&records);
        write_u32_at(buf, CONFIG_QUERY_SIZE + 4, count);
        write_i32_at(buf, ret_offset, STATUS_OK);
        Ok(())
    }

    fn find(&mut self, query: &ConfigQuery, selector: Selector) -> StatusResult<Found> {
        if selector == Selector::Group {
            let endpoints = match self.ctx.relation.group_members(query.group_id) {
                Some(members) => members
                    .into_iter()
                    .map(|member| entity_to_endpoint(member, false))
                    .collect::<StatusResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            return Ok(Found::Endpoints(endpoints));
        }

        let src_mem = query.src.ty == EndpointType::MemQueue;
        let dst_mem = query.dst.ty == EndpointType::MemQueue;
        let src = self.query_entity(selector, Selector::Src, &query.src)?;
        let dst = self.query_entity(selector, Selector::Dst, &query.dst)?;

        let relation = &self.ctx.relation;
        let mut pairs: Vec<(&EntityInfo, &EntityInfo)> = Vec::new();
        for index in relation.active_domains() {
            match (&src, &dst) {
                (Some(src), None) if selector == Selector::Src => {
                    pairs.extend(relation.dsts_of(src, index).into_iter().map(|d| (src, d)));
                }
                (None, Some(dst)) if selector == Selector::Dst => {
                    pairs.extend(relation.srcs_of(dst, index).into_iter().map(|s| (s, dst)));
                }
                (Some(src), Some(dst)) => {
                    if pairs.is_empty() && relation.has_edge(src, dst, index) {
                        pairs.push((src, dst));
                    }
                }
                _ => pairs.extend(relation.edges(index)),
            }
        }

        let routes = pairs
            .into_iter()
            .map(|(s, d)| {
                let mut route = Route::new(entity_to_endpoint(s, src_mem)?, entity_to_endpoint(d, dst_mem)?);
                route.status = ROUTE_STATUS_ACTIVE;
                Ok(route)
            })
            .collect::<StatusResult<Vec<_>>>()?;
        Ok(Found::Routes(routes))
    }

    /// Key entity of one side of a route query, if that side is used
    fn query_entity(
        &mut self,
        selector: Selector,
        side: Selector,
        endpoint: &Endpoint,
    ) -> StatusResult<Option<EntityInfo>> {
        let used = selector == side || selector == Selector::SrcDst;
        if !used {
            return Ok(None);
        }
        create_entity_info(self.ctx, endpoint, self.client_version, true)
            .map(Some)
            .map_err(|status| {
                warn!(?side, result = ?status, "cannot build query entity");
                BqsStatus::Failed
            })
    }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod tests;
