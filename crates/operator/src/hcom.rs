//! HCOM handle lifecycle
//!
//! ```text
//! HcomHandleInfo (24) │ rank table (rank_table_len) │ CfgRet
//! ```
//!
//! Create initializes a communicator from the rank table and registers every
//! configured memory region with it; the new handle is written back into
//! the head. Destroy reverses both steps. Outcomes of the collective library
//! go into the result slot; only malformed buffers fail the event itself.

use tracing::{error, info, warn};

use bqs_protocol::config::{
    CFG_RET_SIZE, HCOM_HANDLE_INFO_SIZE, HcomHandleInfo, hcom_handle_offset, write_i32_at,
    write_u64_at,
};
use bqs_protocol::{BqsStatus, StatusResult, status_code};

use crate::operator::ConfigInfoOperator;

/// Offset of the result slot for a rank table of `rank_table_len` bytes
fn ret_offset(rank_table_len: usize) -> usize {
    HCOM_HANDLE_INFO_SIZE + rank_table_len
}

fn read_head(buf: &[u8]) -> StatusResult<HcomHandleInfo> {
    HcomHandleInfo::get(&mut &buf[..]).map_err(|e| {
        warn!(len = buf.len(), error = %e, "malformed hcom handle request");
        BqsStatus::ParamInvalid
    })
}

impl ConfigInfoOperator<'_> {
    pub(crate) fn create_hcom_handle(&mut self, buf: &mut [u8]) -> StatusResult {
        let head = read_head(buf)?;
        if head.rank_table_len == 0 {
            warn!("rank table is empty");
            return Err(BqsStatus::ParamInvalid);
        }
        let table_len = head.rank_table_len as usize;
        let needed = HCOM_HANDLE_INFO_SIZE
            .checked_add(table_len)
            .and_then(|len| len.checked_add(CFG_RET_SIZE))
            .ok_or_else(|| {
                warn!(rank_table_len = head.rank_table_len, "rank table length overflows");
                BqsStatus::ParamInvalid
            })?;
        if buf.len() < needed {
            warn!(len = buf.len(), needed, "hcom create buffer too short");
            return Err(BqsStatus::ParamInvalid);
        }

        let rank_table = &buf[HCOM_HANDLE_INFO_SIZE..HCOM_HANDLE_INFO_SIZE + table_len];
        let result = self.init_communicator(rank_table, head.rank_id);
        if let Ok(handle) = result {
            write_u64_at(buf, hcom_handle_offset(), handle);
        }
        write_i32_at(buf, ret_offset(table_len), status_code(&result));
        Ok(())
    }

    fn init_communicator(&self, rank_table: &[u8], rank_id: i32) -> StatusResult<u64> {
        let comm = &self.ctx.comm;
        let handle = comm
            .init_comm(self.ctx.device_id(), rank_table, rank_id)
            .map_err(|status| {
                error!(rank_id, result = ?status, "init communicator failed");
                BqsStatus::HcclError
            })?;

        for region in self.ctx.memory_regions() {
            if let Err(status) = comm.register_memory(handle, *region) {
                error!(handle, addr = region.addr, size = region.size, result = ?status, "register memory failed");
                if let Err(status) = comm.finalize_comm(handle) {
                    warn!(handle, result = ?status, "finalize after failed registration failed");
                }
                return Err(BqsStatus::HcclError);
            }
        }
        info!(handle, rank_id, regions = self.ctx.memory_regions().len(), "created hcom handle");
        Ok(handle)
    }

    pub(crate) fn destroy_hcom_handle(&mut self, buf: &mut [u8]) -> StatusResult {
        let head = read_head(buf)?;
        let table_len = head.rank_table_len as usize;
        if buf.len() < HCOM_HANDLE_INFO_SIZE + table_len + CFG_RET_SIZE {
            warn!(len = buf.len(), rank_table_len = table_len, "hcom destroy buffer too short");
            return Err(BqsStatus::ParamInvalid);
        }
        if head.handle == 0 {
            warn!("refusing to destroy null hcom handle");
            return Err(BqsStatus::ParamInvalid);
        }

        let comm = self.ctx.comm.clone();
        for region in self.ctx.memory_regions() {
            if let Err(status) = comm.unregister_memory(head.handle, region.addr) {
                warn!(handle = head.handle, addr = region.addr, result = ?status, "unregister memory failed");
            }
        }
        let result = comm.finalize_comm(head.handle).map_err(|status| {
            error!(handle = head.handle, result = ?status, "finalize communicator failed");
            BqsStatus::HcclError
        });

        let channels = self.ctx.channels.delete_by_handle(head.handle);
        self.ctx.reset_profiling();
        info!(handle = head.handle, channels, result = ?result, "destroyed hcom handle");

        write_i32_at(buf, ret_offset(table_len), status_code(&result));
        Ok(())
    }
}

#[cfg(test)]
#[path = "hcom_test.rs"]
mod tests;
