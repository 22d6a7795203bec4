#![forbid(unsafe_code)]

use crate::device_addr::DeviceAddr;
use crate::link_entry::{LinkEntry, MemLoc, DB_EXT_DATA_LEN};
use crate::{ContractViolation, ReasonCodeId};

/// Extended direct command: read/write all-link database record.
pub const DB_MODIFY_CMD1: u8 = 0x2f;
pub const DB_MODIFY_CMD2: u8 = 0x00;

pub const DB_OP_MESSAGE_MAX_LEN: usize = 256;

/// One remote write of a single link-table record. Framing it onto the wire
/// is the transport's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbWriteRequest {
    pub to: DeviceAddr,
    pub cmd1: u8,
    pub cmd2: u8,
    pub ext_data: [u8; DB_EXT_DATA_LEN],
}

impl DbWriteRequest {
    pub fn modify(device: DeviceAddr, entry: &LinkEntry) -> Self {
        Self {
            to: device,
            cmd1: DB_MODIFY_CMD1,
            cmd2: DB_MODIFY_CMD2,
            ext_data: entry.to_ext_bytes(),
        }
    }

    pub fn mem_loc(&self) -> MemLoc {
        MemLoc(u16::from_be_bytes([self.ext_data[2], self.ext_data[3]]))
    }

    pub fn entry(&self) -> Result<LinkEntry, ContractViolation> {
        LinkEntry::from_ext_bytes(&self.ext_data)
    }
}

/// Completion report for an add/delete request against the device table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbOpReport {
    pub success: bool,
    pub reason_code: ReasonCodeId,
    pub message: String,
    pub entry: Option<LinkEntry>,
}

impl DbOpReport {
    pub fn ok(reason_code: ReasonCodeId, message: impl Into<String>, entry: LinkEntry) -> Self {
        Self {
            success: true,
            reason_code,
            message: bounded(message.into()),
            entry: Some(entry),
        }
    }

    pub fn failed(reason_code: ReasonCodeId, message: impl Into<String>) -> Self {
        Self {
            success: false,
            reason_code,
            message: bounded(message.into()),
            entry: None,
        }
    }
}

fn bounded(msg: String) -> String {
    if msg.len() > DB_OP_MESSAGE_MAX_LEN {
        msg.chars().take(DB_OP_MESSAGE_MAX_LEN).collect()
    } else {
        msg
    }
}
