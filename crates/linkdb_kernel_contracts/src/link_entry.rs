#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device_addr::DeviceAddr;
use crate::{ContractViolation, Validate};

/// Each record in the device table is 8 bytes; the table grows downward.
pub const DB_RECORD_WIDTH: u16 = 0x08;
pub const LINK_DATA_LEN: usize = 3;
pub const DB_EXT_DATA_LEN: usize = 14;

const DB_FLAG_IN_USE: u8 = 0x80;
const DB_FLAG_CONTROLLER: u8 = 0x40;
// "High water mark": set on every record that has another record below it.
const DB_FLAG_NOT_LAST: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupNumber(pub u8);

impl GroupNumber {
    /// Accepts the numeric text forms that arrive from JSON/MQTT payloads.
    pub fn parse(raw: &str) -> Result<Self, ContractViolation> {
        let v = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ContractViolation::InvalidValue {
                field: "group",
                reason: "must be an integer",
            })?;
        Self::from_int(v)
    }

    pub fn from_int(v: i64) -> Result<Self, ContractViolation> {
        if !(0..=255).contains(&v) {
            return Err(ContractViolation::InvalidRange {
                field: "group",
                min: 0,
                max: 255,
                got: v,
            });
        }
        Ok(Self(v as u8))
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot address inside the device's link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemLoc(pub u16);

impl MemLoc {
    /// The slot one record below this one, if the table has room.
    pub fn next_below(self) -> Option<MemLoc> {
        self.0.checked_sub(DB_RECORD_WIDTH).map(MemLoc)
    }
}

impl fmt::Display for MemLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbFlags {
    pub in_use: bool,
    pub is_controller: bool,
    pub is_last_rec: bool,
}

impl DbFlags {
    pub fn from_byte(b: u8) -> Self {
        Self {
            in_use: b & DB_FLAG_IN_USE != 0,
            is_controller: b & DB_FLAG_CONTROLLER != 0,
            is_last_rec: b & DB_FLAG_NOT_LAST == 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut b = 0;
        if self.in_use {
            b |= DB_FLAG_IN_USE;
        }
        if self.is_controller {
            b |= DB_FLAG_CONTROLLER;
        }
        if !self.is_last_rec {
            b |= DB_FLAG_NOT_LAST;
        }
        b
    }
}

/// Per-link payload. For responders: on level, ramp rate, button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkData(pub [u8; LINK_DATA_LEN]);

impl LinkData {
    pub fn from_slice(raw: &[u8]) -> Result<Self, ContractViolation> {
        let bytes: [u8; LINK_DATA_LEN] =
            raw.try_into().map_err(|_| ContractViolation::InvalidValue {
                field: "link_entry.data",
                reason: "must be exactly 3 bytes",
            })?;
        Ok(Self(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkEntry {
    pub addr: DeviceAddr,
    pub group: GroupNumber,
    pub mem_loc: MemLoc,
    pub db_flags: DbFlags,
    pub data: LinkData,
}

impl LinkEntry {
    pub fn v1(
        addr: DeviceAddr,
        group: GroupNumber,
        mem_loc: MemLoc,
        db_flags: DbFlags,
        data: LinkData,
    ) -> Result<Self, ContractViolation> {
        let e = Self {
            addr,
            group,
            mem_loc,
            db_flags,
            data,
        };
        e.validate()?;
        Ok(e)
    }

    pub fn is_in_use(&self) -> bool {
        self.db_flags.in_use
    }

    pub fn is_controller(&self) -> bool {
        self.db_flags.is_controller
    }

    pub fn is_last_rec(&self) -> bool {
        self.db_flags.is_last_rec
    }

    /// Repurposes this slot for a new link. The slot position and the
    /// last-record marker are left alone.
    pub fn update_from(
        &mut self,
        addr: DeviceAddr,
        group: GroupNumber,
        is_controller: bool,
        data: LinkData,
    ) {
        self.addr = addr;
        self.group = group;
        self.db_flags.in_use = true;
        self.db_flags.is_controller = is_controller;
        self.data = data;
    }

    /// Extended payload for a "write all-link record" request.
    pub fn to_ext_bytes(&self) -> [u8; DB_EXT_DATA_LEN] {
        let [m_hi, m_lo] = self.mem_loc.0.to_be_bytes();
        let [a0, a1, a2] = self.addr.bytes();
        let [d0, d1, d2] = self.data.0;
        [
            0x00,
            0x02,
            m_hi,
            m_lo,
            DB_RECORD_WIDTH as u8,
            self.db_flags.to_byte(),
            self.group.0,
            a0,
            a1,
            a2,
            d0,
            d1,
            d2,
            0x00,
        ]
    }

    pub fn from_ext_bytes(raw: &[u8]) -> Result<Self, ContractViolation> {
        if raw.len() < DB_EXT_DATA_LEN - 1 {
            return Err(ContractViolation::InvalidValue {
                field: "link_entry.ext_data",
                reason: "must be at least 13 bytes",
            });
        }
        Self::v1(
            DeviceAddr::from_bytes([raw[7], raw[8], raw[9]]),
            GroupNumber(raw[6]),
            MemLoc(u16::from_be_bytes([raw[2], raw[3]])),
            DbFlags::from_byte(raw[5]),
            LinkData([raw[10], raw[11], raw[12]]),
        )
    }

    pub fn role_label(&self) -> &'static str {
        if self.db_flags.is_controller {
            "CTRL"
        } else {
            "RESP"
        }
    }
}

impl Validate for LinkEntry {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.mem_loc.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "link_entry.mem_loc",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

impl fmt::Display for LinkEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} grp: {:3} type: {} data: {:#04x} {:#04x} {:#04x}",
            self.mem_loc,
            self.addr,
            self.group.0,
            self.role_label(),
            self.data.0[0],
            self.data.0[1],
            self.data.0[2],
        )?;
        if self.db_flags.is_last_rec {
            write!(f, " (last)")?;
        }
        if !self.db_flags.in_use {
            write!(f, " (unused)")?;
        }
        Ok(())
    }
}
