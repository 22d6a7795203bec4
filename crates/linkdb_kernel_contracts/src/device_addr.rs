#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ContractViolation;

pub const DEVICE_ADDR_MAX_ID: u32 = 0x00FF_FFFF;

/// Three byte device address (`aa.bb.cc`).
///
/// Callers hand addresses over as text from config files and command payloads,
/// so [`DeviceAddr::parse`] accepts the dotted, colon and bare hex forms. The
/// canonical text form is always the dotted lower-case one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddr([u8; 3]);

impl DeviceAddr {
    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }

    pub fn from_id(id: u32) -> Result<Self, ContractViolation> {
        if id > DEVICE_ADDR_MAX_ID {
            return Err(ContractViolation::InvalidRange {
                field: "device_addr.id",
                min: 0,
                max: DEVICE_ADDR_MAX_ID as i64,
                got: id as i64,
            });
        }
        Ok(Self([(id >> 16) as u8, (id >> 8) as u8, id as u8]))
    }

    pub fn parse(raw: &str) -> Result<Self, ContractViolation> {
        let digits: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '.' | ':' | ' '))
            .collect();
        if digits.len() != 6 {
            return Err(ContractViolation::InvalidValue {
                field: "device_addr",
                reason: "must be 6 hex digits (aa.bb.cc, aa:bb:cc or aabbcc)",
            });
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ContractViolation::InvalidValue {
                field: "device_addr",
                reason: "must contain only hex digits",
            });
        }
        let id = u32::from_str_radix(&digits, 16).map_err(|_| ContractViolation::InvalidValue {
            field: "device_addr",
            reason: "must contain only hex digits",
        })?;
        Self::from_id(id)
    }

    pub fn bytes(&self) -> [u8; 3] {
        self.0
    }

    pub fn id(&self) -> u32 {
        ((self.0[0] as u32) << 16) | ((self.0[1] as u32) << 8) | self.0[2] as u32
    }

    /// Bare hex form, used for per-device file names.
    pub fn hex(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}.{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for DeviceAddr {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DeviceAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDeviceAddr {
    Text(String),
    Id(u32),
}

impl<'de> Deserialize<'de> for DeviceAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match RawDeviceAddr::deserialize(deserializer)? {
            RawDeviceAddr::Text(s) => Self::parse(&s),
            RawDeviceAddr::Id(id) => Self::from_id(id),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}
