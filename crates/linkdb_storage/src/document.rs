#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use linkdb_kernel_contracts::device_addr::DeviceAddr;
use linkdb_kernel_contracts::link_entry::LinkEntry;
use linkdb_kernel_contracts::Validate;
use serde::{Deserialize, Serialize};

use crate::device_db::StorageError;

/// Durable snapshot of one device's link table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDbDocument {
    pub address: DeviceAddr,
    pub delta: Option<u8>,
    pub used: Vec<LinkEntry>,
    pub unused: Vec<LinkEntry>,
}

impl DeviceDbDocument {
    pub fn from_json_str(raw: &str) -> Result<Self, StorageError> {
        let doc = serde_json::from_str::<DeviceDbDocument>(raw)?;
        for entry in doc.used.iter().chain(doc.unused.iter()) {
            entry.validate()?;
        }
        Ok(doc)
    }

    pub fn read_from(path: &Path) -> Result<Self, StorageError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_vec_pretty(self)?;
        atomic_write(path, &serialized)
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(tmp, path)?;
    Ok(())
}
