#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use linkdb_kernel_contracts::device_addr::DeviceAddr;
use tracing::info;

use crate::device_db::{DeviceDb, StorageError};

pub const LINKDB_DB_DIR_ENV: &str = "LINKDB_DB_DIR";

/// Where per-device snapshots live. `db_dir = None` keeps every database
/// memory-only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDbStoreConfig {
    pub db_dir: Option<PathBuf>,
}

impl DeviceDbStoreConfig {
    pub fn in_memory() -> Self {
        Self { db_dir: None }
    }

    pub fn for_dir(db_dir: PathBuf) -> Self {
        Self {
            db_dir: Some(db_dir),
        }
    }

    pub fn from_env() -> Option<Self> {
        let dir = env::var(LINKDB_DB_DIR_ENV).ok()?;
        let dir = dir.trim();
        if dir.is_empty() {
            return None;
        }
        Some(Self::for_dir(PathBuf::from(dir)))
    }

    pub fn default_local() -> Self {
        Self::from_env().unwrap_or_else(|| Self::for_dir(default_db_dir()))
    }

    pub fn path_for(&self, addr: DeviceAddr) -> Option<PathBuf> {
        self.db_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", addr.hex())))
    }

    /// Loads the device's snapshot if one exists, otherwise starts an empty
    /// database bound to the device's snapshot path.
    pub fn open_device_db(&self, addr: DeviceAddr) -> Result<DeviceDb, StorageError> {
        let Some(path) = self.path_for(addr) else {
            return Ok(DeviceDb::new(addr, None));
        };
        if !path.exists() {
            return Ok(DeviceDb::new(addr, Some(path)));
        }
        let db = DeviceDb::load(&path)?;
        if db.addr() != addr {
            return Err(StorageError::AddressMismatch {
                expected: addr,
                got: db.addr(),
            });
        }
        info!(device = %addr, entries = db.len(), path = %path.display(), "loaded device db");
        Ok(db)
    }
}

fn default_db_dir() -> PathBuf {
    default_db_dir_from(|key| env::var(key).ok())
}

fn default_db_dir_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(xdg_data_home) = non_empty("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data_home).join("linkdb");
    }
    if let Some(home) = non_empty("HOME") {
        return PathBuf::from(home).join(".local").join("share").join("linkdb");
    }
    PathBuf::from(".linkdb")
}
