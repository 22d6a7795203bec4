#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use linkdb_kernel_contracts::device_addr::DeviceAddr;
use linkdb_kernel_contracts::link_entry::{GroupNumber, LinkEntry, MemLoc};
use linkdb_kernel_contracts::{ContractViolation, Validate};
use tracing::debug;

use crate::document::DeviceDbDocument;

#[derive(Debug)]
pub enum StorageError {
    Io(io::Error),
    Json(serde_json::Error),
    ContractViolation(ContractViolation),
    AddressMismatch { expected: DeviceAddr, got: DeviceAddr },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::ContractViolation(v) => write!(f, "contract violation: {v}"),
            Self::AddressMismatch { expected, got } => {
                write!(f, "snapshot is for device {got}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        Self::ContractViolation(v)
    }
}

/// Local mirror of one device's all-link database.
///
/// Entries are keyed by their slot in the device table. In-use and unused
/// slots live in separate maps whose key sets always partition `mem_locs`;
/// `groups` indexes the in-use controller entries by group and is rebuilt
/// incrementally on every insert.
///
/// Every mutation that succeeds is followed by a snapshot write when a save
/// path is set.
#[derive(Debug, Clone)]
pub struct DeviceDb {
    addr: DeviceAddr,
    save_path: Option<PathBuf>,
    delta: Option<u8>,
    entries: BTreeMap<MemLoc, LinkEntry>,
    unused: BTreeMap<MemLoc, LinkEntry>,
    groups: BTreeMap<GroupNumber, Vec<LinkEntry>>,
    mem_locs: BTreeSet<MemLoc>,
}

impl DeviceDb {
    pub fn new(addr: DeviceAddr, save_path: Option<PathBuf>) -> Self {
        Self {
            addr,
            save_path,
            delta: None,
            entries: BTreeMap::new(),
            unused: BTreeMap::new(),
            groups: BTreeMap::new(),
            mem_locs: BTreeSet::new(),
        }
    }

    /// Rebuilds a database from a snapshot through the same insert path a
    /// live table download uses. Nothing is written back.
    pub fn from_document(
        doc: DeviceDbDocument,
        save_path: Option<PathBuf>,
    ) -> Result<Self, StorageError> {
        let mut db = Self::new(doc.address, save_path);
        db.delta = doc.delta;
        for entry in doc.used.into_iter().chain(doc.unused) {
            entry.validate()?;
            db.insert_entry(entry);
        }
        Ok(db)
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let doc = DeviceDbDocument::read_from(path)?;
        Self::from_document(doc, Some(path.to_path_buf()))
    }

    pub fn to_document(&self) -> DeviceDbDocument {
        DeviceDbDocument {
            address: self.addr,
            delta: self.delta,
            used: self.entries.values().cloned().collect(),
            unused: self.unused.values().cloned().collect(),
        }
    }

    pub fn addr(&self) -> DeviceAddr {
        self.addr
    }

    pub fn delta(&self) -> Option<u8> {
        self.delta
    }

    pub fn save_path(&self) -> Option<&Path> {
        self.save_path.as_deref()
    }

    pub fn set_path(&mut self, path: Option<PathBuf>) {
        self.save_path = path;
    }

    pub fn is_current(&self, delta: u8) -> bool {
        self.delta == Some(delta)
    }

    /// `None` marks the mirror stale and is not persisted.
    pub fn set_delta(&mut self, delta: Option<u8>) -> Result<(), StorageError> {
        self.delta = delta;
        if delta.is_some() {
            self.save()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> Result<(), StorageError> {
        let Some(path) = self.save_path.as_deref() else {
            return Ok(());
        };
        self.to_document().write_to(path)
    }

    /// Drops every entry and the delta, and removes the snapshot file. The
    /// device itself is not touched.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.delta = None;
        self.entries.clear();
        self.unused.clear();
        self.groups.clear();
        self.mem_locs.clear();

        if let Some(path) = self.save_path.as_deref() {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Records an entry without talking to the device (table download or
    /// acknowledged write). A later entry for the same slot replaces the
    /// earlier one, which is how duplicate download replies are absorbed.
    ///
    /// The indices are always updated; an error only reports that the
    /// snapshot could not be written.
    pub fn add_entry(&mut self, entry: LinkEntry) -> Result<(), StorageError> {
        self.insert_entry(entry);
        self.save()
    }

    fn insert_entry(&mut self, entry: LinkEntry) {
        let mem_loc = entry.mem_loc;
        if self.mem_locs.contains(&mem_loc) {
            debug!(device = %self.addr, mem_loc = %mem_loc, "replacing db entry");
        }

        // A slot is indexed at most once; forget whatever it held before.
        self.drop_group_member(mem_loc);

        if entry.db_flags.in_use {
            self.unused.remove(&mem_loc);
            if entry.db_flags.is_controller {
                self.groups
                    .entry(entry.group)
                    .or_default()
                    .push(entry.clone());
            }
            self.entries.insert(mem_loc, entry);
        } else {
            self.entries.remove(&mem_loc);
            self.unused.insert(mem_loc, entry);
        }
        self.mem_locs.insert(mem_loc);
    }

    fn drop_group_member(&mut self, mem_loc: MemLoc) {
        self.groups.retain(|_, members| {
            members.retain(|e| e.mem_loc != mem_loc);
            !members.is_empty()
        });
    }

    pub fn find_group(&self, group: GroupNumber) -> &[LinkEntry] {
        self.groups.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(
        &self,
        addr: DeviceAddr,
        group: GroupNumber,
        is_controller: bool,
    ) -> Option<&LinkEntry> {
        self.entries.values().find(|e| {
            e.addr == addr && e.group == group && e.db_flags.is_controller == is_controller
        })
    }

    pub fn find_mem_loc(&self, mem_loc: MemLoc) -> Option<&LinkEntry> {
        self.entries.get(&mem_loc)
    }

    pub fn find_all(
        &self,
        addr: Option<DeviceAddr>,
        group: Option<GroupNumber>,
        is_controller: Option<bool>,
    ) -> Vec<&LinkEntry> {
        self.entries
            .values()
            .filter(|e| addr.map_or(true, |a| e.addr == a))
            .filter(|e| group.map_or(true, |g| e.group == g))
            .filter(|e| is_controller.map_or(true, |c| e.db_flags.is_controller == c))
            .collect()
    }

    /// In-use entries in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &LinkEntry> {
        self.entries.values()
    }

    /// Unused entries in slot order.
    pub fn unused(&self) -> impl Iterator<Item = &LinkEntry> {
        self.unused.values()
    }

    pub fn groups(&self) -> &BTreeMap<GroupNumber, Vec<LinkEntry>> {
        &self.groups
    }

    pub fn mem_locs(&self) -> &BTreeSet<MemLoc> {
        &self.mem_locs
    }

    /// The reusable slot with the highest address.
    pub fn highest_unused(&self) -> Option<&LinkEntry> {
        self.unused.values().next_back()
    }

    /// The in-use entry at the lowest known slot, i.e. the one the device
    /// treats as the end of its table.
    pub fn last_entry(&self) -> Option<&LinkEntry> {
        let lowest = self.mem_locs.iter().next()?;
        self.entries.get(lowest)
    }
}

impl fmt::Display for DeviceDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.delta {
            Some(d) => writeln!(f, "DeviceDb {}: (delta {d})", self.addr)?,
            None => writeln!(f, "DeviceDb {}: (delta None)", self.addr)?,
        }
        for e in self.entries.values() {
            writeln!(f, "  {e}")?;
        }
        writeln!(f, "Unused:")?;
        for e in self.unused.values() {
            writeln!(f, "  {e}")?;
        }
        writeln!(f, "GroupMap")?;
        for (group, members) in &self.groups {
            let peers: Vec<String> = members.iter().map(|e| e.addr.to_string()).collect();
            writeln!(f, "  {group} -> [{}]", peers.join(", "))?;
        }
        Ok(())
    }
}
