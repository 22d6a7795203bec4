#![forbid(unsafe_code)]

use linkdb_kernel_contracts::db_write::DbWriteRequest;
use linkdb_kernel_contracts::device_addr::DeviceAddr;
use linkdb_kernel_contracts::link_entry::LinkEntry;

use crate::transport::WriteOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbModifyState {
    AwaitingFirstAck,
    AwaitingSecondAck,
    Done,
    Failed,
}

/// What the runtime must do after feeding an outcome to the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbModifyStep {
    /// The device accepted `entry`; record it locally. If `next` is set it
    /// must be sent before the exchange can finish.
    Commit {
        entry: LinkEntry,
        next: Option<DbWriteRequest>,
    },
    Failed {
        outcome: WriteOutcome,
    },
    /// The exchange already finished; the outcome belongs to nobody.
    Ignored,
}

/// One record write against the device table, optionally followed by a second
/// write that is only sent once the first is acknowledged.
///
/// Growth uses the followup: the new last record goes out first and the old
/// last record loses its marker only after the device accepted the new one.
/// A failure at any point leaves the device table with at least one last
/// marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbModifyExchange {
    device: DeviceAddr,
    state: DbModifyState,
    entry: LinkEntry,
    followup: Option<LinkEntry>,
}

impl DbModifyExchange {
    pub fn new(device: DeviceAddr, entry: LinkEntry) -> Self {
        Self {
            device,
            state: DbModifyState::AwaitingFirstAck,
            entry,
            followup: None,
        }
    }

    pub fn add_followup(&mut self, entry: LinkEntry) {
        self.followup = Some(entry);
    }

    pub fn state(&self) -> DbModifyState {
        self.state
    }

    /// The record this exchange exists for (the new or freed slot).
    pub fn entry(&self) -> &LinkEntry {
        &self.entry
    }

    pub fn followup(&self) -> Option<&LinkEntry> {
        self.followup.as_ref()
    }

    pub fn first_request(&self) -> DbWriteRequest {
        DbWriteRequest::modify(self.device, &self.entry)
    }

    pub fn resume(&mut self, outcome: WriteOutcome) -> DbModifyStep {
        match (self.state, outcome) {
            (DbModifyState::Done | DbModifyState::Failed, _) => DbModifyStep::Ignored,
            (DbModifyState::AwaitingFirstAck, WriteOutcome::Ack) => match &self.followup {
                Some(next) => {
                    self.state = DbModifyState::AwaitingSecondAck;
                    DbModifyStep::Commit {
                        entry: self.entry.clone(),
                        next: Some(DbWriteRequest::modify(self.device, next)),
                    }
                }
                None => {
                    self.state = DbModifyState::Done;
                    DbModifyStep::Commit {
                        entry: self.entry.clone(),
                        next: None,
                    }
                }
            },
            (DbModifyState::AwaitingSecondAck, WriteOutcome::Ack) => {
                self.state = DbModifyState::Done;
                match &self.followup {
                    Some(next) => DbModifyStep::Commit {
                        entry: next.clone(),
                        next: None,
                    },
                    None => DbModifyStep::Ignored,
                }
            }
            (_, outcome) => {
                self.state = DbModifyState::Failed;
                DbModifyStep::Failed { outcome }
            }
        }
    }

    /// Marks the exchange failed without a device answer, e.g. when the
    /// followup could not be handed to the transport.
    pub fn fail(&mut self) {
        self.state = DbModifyState::Failed;
    }
}
